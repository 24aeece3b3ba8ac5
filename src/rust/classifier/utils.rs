use ndarray::{Array1, ArrayView1};

/// Cuts `text` down to at most `max_chars` characters.
///
/// The cut is a hard one on character boundaries and knows nothing about
/// tokens, so a word may be split in half. Text that already fits is returned
/// untouched.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Numerically stable softmax over a single logit row.
///
/// Returns `None` if any logit is not finite.
pub fn softmax(logits: ArrayView1<f32>) -> Option<Array1<f32>> {
    if logits.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    Some(exp / sum)
}

/// Index of the largest value. Ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
