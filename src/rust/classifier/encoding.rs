use ndarray::Array2;
use tokenizers::{Tokenizer, TruncationParams};

use super::error::ClassifierError;

/// Token ids and attention mask for one batch, right-padded to the longest
/// sequence in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    /// `[batch, seq_len]`
    pub input_ids: Array2<i64>,
    /// `[batch, seq_len]`, 1 for real tokens and 0 for padding
    pub attention_mask: Array2<i64>,
}

impl EncodedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }
}

/// Wraps a tokenizer configured to truncate at the model's token limit.
#[derive(Debug, Clone)]
pub(crate) struct BatchEncoder {
    tokenizer: Tokenizer,
    pad_id: u32,
}

impl BatchEncoder {
    pub(crate) fn new(mut tokenizer: Tokenizer, max_token_len: usize) -> Result<Self, ClassifierError> {
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_token_len,
                ..Default::default()
            }))
            .map_err(|e| ClassifierError::TokenizerError(format!("Failed to configure truncation: {}", e)))?;

        let pad_id = tokenizer.get_padding()
            .map(|p| p.pad_id)
            .or_else(|| tokenizer.token_to_id("[PAD]"))
            .or_else(|| tokenizer.token_to_id("<pad>"))
            .unwrap_or(0);
        // Padding is done here so the pad id and the mask stay consistent
        // regardless of what the serialized tokenizer asked for.
        tokenizer.with_padding(None);

        Ok(Self { tokenizer, pad_id })
    }

    /// Counts tokens after truncation.
    pub(crate) fn count_tokens(&self, text: &str) -> Result<usize, ClassifierError> {
        self.tokenizer.encode(text, true)
            .map(|encoding| encoding.get_ids().len())
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))
    }

    pub(crate) fn encode_batch(&self, texts: &[&str]) -> Result<EncodedBatch, ClassifierError> {
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)
            .map_err(|e| ClassifierError::TokenizerError(e.to_string()))?;

        // A zero-width batch cannot be fed to the encoder; keep one padded slot.
        let seq_len = encodings.iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut ids = Array2::from_elem((texts.len(), seq_len), i64::from(self.pad_id));
        let mut mask = Array2::zeros((texts.len(), seq_len));
        for (row, encoding) in encodings.iter().enumerate() {
            for (col, (&id, &attend)) in encoding.get_ids().iter()
                .zip(encoding.get_attention_mask())
                .enumerate()
            {
                ids[[row, col]] = i64::from(id);
                mask[[row, col]] = i64::from(attend);
            }
        }

        Ok(EncodedBatch { input_ids: ids, attention_mask: mask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn word_level_tokenizer() -> Tokenizer {
        Tokenizer::from_str(r#"{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"[PAD]": 0, "[UNK]": 1, "hello": 2, "world": 3},
                "unk_token": "[UNK]"
            }
        }"#).unwrap()
    }

    #[test]
    fn test_batch_is_padded_to_longest() {
        let encoder = BatchEncoder::new(word_level_tokenizer(), 16).unwrap();
        let batch = encoder.encode_batch(&["hello", "hello world world"]).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 3);
        assert_eq!(batch.input_ids.row(0).to_vec(), vec![2, 0, 0]);
        assert_eq!(batch.attention_mask.row(0).to_vec(), vec![1, 0, 0]);
        assert_eq!(batch.input_ids.row(1).to_vec(), vec![2, 3, 3]);
    }

    #[test]
    fn test_tokens_truncated_to_limit() {
        let encoder = BatchEncoder::new(word_level_tokenizer(), 2).unwrap();
        assert_eq!(encoder.count_tokens("hello world hello world").unwrap(), 2);
        let batch = encoder.encode_batch(&["hello world hello world"]).unwrap();
        assert_eq!(batch.seq_len(), 2);
    }

    #[test]
    fn test_empty_text_keeps_one_slot() {
        let encoder = BatchEncoder::new(word_level_tokenizer(), 8).unwrap();
        let batch = encoder.encode_batch(&[""]).unwrap();
        assert_eq!(batch.seq_len(), 1);
        assert_eq!(batch.attention_mask[[0, 0]], 0);
    }
}
