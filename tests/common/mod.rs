#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use env_logger::{Builder, Env};
use ndarray::Array2;
use safetensors::tensor::{Dtype, TensorView};
use seqclass::{Backbone, ClassifierError, EncodedBatch, ParameterTensor, SequenceClassifierBuilder};
use tokenizers::Tokenizer;

pub const VOCAB: &[&str] = &["[PAD]", "[UNK]", "bad", "okay", "great"];
pub const QUALITY_LABELS: &[&str] = &["Low", "Medium", "High"];

// Initialize test logger
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Whitespace-split word-level tokenizer over [`VOCAB`].
pub fn tokenizer() -> Tokenizer {
    let vocab = VOCAB.iter()
        .enumerate()
        .map(|(id, word)| format!("\"{}\": {}", word, id))
        .collect::<Vec<_>>()
        .join(", ");
    Tokenizer::from_str(&format!(r#"{{
        "version": "1.0", "truncation": null, "padding": null, "added_tokens": [],
        "normalizer": null, "pre_tokenizer": {{"type": "Whitespace"}},
        "post_processor": null, "decoder": null,
        "model": {{"type": "WordLevel", "vocab": {{{}}}, "unk_token": "[UNK]"}}
    }}"#, vocab)).expect("test tokenizer parses")
}

/// Stand-in encoder: feature `j` counts attended tokens with id `j`.
#[derive(Debug)]
pub struct BagOfWords;

impl Backbone for BagOfWords {
    fn hidden_size(&self) -> usize {
        VOCAB.len()
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        Ok(count_tokens(batch, &[1.0; 5]))
    }
}

fn count_tokens(batch: &EncodedBatch, scale: &[f32]) -> Array2<f32> {
    let mut features = Array2::zeros((batch.batch_size(), VOCAB.len()));
    for (row, (ids, mask)) in batch.input_ids.rows().into_iter()
        .zip(batch.attention_mask.rows())
        .enumerate()
    {
        for (&id, &attend) in ids.iter().zip(mask.iter()) {
            if attend == 1 {
                features[[row, id as usize]] += scale[id as usize];
            }
        }
    }
    features
}

/// Name of the one fine-tunable parameter of [`ScaledBagOfWords`].
pub const EMBEDDING_SCALE: &str = "model.embeddings.scale";

/// Stand-in encoder with a per-token weight that a checkpoint can replace.
#[derive(Debug)]
pub struct ScaledBagOfWords {
    pub scale: Vec<f32>,
}

impl Default for ScaledBagOfWords {
    fn default() -> Self {
        Self { scale: vec![1.0; VOCAB.len()] }
    }
}

impl Backbone for ScaledBagOfWords {
    fn hidden_size(&self) -> usize {
        VOCAB.len()
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        Ok(count_tokens(batch, &self.scale))
    }

    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        vec![(EMBEDDING_SCALE.to_string(), vec![VOCAB.len()])]
    }

    fn with_parameters(
        &self,
        mut parameters: HashMap<String, ParameterTensor>,
    ) -> Result<Arc<dyn Backbone>, ClassifierError> {
        let scale = parameters.remove(EMBEDDING_SCALE)
            .ok_or_else(|| ClassifierError::WeightLoadError("missing scale".into()))?;
        Ok(Arc::new(Self { scale: scale.values }))
    }
}

/// Encoder whose forward pass always fails.
#[derive(Debug)]
pub struct Failing;

impl Backbone for Failing {
    fn hidden_size(&self) -> usize {
        VOCAB.len()
    }

    fn forward(&self, _batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        Err(ClassifierError::InferenceError("device lost".into()))
    }
}

/// Encoder that returns one feature too many per row.
#[derive(Debug)]
pub struct WrongWidth;

impl Backbone for WrongWidth {
    fn hidden_size(&self) -> usize {
        VOCAB.len()
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        Ok(Array2::zeros((batch.batch_size(), VOCAB.len() + 1)))
    }
}

/// Encoder that produces NaN features for any text containing "bad".
#[derive(Debug)]
pub struct NanOnBad;

impl Backbone for NanOnBad {
    fn hidden_size(&self) -> usize {
        VOCAB.len()
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        let mut features = count_tokens(batch, &[1.0; 5]);
        for mut row in features.rows_mut() {
            if row[2] > 0.0 {
                row.fill(f32::NAN);
            }
        }
        Ok(features)
    }
}

/// Writes an f32 SafeTensors file with the given named tensors.
pub fn write_checkpoint(path: &Path, tensors: &[(&str, Vec<usize>, Vec<f32>)]) -> PathBuf {
    let bytes: Vec<Vec<u8>> = tensors.iter()
        .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();
    let views: Vec<(&str, TensorView)> = tensors.iter()
        .zip(&bytes)
        .map(|((name, shape, _), data)| {
            (*name, TensorView::new(Dtype::F32, shape.clone(), data).expect("valid tensor view"))
        })
        .collect();
    std::fs::write(path, safetensors::serialize(views, None).expect("serializable")).expect("writable");
    path.to_path_buf()
}

/// Head weights mapping "bad" to Low, "okay" to Medium and "great" to High.
pub fn quality_head() -> (Vec<f32>, Vec<f32>) {
    let mut weight = vec![0.0; QUALITY_LABELS.len() * VOCAB.len()];
    for (class, word) in [2usize, 3, 4].into_iter().enumerate() {
        weight[class * VOCAB.len() + word] = 4.0;
    }
    (weight, vec![0.0; QUALITY_LABELS.len()])
}

pub fn quality_checkpoint(dir: &Path, name: &str, prefix: &str) -> PathBuf {
    let (weight, bias) = quality_head();
    let weight_name = format!("{}fc.weight", prefix);
    let bias_name = format!("{}fc.bias", prefix);
    write_checkpoint(&dir.join(name), &[
        (weight_name.as_str(), vec![QUALITY_LABELS.len(), VOCAB.len()], weight),
        (bias_name.as_str(), vec![QUALITY_LABELS.len()], bias),
    ])
}

/// Builder with the stand-in encoder and quality labels attached.
pub fn quality_builder(checkpoint: &Path) -> SequenceClassifierBuilder {
    quality_builder_with(checkpoint, Arc::new(BagOfWords))
}

pub fn quality_builder_with(checkpoint: &Path, backbone: Arc<dyn Backbone>) -> SequenceClassifierBuilder {
    SequenceClassifierBuilder::new()
        .with_backbone(backbone, tokenizer())
        .with_labels(QUALITY_LABELS.to_vec())
        .with_prediction_column("quality_pred")
        .with_probability_column("quality_prob")
        .with_checkpoint(checkpoint)
        .expect("checkpoint exists")
}
