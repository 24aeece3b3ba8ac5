use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use crate::models::DEFAULT_BASE_ARCHITECTURE;
use crate::runtime::ComputeDevice;

pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_MAX_CHARS: usize = 6000;
pub const DEFAULT_MAX_TOKEN_LEN: usize = 512;
pub const DEFAULT_DROPOUT_RATE: f32 = 0.2;

/// Everything that defines one classifier instance. Fixed once the classifier
/// is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Hub identifier of the pretrained encoder, resolved in the model cache
    pub base_architecture: String,
    /// Serialized architecture config used instead of the cached `config.json`
    pub config_path: Option<PathBuf>,
    /// Fine-tuned weights (SafeTensors)
    pub checkpoint_path: PathBuf,
    /// Fine-tuned encoder graph exported with the checkpoint; replaces the
    /// cached base graph
    pub encoder_path: Option<PathBuf>,
    /// Class names in output order
    pub labels: Vec<String>,
    /// Number of class scores the head produces; `labels.len()` when unset
    pub output_dim: Option<usize>,
    /// Keep only rows predicted as one of these labels
    pub filter_allow_list: Option<Vec<String>>,
    pub batch_size: usize,
    pub text_field: String,
    pub prediction_column: String,
    /// Column for probability vectors; `None` attaches labels only
    pub probability_column: Option<String>,
    pub max_chars: usize,
    pub max_token_len: usize,
    pub dropout_rate: f32,
    pub compute_device: ComputeDevice,
    pub use_reduced_precision: bool,
    /// Score partitions on scoped threads instead of one after another
    pub parallel_partitions: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_architecture: DEFAULT_BASE_ARCHITECTURE.to_string(),
            config_path: None,
            checkpoint_path: PathBuf::new(),
            encoder_path: None,
            labels: Vec::new(),
            output_dim: None,
            filter_allow_list: None,
            batch_size: DEFAULT_BATCH_SIZE,
            text_field: "text".to_string(),
            prediction_column: "pred".to_string(),
            probability_column: Some("prob".to_string()),
            max_chars: DEFAULT_MAX_CHARS,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            dropout_rate: DEFAULT_DROPOUT_RATE,
            compute_device: ComputeDevice::default(),
            use_reduced_precision: true,
            parallel_partitions: false,
        }
    }
}

impl ClassifierConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ClassifierError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ClassifierError::ConfigurationError(format!("Invalid classifier config {}: {}", path.display(), e))
        })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim.unwrap_or(self.labels.len())
    }

    /// Checks every rule that can be decided without loading the model:
    /// - The checkpoint file (and the encoder graph, when set) exists
    /// - Labels are non-empty and unique, and match the output dimensionality
    /// - The allow-list only names known labels
    /// - Sizes are positive and the dropout rate lies in [0, 1)
    /// - Result column names are non-empty, distinct, and not the text field
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let invalid = |msg: String| Err(ClassifierError::ConfigurationError(msg));

        if !self.checkpoint_path.is_file() {
            return invalid(format!("Checkpoint file not found: {}", self.checkpoint_path.display()));
        }
        if let Some(encoder) = &self.encoder_path {
            if !encoder.is_file() {
                return invalid(format!("Encoder graph not found: {}", encoder.display()));
            }
        }
        if self.base_architecture.is_empty() {
            return invalid("Base architecture cannot be empty".into());
        }
        if self.labels.is_empty() {
            return invalid("At least one label is required".into());
        }
        if let Some(pos) = self.labels.iter().position(|l| l.is_empty()) {
            return invalid(format!("Label {} cannot be empty", pos + 1));
        }
        for (i, label) in self.labels.iter().enumerate() {
            if self.labels[..i].contains(label) {
                return invalid(format!("Duplicate label '{}'", label));
            }
        }
        if self.output_dim() == 0 {
            return invalid("Output dimensionality must be positive".into());
        }
        if self.output_dim() != self.labels.len() {
            return invalid(format!(
                "Output dimensionality {} does not match {} labels; argmax labelling needs one label per output",
                self.output_dim(), self.labels.len()
            ));
        }
        if let Some(allow) = &self.filter_allow_list {
            if let Some(unknown) = allow.iter().find(|a| !self.labels.contains(a)) {
                return invalid(format!("Filter label '{}' is not one of the classifier labels", unknown));
            }
        }
        if self.batch_size == 0 {
            return invalid("Batch size must be positive".into());
        }
        if self.max_chars == 0 {
            return invalid("max_chars must be positive".into());
        }
        if self.max_token_len == 0 {
            return invalid("max_token_len must be positive".into());
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid(format!("Dropout rate {} is outside [0, 1)", self.dropout_rate));
        }
        if self.text_field.is_empty() || self.prediction_column.is_empty() {
            return invalid("Text field and prediction column names cannot be empty".into());
        }
        if self.prediction_column == self.text_field {
            return invalid("Prediction column cannot replace the text field".into());
        }
        if let Some(prob) = &self.probability_column {
            if prob.is_empty() {
                return invalid("Probability column name cannot be empty".into());
            }
            if prob == &self.prediction_column || prob == &self.text_field {
                return invalid(format!("Probability column '{}' clashes with another column", prob));
            }
        }
        Ok(())
    }
}
