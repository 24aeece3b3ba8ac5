mod error;
mod config;
mod encoding;
mod backbone;
mod checkpoint;
mod head;
pub mod builder;
mod classifier;
pub mod utils;

pub use error::ClassifierError;
pub use config::{
    ClassifierConfig, DEFAULT_BATCH_SIZE, DEFAULT_DROPOUT_RATE, DEFAULT_MAX_CHARS, DEFAULT_MAX_TOKEN_LEN,
};
pub use encoding::EncodedBatch;
pub use backbone::{first_token_features, Backbone, OnnxBackbone};
pub use checkpoint::{
    check_state_dict, normalize_parameter_names, split_state_dict, Checkpoint, ParameterTensor, WRAPPER_PREFIXES,
};
pub use head::{ClassificationHead, Precision};
pub use builder::SequenceClassifierBuilder;
pub use classifier::{Prediction, SequenceClassifier};

/// Information about the current state and configuration of a classifier
#[derive(Debug, Clone)]
pub struct ClassifierInfo {
    /// Hub identifier of the pretrained encoder
    pub base_architecture: String,
    /// Path to the fine-tuned checkpoint
    pub checkpoint_path: String,
    /// Class names in output order
    pub labels: Vec<String>,
    /// Number of class scores produced per record
    pub output_dim: usize,
    /// Width of the encoder features; known once the model is loaded
    pub hidden_size: Option<usize>,
    /// Numeric precision used for the forward pass
    pub precision: Precision,
    pub loaded: bool,
    pub prediction_column: String,
    pub probability_column: Option<String>,
}
