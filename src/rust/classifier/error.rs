use crate::model_manager::ModelError;

/// Represents the different types of errors that can occur while resolving,
/// loading or running a sequence classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Invalid or incomplete configuration: missing checkpoint, bad label set,
    /// unresolvable base architecture, clashing column names
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// The checkpoint exists but does not match the instantiated architecture
    #[error("Weight load error: {0}")]
    WeightLoadError(String),
    /// A forward pass failed; the whole scoring call is aborted
    #[error("Inference error: {0}")]
    InferenceError(String),
    /// Error occurred while loading or running the tokenizer
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
    /// A record could not be read, written or interpreted
    #[error("Dataset error: {0}")]
    DatasetError(String),
}

impl From<ModelError> for ClassifierError {
    fn from(err: ModelError) -> Self {
        ClassifierError::ConfigurationError(err.to_string())
    }
}
