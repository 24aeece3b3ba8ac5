use std::path::Path;
use std::sync::Arc;

use log::info;
use tokenizers::Tokenizer;

use super::backbone::Backbone;
use super::classifier::{ModelSource, SequenceClassifier};
use super::config::ClassifierConfig;
use super::error::ClassifierError;
use crate::models::ClassifierPreset;
use crate::runtime::{ComputeDevice, RuntimeConfig};
use crate::ModelManager;

/// A builder for constructing a SequenceClassifier with a fluent interface.
///
/// Only [`with_checkpoint`](Self::with_checkpoint) and
/// [`build`](Self::build) can fail; every other setter just records a value
/// and all rules are checked together at build time.
#[derive(Debug, Default)]
pub struct SequenceClassifierBuilder {
    config: ClassifierConfig,
    runtime_config: RuntimeConfig,
    model_manager: Option<ModelManager>,
    injected: Option<(Arc<dyn Backbone>, Tokenizer)>,
    eager: bool,
}

impl SequenceClassifierBuilder {
    /// Creates a new builder with default configuration
    ///
    /// # Example
    /// ```
    /// use seqclass::SequenceClassifierBuilder;
    ///
    /// let builder = SequenceClassifierBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration, e.g. one read with
    /// [`ClassifierConfig::from_json_file`]
    pub fn with_config(mut self, config: ClassifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Applies a preset's labels, column names, character limit and base
    /// architecture. Later setters override individual values.
    ///
    /// # Example
    /// ```
    /// use seqclass::{ClassifierPreset, SequenceClassifierBuilder};
    ///
    /// let builder = SequenceClassifierBuilder::new()
    ///     .with_preset(ClassifierPreset::Domain);
    /// ```
    pub fn with_preset(mut self, preset: ClassifierPreset) -> Self {
        self.config.labels = preset.labels();
        self.config.output_dim = None;
        self.config.prediction_column = preset.prediction_column().to_string();
        self.config.probability_column = Some(preset.probability_column().to_string());
        self.config.max_chars = preset.max_chars();
        self.config.base_architecture = preset.base_architecture().to_string();
        self
    }

    /// The configuration as it stands
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Sets the runtime configuration for ONNX model execution
    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Sets the fine-tuned checkpoint to load into the classification head
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder instance if successful, or a
    ///   `ConfigurationError` if the path is empty or does not name an existing file
    pub fn with_checkpoint(mut self, path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ClassifierError::ConfigurationError("Checkpoint path cannot be empty".into()));
        }
        if !path.is_file() {
            return Err(ClassifierError::ConfigurationError(
                format!("Checkpoint file not found: {}", path.display())
            ));
        }
        self.config.checkpoint_path = path.to_path_buf();
        Ok(self)
    }

    /// Uses a fine-tuned encoder graph instead of the cached base graph.
    pub fn with_encoder_graph(mut self, path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ClassifierError::ConfigurationError(
                format!("Encoder graph not found: {}", path.display())
            ));
        }
        self.config.encoder_path = Some(path.to_path_buf());
        Ok(self)
    }

    pub fn with_labels(mut self, labels: Vec<impl Into<String>>) -> Self {
        self.config.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the number of head outputs, which otherwise equals the
    /// number of labels
    pub fn with_output_dim(mut self, output_dim: usize) -> Self {
        self.config.output_dim = Some(output_dim);
        self
    }

    /// Keeps only rows whose predicted label is in `labels`
    pub fn with_filter(mut self, labels: Vec<impl Into<String>>) -> Self {
        self.config.filter_allow_list = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.config.text_field = field.into();
        self
    }

    pub fn with_prediction_column(mut self, column: impl Into<String>) -> Self {
        self.config.prediction_column = column.into();
        self
    }

    pub fn with_probability_column(mut self, column: impl Into<String>) -> Self {
        self.config.probability_column = Some(column.into());
        self
    }

    /// Attaches only the label column
    pub fn without_probabilities(mut self) -> Self {
        self.config.probability_column = None;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.config.max_chars = max_chars;
        self
    }

    pub fn with_max_token_len(mut self, max_token_len: usize) -> Self {
        self.config.max_token_len = max_token_len;
        self
    }

    pub fn with_dropout_rate(mut self, rate: f32) -> Self {
        self.config.dropout_rate = rate;
        self
    }

    pub fn with_device(mut self, device: ComputeDevice) -> Self {
        self.config.compute_device = device;
        self
    }

    pub fn with_reduced_precision(mut self, enabled: bool) -> Self {
        self.config.use_reduced_precision = enabled;
        self
    }

    pub fn with_base_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.config.base_architecture = architecture.into();
        self
    }

    /// Uses a serialized architecture config instead of the cached one
    pub fn with_architecture_config(mut self, path: impl AsRef<Path>) -> Self {
        self.config.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_parallel_partitions(mut self, enabled: bool) -> Self {
        self.config.parallel_partitions = enabled;
        self
    }

    /// Resolves base architectures through `manager` instead of the default cache
    pub fn with_model_manager(mut self, manager: ModelManager) -> Self {
        self.model_manager = Some(manager);
        self
    }

    /// Supplies the encoder and tokenizer directly, bypassing base-architecture
    /// resolution. The checkpoint is still loaded into the head.
    pub fn with_backbone(mut self, backbone: Arc<dyn Backbone>, tokenizer: Tokenizer) -> Self {
        self.injected = Some((backbone, tokenizer));
        self
    }

    /// Loads the model inside [`build`](Self::build) instead of on first use
    pub fn with_eager_loading(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Validates the configuration and builds the classifier
    ///
    /// # Returns
    /// * `Result<SequenceClassifier, ClassifierError>` - The classifier if successful, or:
    ///   - `ConfigurationError` if any configuration rule is violated
    ///   - any load error when eager loading is enabled
    pub fn build(self) -> Result<SequenceClassifier, ClassifierError> {
        self.config.validate()?;

        let source = match (self.injected, self.model_manager) {
            (Some((backbone, tokenizer)), _) => ModelSource::Injected { backbone, tokenizer },
            (None, Some(manager)) => ModelSource::Cache(manager),
            (None, None) => ModelSource::Cache(ModelManager::new_default().map_err(|e| {
                ClassifierError::ConfigurationError(format!("Failed to create model manager: {}", e))
            })?),
        };

        info!(
            "Built classifier '{}' with {} labels",
            self.config.prediction_column, self.config.labels.len()
        );
        let classifier = SequenceClassifier::new(self.config, self.runtime_config, source);
        if self.eager {
            classifier.load()?;
        }
        Ok(classifier)
    }
}
