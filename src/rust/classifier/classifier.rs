use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, error, info, warn};
use serde_json::Value;
use tokenizers::Tokenizer;

use super::backbone::{Backbone, OnnxBackbone};
use super::checkpoint::{check_state_dict, split_state_dict, Checkpoint};
use super::config::ClassifierConfig;
use super::encoding::BatchEncoder;
use super::error::ClassifierError;
use super::head::{ClassificationHead, Precision};
use super::utils::{argmax, softmax, truncate_chars};
use crate::dataset::{Dataset, Partition};
use crate::model_manager::ModelManager;
use crate::models::ArchitectureConfig;
use crate::runtime::{ComputeDevice, RuntimeConfig};

/// Label and class probabilities for one input text.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// `labels[argmax(probabilities)]`
    pub label: String,
    /// One probability per output, summing to 1
    pub probabilities: Vec<f32>,
}

/// Where the encoder and tokenizer come from.
#[derive(Debug)]
pub(crate) enum ModelSource {
    /// Resolved from the model cache by base-architecture name
    Cache(ModelManager),
    /// Supplied directly by the caller
    Injected {
        backbone: Arc<dyn Backbone>,
        tokenizer: Tokenizer,
    },
}

/// A partition queued for scoring, with its position in the dataset.
struct PartitionJob {
    index: usize,
    first_row: usize,
    partition: Partition,
}

/// Threads used for `count` partitions: one per core at most.
fn worker_count(count: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    cores.min(count).max(1)
}

/// The realized model. Read-only once built.
#[derive(Debug)]
struct LoadedModel {
    encoder: BatchEncoder,
    backbone: Arc<dyn Backbone>,
    head: ClassificationHead,
    precision: Precision,
}

/// A text classifier made of a pretrained encoder and a fine-tuned
/// classification head, applied to datasets in fixed-size batches.
///
/// The model is loaded on first use, or up front with
/// [`SequenceClassifier::load`], and kept for the classifier's lifetime.
/// Scoring never mutates it, so one classifier can be shared across threads
/// with `Arc`.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use seqclass::{ClassifierPreset, Dataset, SequenceClassifier};
///
/// let classifier = SequenceClassifier::builder()
///     .with_preset(ClassifierPreset::Quality)
///     .with_checkpoint("quality/model.safetensors")?
///     .build()?;
///
/// let dataset = Dataset::from_texts("text", ["Traveling to Europe during the off-season can be a more budget-friendly option."], 1024);
/// let scored = classifier.score(dataset)?;
/// for label in scored.column("quality_pred") {
///     println!("{:?}", label);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SequenceClassifier {
    config: ClassifierConfig,
    runtime_config: RuntimeConfig,
    source: ModelSource,
    model: OnceLock<Arc<LoadedModel>>,
    load_lock: Mutex<()>,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<SequenceClassifier>();
    }
};

impl SequenceClassifier {
    /// Creates a new SequenceClassifierBuilder for fluent construction
    pub fn builder() -> super::builder::SequenceClassifierBuilder {
        super::builder::SequenceClassifierBuilder::new()
    }

    pub(crate) fn new(config: ClassifierConfig, runtime_config: RuntimeConfig, source: ModelSource) -> Self {
        Self {
            config,
            runtime_config,
            source,
            model: OnceLock::new(),
            load_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Returns information about the classifier's current state
    pub fn info(&self) -> super::ClassifierInfo {
        let model = self.model.get();
        super::ClassifierInfo {
            base_architecture: self.config.base_architecture.clone(),
            checkpoint_path: self.config.checkpoint_path.to_string_lossy().to_string(),
            labels: self.config.labels.clone(),
            output_dim: self.config.output_dim(),
            hidden_size: model.map(|m| m.head.hidden_size()),
            precision: self.precision(),
            loaded: model.is_some(),
            prediction_column: self.config.prediction_column.clone(),
            probability_column: self.config.probability_column.clone(),
        }
    }

    /// Loads the model now instead of on the first scoring call. Calling it
    /// again is a no-op.
    ///
    /// # Errors
    /// - `ConfigurationError` if the base architecture cannot be resolved or
    ///   the checkpoint is missing
    /// - `WeightLoadError` if the checkpoint does not match the architecture
    /// - `TokenizerError` if the tokenizer cannot be loaded
    pub fn load(&self) -> Result<(), ClassifierError> {
        self.model().map(|_| ())
    }

    fn model(&self) -> Result<&Arc<LoadedModel>, ClassifierError> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let _guard = self.load_lock.lock()
            .map_err(|_| ClassifierError::ConfigurationError("Model load lock poisoned by a previous panic".into()))?;
        if self.model.get().is_none() {
            let loaded = self.load_model().map_err(|e| {
                error!("Failed to load classifier: {}", e);
                e
            })?;
            let _ = self.model.set(Arc::new(loaded));
        }
        self.model.get()
            .ok_or_else(|| ClassifierError::ConfigurationError("Model not loaded".into()))
    }

    /// Reduced precision only applies on the accelerator; CPU runs stay f32.
    fn precision(&self) -> Precision {
        if self.config.use_reduced_precision && self.config.compute_device == ComputeDevice::Accelerator {
            Precision::Half
        } else {
            Precision::Full
        }
    }

    fn load_model(&self) -> Result<LoadedModel, ClassifierError> {
        let config = &self.config;
        let precision = self.precision();
        info!(
            "Loading classifier: base architecture {}, checkpoint {}",
            config.base_architecture, config.checkpoint_path.display()
        );

        let (backbone, tokenizer): (Arc<dyn Backbone>, Tokenizer) = match &self.source {
            ModelSource::Injected { backbone, tokenizer } => {
                if let Some(path) = &config.config_path {
                    let arch = ArchitectureConfig::from_file(path)?;
                    if arch.hidden_size != backbone.hidden_size() {
                        return Err(ClassifierError::ConfigurationError(format!(
                            "Architecture config declares hidden size {} but the encoder produces {}",
                            arch.hidden_size, backbone.hidden_size()
                        )));
                    }
                }
                (Arc::clone(backbone), tokenizer.clone())
            }
            ModelSource::Cache(manager) => {
                let files = manager.architecture_files(&config.base_architecture)?;
                let config_path = config.config_path.as_ref().unwrap_or(&files.config);
                let arch = ArchitectureConfig::from_file(config_path)?;
                if let Some(max_positions) = arch.max_position_embeddings {
                    if config.max_token_len > max_positions {
                        warn!(
                            "max_token_len {} exceeds the {} positions of {}",
                            config.max_token_len, max_positions, config.base_architecture
                        );
                    }
                }

                let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
                    ClassifierError::TokenizerError(format!("Failed to load tokenizer: {}", e))
                })?;
                info!("Tokenizer loaded successfully");

                let graph = match (&config.encoder_path, precision, &files.model_fp16) {
                    (Some(fine_tuned), _, _) => fine_tuned,
                    (None, Precision::Half, Some(fp16)) => fp16,
                    (None, Precision::Half, None) => {
                        warn!("No half-precision export for {}, using the full-precision graph", config.base_architecture);
                        &files.model
                    }
                    (None, Precision::Full, _) => &files.model,
                };
                let backbone = OnnxBackbone::from_file(
                    graph,
                    arch.hidden_size,
                    config.compute_device,
                    &self.runtime_config,
                )?;
                (Arc::new(backbone), tokenizer)
            }
        };

        let state = Checkpoint::read(&config.checkpoint_path)?.into_state_dict()?;
        let (head_state, encoder_state) = split_state_dict(state, ClassificationHead::PREFIX);

        let mut head = ClassificationHead::new(backbone.hidden_size(), config.output_dim(), config.dropout_rate);
        head.load_state_dict(head_state)?;
        let backbone = if encoder_state.is_empty() {
            backbone
        } else {
            check_state_dict("encoder", &backbone.parameter_shapes(), &encoder_state)?;
            info!("Applying {} fine-tuned encoder parameters", encoder_state.len());
            backbone.with_parameters(encoder_state)?
        };
        let encoder = BatchEncoder::new(tokenizer, config.max_token_len)?;

        info!(
            "Classifier ready: {} classes, hidden size {}, {:?} precision",
            head.output_dim(), head.hidden_size(), precision
        );
        Ok(LoadedModel { encoder, backbone, head, precision })
    }

    /// Counts the tokens `text` produces after character and token truncation.
    pub fn count_tokens(&self, text: &str) -> Result<usize, ClassifierError> {
        let model = self.model()?;
        model.encoder.count_tokens(truncate_chars(text, self.config.max_chars))
    }

    /// Classifies texts in order, without filtering.
    ///
    /// # Example
    /// ```no_run
    /// # use seqclass::{ClassifierPreset, SequenceClassifier};
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let classifier = SequenceClassifier::builder()
    /// #     .with_preset(ClassifierPreset::Quality)
    /// #     .with_checkpoint("quality/model.safetensors")?
    /// #     .build()?;
    /// let predictions = classifier.predict(&["Buy now!!! Best deals!!!"])?;
    /// println!("{} {:?}", predictions[0].label, predictions[0].probabilities);
    /// # Ok(())
    /// # }
    /// ```
    pub fn predict(&self, texts: &[&str]) -> Result<Vec<Prediction>, ClassifierError> {
        let model = self.model()?;
        self.predict_with(model, texts)
    }

    fn predict_with(&self, model: &LoadedModel, texts: &[&str]) -> Result<Vec<Prediction>, ClassifierError> {
        let mut predictions = Vec::with_capacity(texts.len());

        for (batch_idx, chunk) in texts.chunks(self.config.batch_size).enumerate() {
            let truncated: Vec<&str> = chunk.iter()
                .map(|text| truncate_chars(text, self.config.max_chars))
                .collect();
            let encoded = model.encoder.encode_batch(&truncated)?;
            let features = model.backbone.forward(&encoded)?;
            if features.dim() != (chunk.len(), model.head.hidden_size()) {
                return Err(ClassifierError::InferenceError(format!(
                    "Encoder returned features of shape {:?} for a batch of {} (hidden size {})",
                    features.dim(), chunk.len(), model.head.hidden_size()
                )));
            }

            let logits = model.head.forward(features.view(), model.precision);
            for row in logits.rows() {
                let probabilities = softmax(row)
                    .ok_or_else(|| ClassifierError::InferenceError(
                        format!("Non-finite logits in batch {}", batch_idx)
                    ))?
                    .to_vec();
                let label = argmax(&probabilities)
                    .and_then(|idx| self.config.labels.get(idx))
                    .ok_or_else(|| ClassifierError::InferenceError(
                        "Class index outside the label list".into()
                    ))?
                    .clone();
                predictions.push(Prediction { label, probabilities });
            }
            debug!("Scored batch {} ({} records)", batch_idx, chunk.len());
        }

        Ok(predictions)
    }

    /// Scores every record and returns the dataset with the prediction column
    /// (and the probability column, when configured) appended. With an
    /// allow-list only rows predicted as one of its labels are kept.
    ///
    /// Row order is preserved within each partition and partitions keep their
    /// order. A failing batch aborts the whole call.
    ///
    /// # Errors
    /// - `ConfigurationError` if a result column already exists
    /// - `DatasetError` if a record has no string under the text field
    /// - `InferenceError` if a forward pass fails
    pub fn score(&self, dataset: Dataset) -> Result<Dataset, ClassifierError> {
        let mut dataset = dataset;
        let mut new_columns = vec![self.config.prediction_column.as_str()];
        if let Some(prob) = &self.config.probability_column {
            new_columns.push(prob.as_str());
        }
        dataset.append_columns(&new_columns)?;

        let model = self.model()?;
        let rows_in = dataset.len();
        let (columns, partitions) = dataset.into_parts();

        let mut first_row = 0;
        let mut jobs = Vec::with_capacity(partitions.len());
        for (index, partition) in partitions.into_iter().enumerate() {
            let rows = partition.len();
            jobs.push(PartitionJob { index, first_row, partition });
            first_row += rows;
        }

        let scored = if self.config.parallel_partitions && jobs.len() > 1 {
            self.score_parallel(model, jobs)?
        } else {
            jobs.into_iter()
                .map(|job| self.score_partition(model, job))
                .collect::<Result<Vec<_>, _>>()?
        };

        let scored = Dataset::from_parts(columns, scored);
        info!(
            "Scored {} records into '{}' ({} kept)",
            rows_in, self.config.prediction_column, scored.len()
        );
        Ok(scored)
    }

    /// Scores partitions on at most one scoped thread per available core.
    /// Each worker takes a contiguous run of partitions so the output keeps
    /// the input order.
    fn score_parallel(&self, model: &LoadedModel, jobs: Vec<PartitionJob>) -> Result<Vec<Partition>, ClassifierError> {
        let total = jobs.len();
        let workers = worker_count(total);
        let per_worker = total.div_ceil(workers);
        debug!("Scoring {} partitions on {} threads", total, workers);

        let mut chunks = Vec::with_capacity(workers);
        let mut jobs = jobs.into_iter();
        loop {
            let chunk: Vec<PartitionJob> = jobs.by_ref().take(per_worker).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(chunks.len());
            for (worker, chunk) in chunks.into_iter().enumerate() {
                let handle = std::thread::Builder::new()
                    .name(format!("seqclass-score-{}", worker))
                    .spawn_scoped(scope, move || {
                        chunk.into_iter()
                            .map(|job| self.score_partition(model, job))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .map_err(|e| ClassifierError::InferenceError(format!("Failed to start scoring thread: {}", e)))?;
                handles.push(handle);
            }

            let mut scored = Vec::with_capacity(total);
            for handle in handles {
                let partitions = handle.join().unwrap_or_else(|_| {
                    Err(ClassifierError::InferenceError("Partition worker panicked".into()))
                })?;
                scored.extend(partitions);
            }
            Ok(scored)
        })
    }

    fn score_partition(&self, model: &LoadedModel, job: PartitionJob) -> Result<Partition, ClassifierError> {
        let PartitionJob { index, first_row, partition } = job;
        let records = partition.into_records();
        let field = &self.config.text_field;

        let texts = records.iter()
            .enumerate()
            .map(|(row, record)| match record.get(field) {
                Some(Value::String(text)) => Ok(text.as_str()),
                Some(other) => Err(ClassifierError::DatasetError(format!(
                    "Row {} (partition {}) field '{}' is not a string: {}", first_row + row, index, field, other
                ))),
                None => Err(ClassifierError::DatasetError(format!(
                    "Row {} (partition {}) has no '{}' field", first_row + row, index, field
                ))),
            })
            .collect::<Result<Vec<&str>, _>>()?;
        let predictions = self.predict_with(model, &texts)?;

        let mut kept = Vec::with_capacity(records.len());
        for (mut record, prediction) in records.into_iter().zip(predictions) {
            if let Some(allow) = &self.config.filter_allow_list {
                if !allow.contains(&prediction.label) {
                    continue;
                }
            }
            record.insert(self.config.prediction_column.clone(), Value::String(prediction.label));
            if let Some(prob) = &self.config.probability_column {
                record.insert(prob.clone(), Value::from(prediction.probabilities));
            }
            kept.push(record);
        }

        Ok(Partition::new(kept))
    }
}
