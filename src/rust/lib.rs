//! Applies fine-tuned transformer sequence classifiers to partitioned text
//! datasets.
//!
//! A classifier pairs a pretrained encoder (an ONNX export resolved from the
//! local model cache) with a linear classification head whose weights come
//! from a SafeTensors checkpoint. Scoring truncates each text, tokenizes in
//! fixed-size batches, runs the encoder and head, and appends a label column
//! and a probability column to every record.
//!
//! # Basic Usage
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use seqclass::{ClassifierPreset, Dataset, SequenceClassifier};
//!
//! let classifier = SequenceClassifier::builder()
//!     .with_preset(ClassifierPreset::Quality)
//!     .with_checkpoint("quality/model.safetensors")?
//!     .build()?;
//!
//! let dataset = Dataset::from_texts("text", [
//!     "Traveling to Europe during the off-season can be a more budget-friendly option.",
//!     "Buy now!!! Best deals!!!",
//! ], 1024);
//! let scored = classifier.score(dataset)?;
//! for record in scored.records() {
//!     println!("{} {}", record["quality_pred"], record["quality_prob"]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The classifier is thread-safe and can be shared across threads using `Arc`:
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use seqclass::{ClassifierPreset, Dataset, SequenceClassifier};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let classifier = Arc::new(SequenceClassifier::builder()
//!     .with_preset(ClassifierPreset::Domain)
//!     .with_checkpoint("domain/model.safetensors")?
//!     .build()?);
//!
//! let mut handles = vec![];
//! for shard in 0..3 {
//!     let classifier = Arc::clone(&classifier);
//!     handles.push(thread::spawn(move || {
//!         let dataset = Dataset::from_texts("text", [format!("shard {}", shard)], 1024);
//!         classifier.score(dataset).unwrap();
//!     }));
//! }
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod runtime;
pub mod model_manager;
pub mod models;
pub mod dataset;
pub mod strategy;

pub use classifier::{
    Backbone, ClassificationHead, ClassifierConfig, ClassifierError, ClassifierInfo, EncodedBatch,
    OnnxBackbone, ParameterTensor, Prediction, Precision, SequenceClassifier, SequenceClassifierBuilder,
};
pub use runtime::{ComputeDevice, RuntimeConfig, create_session_builder};
pub use model_manager::{ArchitectureFiles, DownloadManifest, ModelError, ModelManager, RemoteFile};
pub use models::{ArchitectureConfig, ClassifierPreset};
pub use dataset::{Dataset, Partition, Record};
pub use strategy::{ClassifierChain, ScoringStrategy};

pub fn init_logger() {
    env_logger::init();
}
