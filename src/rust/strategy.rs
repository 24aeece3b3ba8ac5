//! Composable scoring steps.
//!
//! Anything that maps a [`Dataset`] to an augmented [`Dataset`] is a
//! [`ScoringStrategy`]. A [`ClassifierChain`] applies several of them in
//! order, each one seeing the columns added by the previous ones. Ensembles
//! of classifiers are chains whose members write to distinct columns.

use std::sync::Arc;

use log::info;

use crate::classifier::{ClassifierError, SequenceClassifier};
use crate::dataset::Dataset;

pub trait ScoringStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn score(&self, dataset: Dataset) -> Result<Dataset, ClassifierError>;
}

impl ScoringStrategy for SequenceClassifier {
    fn name(&self) -> &str {
        &self.config().prediction_column
    }

    fn score(&self, dataset: Dataset) -> Result<Dataset, ClassifierError> {
        SequenceClassifier::score(self, dataset)
    }
}

impl<S: ScoringStrategy + ?Sized> ScoringStrategy for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn score(&self, dataset: Dataset) -> Result<Dataset, ClassifierError> {
        (**self).score(dataset)
    }
}

/// Strategies applied one after another to the same dataset.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use seqclass::{ClassifierChain, ClassifierPreset, Dataset, SequenceClassifier};
///
/// let mut chain = ClassifierChain::new();
/// for i in 0..3 {
///     chain = chain.then(
///         SequenceClassifier::builder()
///             .with_preset(ClassifierPreset::Quality)
///             .with_prediction_column(format!("quality_pred_{}", i))
///             .with_probability_column(format!("quality_prob_{}", i))
///             .with_checkpoint(format!("quality/model_{}.safetensors", i))?
///             .build()?,
///     );
/// }
/// let scored = chain.run(Dataset::from_texts("text", ["some document"], 1024))?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ClassifierChain {
    steps: Vec<Box<dyn ScoringStrategy>>,
}

impl ClassifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the end of the chain
    pub fn then(mut self, step: impl ScoringStrategy + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order. The first failing step aborts the chain.
    pub fn run(&self, dataset: Dataset) -> Result<Dataset, ClassifierError> {
        let mut dataset = dataset;
        for (i, step) in self.steps.iter().enumerate() {
            info!("Chain step {}/{}: {}", i + 1, self.steps.len(), step.name());
            dataset = step.score(dataset)?;
        }
        Ok(dataset)
    }
}

impl ScoringStrategy for ClassifierChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn score(&self, dataset: Dataset) -> Result<Dataset, ClassifierError> {
        self.run(dataset)
    }
}
