use std::path::Path;

use serde::Deserialize;

use crate::classifier::ClassifierError;

/// Base architecture every preset is fine-tuned from.
pub const DEFAULT_BASE_ARCHITECTURE: &str = "microsoft/deberta-v3-base";

/// The subset of a serialized transformer config the adapter needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArchitectureConfig {
    /// Width of the encoder's hidden states
    pub hidden_size: usize,
    /// Longest sequence the position embeddings cover
    #[serde(default)]
    pub max_position_embeddings: Option<usize>,
    #[serde(default)]
    pub hidden_dropout_prob: Option<f32>,
    #[serde(default)]
    pub model_type: Option<String>,
}

impl ArchitectureConfig {
    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ClassifierError::ConfigurationError(format!("Invalid architecture config {}: {}", path.display(), e))
        })?;
        if config.hidden_size == 0 {
            return Err(ClassifierError::ConfigurationError(
                format!("Architecture config {} declares hidden_size 0", path.display())
            ));
        }
        Ok(config)
    }
}

/// Ready-made label sets and column names for the published classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierPreset {
    /// Three-level document quality
    ///
    /// Characteristics:
    /// - Labels: Low, Medium, High
    /// - Columns: `quality_pred`, `quality_prob`
    /// - Max chars: 6000
    Quality,
    /// Topic domain of a document
    ///
    /// Characteristics:
    /// - Labels: 26 domains, Adult through Travel_and_Transportation
    /// - Columns: `domain_pred`, `domain_prob`
    /// - Max chars: 2000
    Domain,
}

const QUALITY_LABELS: &[&str] = &["Low", "Medium", "High"];

const DOMAIN_LABELS: &[&str] = &[
    "Adult",
    "Arts_and_Entertainment",
    "Autos_and_Vehicles",
    "Beauty_and_Fitness",
    "Books_and_Literature",
    "Business_and_Industrial",
    "Computers_and_Electronics",
    "Finance",
    "Food_and_Drink",
    "Games",
    "Health",
    "Hobbies_and_Leisure",
    "Home_and_Garden",
    "Internet_and_Telecom",
    "Jobs_and_Education",
    "Law_and_Government",
    "News",
    "Online_Communities",
    "People_and_Society",
    "Pets_and_Animals",
    "Real_Estate",
    "Science",
    "Sensitive_Subjects",
    "Shopping",
    "Sports",
    "Travel_and_Transportation",
];

impl ClassifierPreset {
    pub fn labels(&self) -> Vec<String> {
        let labels = match self {
            Self::Quality => QUALITY_LABELS,
            Self::Domain => DOMAIN_LABELS,
        };
        labels.iter().map(|l| l.to_string()).collect()
    }

    pub fn prediction_column(&self) -> &'static str {
        match self {
            Self::Quality => "quality_pred",
            Self::Domain => "domain_pred",
        }
    }

    pub fn probability_column(&self) -> &'static str {
        match self {
            Self::Quality => "quality_prob",
            Self::Domain => "domain_prob",
        }
    }

    pub fn max_chars(&self) -> usize {
        match self {
            Self::Quality => 6000,
            Self::Domain => 2000,
        }
    }

    pub fn base_architecture(&self) -> &'static str {
        DEFAULT_BASE_ARCHITECTURE
    }
}
