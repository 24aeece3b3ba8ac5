use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::checkpoint::{check_state_dict, ParameterTensor};
use super::error::ClassifierError;

/// Numeric mode used for the forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// f32 throughout
    Full,
    /// Activations and weights rounded through IEEE half precision,
    /// accumulated in f32
    Half,
}

/// Dropout followed by a linear projection from encoder features to class
/// scores.
///
/// The head only ever runs in evaluation mode, where dropout is the identity;
/// the rate is kept so the architecture description stays complete.
#[derive(Debug, Clone)]
pub struct ClassificationHead {
    dropout_rate: f32,
    /// `[output_dim, hidden_size]`
    weight: Array2<f32>,
    /// `[output_dim]`
    bias: Array1<f32>,
}

impl ClassificationHead {
    /// Namespace of the head's parameters inside a checkpoint
    pub const PREFIX: &'static str = "fc.";
    pub const WEIGHT: &'static str = "fc.weight";
    pub const BIAS: &'static str = "fc.bias";

    /// Creates a zero-initialised head. Weights are expected to come from
    /// [`ClassificationHead::load_state_dict`].
    pub fn new(hidden_size: usize, output_dim: usize, dropout_rate: f32) -> Self {
        Self {
            dropout_rate,
            weight: Array2::zeros((output_dim, hidden_size)),
            bias: Array1::zeros(output_dim),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.weight.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn dropout_rate(&self) -> f32 {
        self.dropout_rate
    }

    /// Names and shapes of every parameter the head owns.
    pub fn expected_parameters(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            (Self::WEIGHT, vec![self.output_dim(), self.hidden_size()]),
            (Self::BIAS, vec![self.output_dim()]),
        ]
    }

    /// Applies a normalized state dict with strict matching: every expected
    /// parameter must be present with the exact shape and nothing else may be
    /// in the dict. Nothing is applied unless the whole dict matches.
    pub fn load_state_dict(
        &mut self,
        mut state: HashMap<String, ParameterTensor>,
    ) -> Result<(), ClassifierError> {
        check_state_dict("classification head", &self.expected_parameters(), &state)?;

        let weight = take(&mut state, Self::WEIGHT)?;
        let bias = take(&mut state, Self::BIAS)?;
        let weight = Array2::from_shape_vec((self.output_dim(), self.hidden_size()), weight.values)
            .map_err(|e| ClassifierError::WeightLoadError(format!("Invalid '{}': {}", Self::WEIGHT, e)))?;

        self.weight = weight;
        self.bias = Array1::from_vec(bias.values);
        Ok(())
    }

    /// Projects `[batch, hidden_size]` features to `[batch, output_dim]`
    /// logits. The result is always f32.
    pub fn forward(&self, features: ArrayView2<f32>, precision: Precision) -> Array2<f32> {
        match precision {
            Precision::Full => features.dot(&self.weight.t()) + &self.bias,
            Precision::Half => {
                let features = features.mapv(round_to_half);
                let weight = self.weight.mapv(round_to_half);
                let bias = self.bias.mapv(round_to_half);
                features.dot(&weight.t()) + &bias
            }
        }
    }
}

fn take(
    state: &mut HashMap<String, ParameterTensor>,
    name: &str,
) -> Result<ParameterTensor, ClassifierError> {
    state.remove(name)
        .ok_or_else(|| ClassifierError::WeightLoadError(format!("Missing parameter '{}'", name)))
}

/// Rounds to the nearest f16 value, saturating at the largest finite one.
fn round_to_half(x: f32) -> f32 {
    let max = half::f16::MAX.to_f32();
    half::f16::from_f32(x.clamp(-max, max)).to_f32()
}
