use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use ndarray::{s, Array2, ArrayD, ArrayViewD, Ix2, IxDyn};
use ort::session::{Session, SessionInputValue};
use ort::value::{DynValue, Tensor, ValueType};

use super::checkpoint::ParameterTensor;
use super::encoding::EncodedBatch;
use super::error::ClassifierError;
use crate::runtime::{create_session_builder, ComputeDevice, RuntimeConfig};

const TOKEN_INPUTS: [&str; 3] = ["input_ids", "attention_mask", "token_type_ids"];

/// The pretrained encoder underneath the classification head.
///
/// Implementations turn a tokenized batch into one feature vector per
/// sequence, taken from the first token position. They must be read-only
/// after construction: a single backbone is shared by every batch and every
/// thread that scores with the classifier.
pub trait Backbone: Send + Sync + fmt::Debug {
    /// Width of the feature vectors returned by [`Backbone::forward`]
    fn hidden_size(&self) -> usize;

    /// Runs the encoder and returns `[batch, hidden_size]` first-token
    /// features.
    ///
    /// # Errors
    /// - `InferenceError` if the encoder fails or returns an unexpected shape
    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError>;

    /// Names and shapes of the encoder parameters a fine-tuned checkpoint
    /// may supply. Empty for an encoder whose weights are fixed.
    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        Vec::new()
    }

    /// Returns an encoder that runs with fine-tuned `parameters`. Callers
    /// check the state dict against [`Backbone::parameter_shapes`] first.
    ///
    /// # Errors
    /// - `WeightLoadError` if the encoder cannot take the parameters
    fn with_parameters(
        &self,
        parameters: HashMap<String, ParameterTensor>,
    ) -> Result<Arc<dyn Backbone>, ClassifierError> {
        Err(ClassifierError::WeightLoadError(format!(
            "Encoder does not accept checkpoint parameters, got {}", parameters.len()
        )))
    }
}

/// Takes `[batch, seq_len, hidden_size]` hidden states and returns the
/// features at the first token position, widened to f32.
///
/// # Errors
/// - `InferenceError` if the hidden states are not rank 3 or have the wrong
///   width
pub fn first_token_features<T>(
    hidden: ArrayViewD<'_, T>,
    hidden_size: usize,
) -> Result<Array2<f32>, ClassifierError>
where
    T: Copy + Into<f32>,
{
    if hidden.ndim() != 3 {
        return Err(ClassifierError::InferenceError(format!(
            "Expected hidden states of rank 3, got shape {:?}", hidden.shape()
        )));
    }
    if hidden.shape()[2] != hidden_size {
        return Err(ClassifierError::InferenceError(format!(
            "Encoder produced hidden size {}, expected {}", hidden.shape()[2], hidden_size
        )));
    }
    if hidden.shape()[1] == 0 {
        return Err(ClassifierError::InferenceError("Encoder returned an empty sequence axis".into()));
    }
    hidden.slice(s![.., 0, ..])
        .into_dimensionality::<Ix2>()
        .map(|view| view.mapv(Into::into))
        .map_err(|e| ClassifierError::InferenceError(format!("Failed to slice features: {}", e)))
}

/// Encoder exported to ONNX and executed with ONNX Runtime.
///
/// The model is expected to:
/// - Accept `input_ids` and `attention_mask` (both `[batch, seq_len]`, int64),
///   and optionally `token_type_ids`
/// - Output hidden states `[batch, seq_len, hidden_size]` as its first output,
///   in f32 or f16
///
/// Any other graph input is an encoder parameter. Graphs exported without
/// their weights take every parameter that way; those values then come from
/// the fine-tuned checkpoint through [`Backbone::with_parameters`].
pub struct OnnxBackbone {
    session: Arc<Session>,
    hidden_size: usize,
    wants_token_type_ids: bool,
    parameter_inputs: Vec<(String, Vec<usize>)>,
    parameters: Vec<(String, DynValue)>,
}

impl fmt::Debug for OnnxBackbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxBackbone")
            .field("hidden_size", &self.hidden_size)
            .field("wants_token_type_ids", &self.wants_token_type_ids)
            .field("parameter_inputs", &self.parameter_inputs.len())
            .field("parameters", &self.parameters.len())
            .finish()
    }
}

impl OnnxBackbone {
    /// Creates a session for the graph at `model_path` on the requested device.
    ///
    /// # Errors
    /// - `ConfigurationError` if the session cannot be created or the graph
    ///   does not have the expected inputs and outputs
    pub fn from_file(
        model_path: &Path,
        hidden_size: usize,
        device: ComputeDevice,
        runtime_config: &RuntimeConfig,
    ) -> Result<Self, ClassifierError> {
        let session = create_session_builder(runtime_config, device)
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|e| ClassifierError::ConfigurationError(
                format!("Failed to create ONNX session for {}: {}", model_path.display(), e)
            ))?;

        Self::validate_model(&session)?;
        let wants_token_type_ids = session.inputs.iter().any(|input| input.name == "token_type_ids");
        let parameter_inputs = Self::parameter_inputs(&session)?;
        info!(
            "Encoder graph {} loaded (hidden size {}, token type ids: {}, parameter inputs: {})",
            model_path.display(), hidden_size, wants_token_type_ids, parameter_inputs.len()
        );

        Ok(Self {
            session: Arc::new(session),
            hidden_size,
            wants_token_type_ids,
            parameter_inputs,
            parameters: Vec::new(),
        })
    }

    fn validate_model(session: &Session) -> Result<(), ClassifierError> {
        for required in ["input_ids", "attention_mask"] {
            if !session.inputs.iter().any(|input| input.name == required) {
                return Err(ClassifierError::ConfigurationError(
                    format!("Encoder graph has no '{}' input", required)
                ));
            }
        }
        if session.outputs.is_empty() {
            return Err(ClassifierError::ConfigurationError(
                "Encoder graph must have at least 1 output for hidden states".to_string()
            ));
        }
        Ok(())
    }

    fn parameter_inputs(session: &Session) -> Result<Vec<(String, Vec<usize>)>, ClassifierError> {
        session.inputs.iter()
            .filter(|input| !TOKEN_INPUTS.contains(&input.name.as_str()))
            .map(|input| match &input.input_type {
                ValueType::Tensor { dimensions, .. } if dimensions.iter().all(|&d| d >= 0) => {
                    Ok((input.name.clone(), dimensions.iter().map(|&d| d as usize).collect()))
                }
                other => Err(ClassifierError::ConfigurationError(format!(
                    "Encoder graph input '{}' is not a fixed-shape parameter tensor: {:?}", input.name, other
                ))),
            })
            .collect()
    }
}

impl Backbone for OnnxBackbone {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, batch: &EncodedBatch) -> Result<Array2<f32>, ClassifierError> {
        if self.parameters.len() != self.parameter_inputs.len() {
            return Err(ClassifierError::InferenceError(format!(
                "Encoder graph takes {} parameter inputs but {} were loaded from the checkpoint",
                self.parameter_inputs.len(), self.parameters.len()
            )));
        }
        let tensor = |array: Array2<i64>, name: &str| {
            Tensor::from_array(array).map(SessionInputValue::from).map_err(|e| {
                ClassifierError::InferenceError(format!("Failed to create {} tensor: {}", name, e))
            })
        };

        let mut input_tensors: HashMap<&str, SessionInputValue<'_>> = HashMap::new();
        input_tensors.insert("input_ids", tensor(batch.input_ids.clone(), "input_ids")?);
        input_tensors.insert("attention_mask", tensor(batch.attention_mask.clone(), "attention_mask")?);
        if self.wants_token_type_ids {
            input_tensors.insert(
                "token_type_ids",
                tensor(Array2::zeros(batch.input_ids.raw_dim()), "token_type_ids")?,
            );
        }
        for (name, value) in &self.parameters {
            input_tensors.insert(name.as_str(), SessionInputValue::from(value.view()));
        }

        let outputs = self.session.run(input_tensors)
            .map_err(|e| ClassifierError::InferenceError(format!("Failed to run encoder: {}", e)))?;

        if let Ok(hidden) = outputs[0].try_extract_tensor::<f32>() {
            return first_token_features(hidden, self.hidden_size);
        }
        let hidden = outputs[0].try_extract_tensor::<half::f16>()
            .map_err(|e| ClassifierError::InferenceError(format!("Failed to extract hidden states: {}", e)))?;
        debug!("Encoder returned f16 hidden states; widening to f32");
        first_token_features(hidden, self.hidden_size)
    }

    fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.parameter_inputs.clone()
    }

    fn with_parameters(
        &self,
        mut parameters: HashMap<String, ParameterTensor>,
    ) -> Result<Arc<dyn Backbone>, ClassifierError> {
        let mut values = Vec::with_capacity(self.parameter_inputs.len());
        for (name, _) in &self.parameter_inputs {
            let tensor = parameters.remove(name).ok_or_else(|| {
                ClassifierError::WeightLoadError(format!("Missing encoder parameter '{}'", name))
            })?;
            let array = ArrayD::from_shape_vec(IxDyn(&tensor.shape), tensor.values).map_err(|e| {
                ClassifierError::WeightLoadError(format!("Invalid encoder parameter '{}': {}", name, e))
            })?;
            let value = Tensor::from_array(array).map_err(|e| {
                ClassifierError::WeightLoadError(format!("Failed to create tensor for '{}': {}", name, e))
            })?;
            values.push((name.clone(), value.into_dyn()));
        }
        if let Some(extra) = parameters.keys().next() {
            return Err(ClassifierError::WeightLoadError(format!(
                "Encoder graph has no parameter input '{}'", extra
            )));
        }

        Ok(Arc::new(Self {
            session: Arc::clone(&self.session),
            hidden_size: self.hidden_size,
            wants_token_type_ids: self.wants_token_type_ids,
            parameter_inputs: self.parameter_inputs.clone(),
            parameters: values,
        }))
    }
}
