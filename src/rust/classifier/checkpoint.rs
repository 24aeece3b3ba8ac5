//! Reading fine-tuned weights from SafeTensors checkpoints.
//!
//! Checkpoints saved from a model wrapped for multi-device training carry a
//! wrapper prefix on every parameter name (`module.fc.weight` instead of
//! `fc.weight`). [`normalize_parameter_names`] strips those prefixes before
//! the names are matched against the architecture, so both layouts load.
//!
//! A fine-tuned checkpoint holds the head parameters and, optionally, the
//! encoder parameters next to them. [`split_state_dict`] separates the two
//! and [`check_state_dict`] matches each part strictly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use safetensors::{Dtype, SafeTensors};

use super::error::ClassifierError;

/// Parameter-name prefixes added by multi-device training wrappers.
pub const WRAPPER_PREFIXES: &[&str] = &["module."];

/// A single named parameter, widened to f32.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

/// Parameters read from a checkpoint file, keyed by their serialized name.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    parameters: HashMap<String, ParameterTensor>,
}

impl Checkpoint {
    /// Reads every tensor in a SafeTensors file.
    ///
    /// # Errors
    /// - `ConfigurationError` if the file does not exist
    /// - `WeightLoadError` if the file cannot be parsed or holds a dtype that
    ///   cannot be widened to f32
    pub fn read(path: &Path) -> Result<Self, ClassifierError> {
        if !path.is_file() {
            return Err(ClassifierError::ConfigurationError(
                format!("Checkpoint file not found: {}", path.display())
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            ClassifierError::WeightLoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
            ClassifierError::WeightLoadError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        let mut parameters = HashMap::new();
        for (name, view) in tensors.tensors() {
            let values = widen_to_f32(view.dtype(), view.data()).ok_or_else(|| {
                ClassifierError::WeightLoadError(format!(
                    "Parameter '{}' has unsupported dtype {:?}", name, view.dtype()
                ))
            })?;
            debug!("Read parameter {} with shape {:?}", name, view.shape());
            parameters.insert(name, ParameterTensor { shape: view.shape().to_vec(), values });
        }
        info!("Read {} parameters from {}", parameters.len(), path.display());

        Ok(Self { path: path.to_path_buf(), parameters })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Consumes the checkpoint and returns its parameters with wrapper
    /// prefixes removed.
    pub fn into_state_dict(self) -> Result<HashMap<String, ParameterTensor>, ClassifierError> {
        normalize_parameter_names(self.parameters)
    }
}

/// Strips every leading wrapper prefix from each parameter name.
///
/// Nested wrappers (`module.module.fc.weight`) are stripped fully. Two
/// serialized names that collapse onto the same normalized name make the
/// checkpoint ambiguous and are rejected.
pub fn normalize_parameter_names(
    parameters: HashMap<String, ParameterTensor>,
) -> Result<HashMap<String, ParameterTensor>, ClassifierError> {
    let mut normalized = HashMap::with_capacity(parameters.len());
    for (name, tensor) in parameters {
        let stripped = strip_wrapper_prefixes(&name).to_string();
        if normalized.insert(stripped.clone(), tensor).is_some() {
            return Err(ClassifierError::WeightLoadError(format!(
                "Checkpoint holds more than one tensor for parameter '{}'", stripped
            )));
        }
    }
    Ok(normalized)
}

/// Splits a normalized state dict into the parameters under `prefix` and
/// everything else.
pub fn split_state_dict(
    state: HashMap<String, ParameterTensor>,
    prefix: &str,
) -> (HashMap<String, ParameterTensor>, HashMap<String, ParameterTensor>) {
    state.into_iter().partition(|(name, _)| name.starts_with(prefix))
}

/// Strict matching of a state dict against the parameters a module owns:
/// every expected name present with the exact shape, and nothing else.
pub fn check_state_dict<N: AsRef<str>>(
    module: &str,
    expected: &[(N, Vec<usize>)],
    state: &HashMap<String, ParameterTensor>,
) -> Result<(), ClassifierError> {
    let missing: Vec<&str> = expected.iter()
        .map(|(name, _)| name.as_ref())
        .filter(|name| !state.contains_key(*name))
        .collect();
    let mut unexpected: Vec<&str> = state.keys()
        .map(String::as_str)
        .filter(|name| !expected.iter().any(|(e, _)| e.as_ref() == *name))
        .collect();
    unexpected.sort_unstable();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ClassifierError::WeightLoadError(format!(
            "Checkpoint does not match the {}: missing {:?}, unexpected {:?}",
            module, missing, unexpected
        )));
    }

    for (name, shape) in expected {
        let actual = &state[name.as_ref()].shape;
        if actual != shape {
            return Err(ClassifierError::WeightLoadError(format!(
                "Shape mismatch for '{}': checkpoint has {:?}, {} expects {:?}",
                name.as_ref(), actual, module, shape
            )));
        }
    }
    Ok(())
}

fn strip_wrapper_prefixes(mut name: &str) -> &str {
    'outer: loop {
        for prefix in WRAPPER_PREFIXES {
            if let Some(rest) = name.strip_prefix(prefix) {
                name = rest;
                continue 'outer;
            }
        }
        return name;
    }
}

/// Decodes raw tensor bytes. SafeTensors data is little-endian and carries
/// no alignment guarantee, so values are copied out rather than cast in place.
fn widen_to_f32(dtype: Dtype, data: &[u8]) -> Option<Vec<f32>> {
    match dtype {
        Dtype::F32 => Some(bytemuck::pod_collect_to_vec::<u8, f32>(data)),
        Dtype::F64 => Some(
            bytemuck::pod_collect_to_vec::<u8, f64>(data)
                .into_iter()
                .map(|v| v as f32)
                .collect(),
        ),
        Dtype::F16 => Some(
            bytemuck::pod_collect_to_vec::<u8, half::f16>(data)
                .into_iter()
                .map(half::f16::to_f32)
                .collect(),
        ),
        Dtype::BF16 => Some(
            bytemuck::pod_collect_to_vec::<u8, half::bf16>(data)
                .into_iter()
                .map(half::bf16::to_f32)
                .collect(),
        ),
        _ => None,
    }
}
