use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::Result as OrtResult;
use serde::{Deserialize, Serialize};
use std::sync::Once;

static INIT: Once = Once::new();

/// Where the encoder forward pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    /// CUDA when the crate is built with the `cuda` feature and a device is
    /// available, CPU otherwise
    #[default]
    Accelerator,
}

#[derive(Debug)]
pub struct RuntimeConfig {
    pub inter_threads: usize,
    pub intra_threads: usize,
    pub optimization_level: GraphOptimizationLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_threads: 0, // Let ONNX Runtime decide
            intra_threads: 0, // Let ONNX Runtime decide
            optimization_level: GraphOptimizationLevel::Level3,
        }
    }
}

impl Clone for RuntimeConfig {
    fn clone(&self) -> Self {
        Self {
            inter_threads: self.inter_threads,
            intra_threads: self.intra_threads,
            optimization_level: copy_level(&self.optimization_level),
        }
    }
}

fn copy_level(level: &GraphOptimizationLevel) -> GraphOptimizationLevel {
    match level {
        GraphOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
        GraphOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
        GraphOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        GraphOptimizationLevel::Disable => GraphOptimizationLevel::Disable,
    }
}

fn init_onnx_environment() -> OrtResult<()> {
    ort::init()
        .with_name("seqclass")
        .commit()?;
    Ok(())
}

/// Commits the process-wide ONNX Runtime environment once. It lives until the
/// process exits; nothing in this crate tears it down.
pub fn ensure_initialized() -> OrtResult<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_onnx_environment();
    });
    result
}

/// Whether an accelerator execution provider can be registered in this build.
pub fn accelerator_available() -> bool {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
        CUDAExecutionProvider::default().is_available().unwrap_or(false)
    }
    #[cfg(not(feature = "cuda"))]
    {
        false
    }
}

pub fn create_session_builder(config: &RuntimeConfig, device: ComputeDevice) -> OrtResult<SessionBuilder> {
    ensure_initialized()?;
    let mut builder = Session::builder()?;

    // Configure threading
    if config.inter_threads > 0 {
        builder = builder.with_inter_threads(config.inter_threads)?;
    }
    if config.intra_threads > 0 {
        builder = builder.with_intra_threads(config.intra_threads)?;
    }

    builder = builder.with_optimization_level(copy_level(&config.optimization_level))?;

    if device == ComputeDevice::Accelerator {
        if accelerator_available() {
            builder = register_accelerator(builder)?;
        } else {
            log::warn!("Accelerator requested but not available in this build, running on CPU");
        }
    }

    Ok(builder)
}

#[cfg(feature = "cuda")]
fn register_accelerator(builder: SessionBuilder) -> OrtResult<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;
    log::info!("Registering CUDA execution provider");
    builder.with_execution_providers([CUDAExecutionProvider::default().build()])
}

#[cfg(not(feature = "cuda"))]
fn register_accelerator(builder: SessionBuilder) -> OrtResult<SessionBuilder> {
    Ok(builder)
}
