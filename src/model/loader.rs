use crate::error::InferenceError;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info};

// Initialize the global environment for ORT (only needed once)
pub fn init_ort() -> Result<(), InferenceError> {
    ort::init().with_name("mammoscan").commit()?;
    Ok(())
}

/// Loads an ONNX model from disk and creates an inference session.
///
/// # Arguments
/// * `model_path` - Path to the .onnx file
/// * `intra_threads` - Parallelism within a single operator
pub fn load_session(
    model_path: impl AsRef<Path>,
    intra_threads: usize,
) -> Result<Session, InferenceError> {
    let path = model_path.as_ref();
    if !path.exists() {
        return Err(InferenceError::ModelNotFound(path.display().to_string()));
    }

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_file(path)?;

    info!(path = %path.display(), "loaded ONNX model");
    for (i, input) in session.inputs.iter().enumerate() {
        debug!("  input {}: {} ({:?})", i, input.name, input.input_type);
    }
    for (i, output) in session.outputs.iter().enumerate() {
        debug!("  output {}: {} ({:?})", i, output.name, output.output_type);
    }

    Ok(session)
}
