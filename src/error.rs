use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ndarray::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not found at path: {0}")]
    ModelNotFound(String),

    #[error("ONNX Runtime error: {0}")]
    OrtError(#[from] ort::Error),

    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Input shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ShapeError),

    #[error("Unsupported file type: {0} (expected jpg, jpeg or png)")]
    UnsupportedFormat(String),

    #[error("No image was uploaded")]
    MissingUpload,

    #[error("Invalid form field: {0}")]
    InvalidForm(String),

    #[error("File is too large: the upload limit is {limit_bytes} bytes")]
    UploadTooLarge { limit_bytes: usize },

    #[error("Malformed classifier model: {0}")]
    ModelFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model session lock poisoned")]
    Poisoned,

    #[error("Inference task failed: {0}")]
    TaskFailed(String),

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),
}

impl InferenceError {
    pub fn status(&self) -> StatusCode {
        match self {
            InferenceError::ShapeMismatch { .. }
            | InferenceError::ImageError(_)
            | InferenceError::PreprocessingError(_)
            | InferenceError::UnsupportedFormat(_)
            | InferenceError::MissingUpload
            | InferenceError::InvalidForm(_) => StatusCode::BAD_REQUEST,
            InferenceError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            InferenceError::ImageError(_) => "Invalid image data".to_string(),
            InferenceError::OrtError(_) | InferenceError::TemplateError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, message).into_response()
    }
}
