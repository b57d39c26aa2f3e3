pub mod config;
pub mod diagnosis;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod preprocessing;
pub mod server;
pub mod telemetry;

// Re-export common types
pub use diagnosis::{Confidence, Diagnosis, Finding};
pub use error::InferenceError;
pub use pipeline::Pipeline;
