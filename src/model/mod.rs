//! The two inference stages: a CNN that turns an image tensor into a feature
//! vector, and a tree-ensemble classifier that turns features into a class.

pub mod gbdt;
pub mod loader;
pub mod onnx;

use crate::config::{ClassifierConfig, ClassifierFormat, ExtractorConfig};
use crate::error::InferenceError;
use ndarray::{Array2, Array4, ArrayView2};

pub use gbdt::GbdtClassifier;
pub use onnx::{OnnxClassifier, OnnxFeatureExtractor};

/// Stage one: image tensor in, `[batch, features]` out.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError>;
}

/// Stage two. Every method classifies the first row of `features`.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<i64, InferenceError>;

    /// Per-class probabilities in class-index order, or `None` when the model
    /// cannot produce them.
    fn predict_proba(
        &self,
        features: ArrayView2<'_, f32>,
    ) -> Result<Option<Vec<f64>>, InferenceError>;

    /// Label plus, when asked for, probabilities. Models that produce both in
    /// one run override this.
    fn classify(
        &self,
        features: ArrayView2<'_, f32>,
        with_probabilities: bool,
    ) -> Result<(i64, Option<Vec<f64>>), InferenceError> {
        let label = self.predict(features)?;
        let probabilities = if with_probabilities {
            self.predict_proba(features)?
        } else {
            None
        };
        Ok((label, probabilities))
    }
}

pub fn load_extractor(config: &ExtractorConfig) -> Result<Box<dyn FeatureExtractor>, InferenceError> {
    let session = loader::load_session(&config.path, config.intra_threads)?;
    Ok(Box::new(OnnxFeatureExtractor::new(session)?))
}

pub fn load_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>, InferenceError> {
    match config.resolved_format() {
        ClassifierFormat::Onnx => {
            let session = loader::load_session(&config.path, 1)?;
            Ok(Box::new(OnnxClassifier::new(session)?))
        }
        ClassifierFormat::LightGbm => Ok(Box::new(GbdtClassifier::from_file(&config.path)?)),
    }
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
