use crate::diagnosis::{label_for, Confidence, ConfidenceReport, Diagnosis, Finding};
use crate::error::InferenceError;
use crate::model::{Classifier, FeatureExtractor};
use crate::preprocessing::image::{decode_upload, preview_data_uri, Preprocessor};
use metrics::{counter, histogram};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The loaded models plus the preprocessing they expect. Built once at startup.
pub struct Pipeline {
    preprocessor: Preprocessor,
    extractor: Box<dyn FeatureExtractor>,
    classifier: Box<dyn Classifier>,
}

impl Pipeline {
    pub fn new(
        preprocessor: Preprocessor,
        extractor: Box<dyn FeatureExtractor>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        Self {
            preprocessor,
            extractor,
            classifier,
        }
    }

    /// Classifies one uploaded image. Failures are counted and returned as-is.
    pub fn run(&self, image_bytes: &[u8], want_confidence: bool) -> Result<Diagnosis, InferenceError> {
        let result = self.diagnose(image_bytes, want_confidence);
        match &result {
            Ok(diagnosis) => {
                counter!("mammoscan_predictions_total", "finding" => diagnosis.label).increment(1);
                histogram!("mammoscan_inference_seconds").record(diagnosis.inference_ms / 1000.0);
                info!(
                    class_index = diagnosis.class_index,
                    label = diagnosis.label,
                    inference_ms = diagnosis.inference_ms,
                    "classified mammogram"
                );
            }
            Err(e) => {
                counter!("mammoscan_prediction_errors_total").increment(1);
                warn!(error = %e, "prediction failed");
            }
        }
        result
    }

    fn diagnose(&self, image_bytes: &[u8], want_confidence: bool) -> Result<Diagnosis, InferenceError> {
        // 1. Decode
        let image = decode_upload(image_bytes)?;
        let preview = preview_data_uri(&image)?;
        debug!(width = image.width(), height = image.height(), "decoded upload");

        // 2. Preprocess
        let start = Instant::now();
        let input_tensor = self.preprocessor.tensor(&image)?;

        // 3. Extract features, then classify
        let features = self.extractor.extract(input_tensor)?;
        debug!(shape = ?features.shape(), "extracted features");
        let (class_index, probabilities) =
            self.classifier.classify(features.view(), want_confidence)?;
        let finding = Finding::from_index(class_index);
        let label = label_for(finding);

        // 4. Optional probabilities
        let confidence = match (want_confidence, probabilities) {
            (false, _) => Confidence::Hidden,
            (true, Some(probabilities)) => {
                Confidence::Report(ConfidenceReport::from_probabilities(&probabilities, label))
            }
            (true, None) => Confidence::Unsupported,
        };

        let duration = start.elapsed();

        Ok(Diagnosis {
            class_index,
            finding,
            label,
            confidence,
            preview,
            inference_ms: duration.as_secs_f64() * 1000.0,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_run_with_confidence() {
        let pipeline = pipeline(Box::new(FixedClassifier {
            class_index: 1,
            probabilities: Some(vec![0.1, 0.7, 0.2]),
        }));

        let diagnosis = pipeline.run(&png_bytes(300, 200), true).unwrap();
        assert_eq!(diagnosis.class_index, 1);
        assert_eq!(diagnosis.finding, Some(Finding::Malignant));
        assert_eq!(diagnosis.label, "Malignant");
        assert!(diagnosis.preview.starts_with("data:image/png;base64,"));

        match diagnosis.confidence {
            Confidence::Report(report) => {
                assert_eq!(report.scores.len(), 3);
                assert_eq!(report.scores[1].display, "70.00%");
                assert!(report.scores[1].is_predicted);
            }
            other => panic!("Expected a confidence report, got {other:?}"),
        }
    }

    #[test]
    fn test_run_without_confidence() {
        let pipeline = pipeline(Box::new(FixedClassifier {
            class_index: 0,
            probabilities: Some(vec![0.9, 0.05, 0.05]),
        }));
        let diagnosis = pipeline.run(&png_bytes(10, 10), false).unwrap();
        assert_eq!(diagnosis.confidence, Confidence::Hidden);
    }

    #[test]
    fn test_classifier_without_probabilities() {
        let pipeline = pipeline(Box::new(FixedClassifier {
            class_index: 2,
            probabilities: None,
        }));
        let diagnosis = pipeline.run(&png_bytes(10, 10), true).unwrap();
        assert_eq!(diagnosis.label, "Normal");
        assert_eq!(diagnosis.confidence, Confidence::Unsupported);
    }

    #[test]
    fn test_out_of_range_index_is_unknown() {
        let pipeline = pipeline(Box::new(FixedClassifier {
            class_index: 7,
            probabilities: Some(vec![0.2, 0.3, 0.5]),
        }));
        let diagnosis = pipeline.run(&png_bytes(10, 10), true).unwrap();
        assert_eq!(diagnosis.finding, None);
        assert_eq!(diagnosis.label, "Unknown");
        match diagnosis.confidence {
            Confidence::Report(report) => assert!(report.scores.iter().all(|s| !s.is_predicted)),
            other => panic!("Expected a confidence report, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_image_stops_before_extraction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            Preprocessor::new(&crate::config::PreprocessingConfig::default()),
            Box::new(MeanExtractor {
                width: 4,
                calls: calls.clone(),
            }),
            Box::new(FixedClassifier {
                class_index: 0,
                probabilities: None,
            }),
        );

        match pipeline.run(b"not an image", true) {
            Err(InferenceError::ImageError(_)) => {}
            other => panic!("Expected ImageError, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_classifier_error_propagates() {
        let pipeline = pipeline(Box::new(FailingClassifier));
        match pipeline.run(&png_bytes(10, 10), true) {
            Err(InferenceError::ShapeMismatch { got, .. }) => assert_eq!(got, vec![1, 8]),
            other => panic!("Expected ShapeMismatch, got {other:?}"),
        }
    }
}
