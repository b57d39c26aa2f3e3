use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and returns the handle `/metrics` renders from.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    metrics::describe_counter!(
        "mammoscan_predictions_total",
        "Classified uploads, by finding"
    );
    metrics::describe_counter!(
        "mammoscan_prediction_errors_total",
        "Uploads that failed anywhere in the pipeline"
    );
    metrics::describe_histogram!(
        "mammoscan_inference_seconds",
        metrics::Unit::Seconds,
        "Preprocess, feature extraction and classification time"
    );
    Ok(handle)
}
