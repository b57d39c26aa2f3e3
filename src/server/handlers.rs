use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::InferenceError;
use crate::preprocessing::image::check_extension;
use crate::server::types::*;

const UPLOAD_PROMPT: &str = "Please upload an image first.";

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

pub async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, InferenceError> {
    let mut page = PageView::new(FormValues::initial(today()), state.max_upload_bytes);
    page.warning = Some(UPLOAD_PROMPT.to_string());
    Ok(Html(state.views.render_page(&page)?))
}

fn form_error(error: MultipartError, limit_bytes: usize) -> InferenceError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InferenceError::UploadTooLarge { limit_bytes }
    } else {
        InferenceError::InvalidForm(error.body_text())
    }
}

/// Reads every multipart field. Unknown fields are ignored.
async fn read_form(
    mut multipart: Multipart,
    values: &mut FormValues,
    limit_bytes: usize,
) -> Result<Option<Upload>, InferenceError> {
    // Browsers omit unticked checkboxes
    values.show_confidence = false;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, limit_bytes))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| form_error(e, limit_bytes))?;
                if !bytes.is_empty() {
                    upload = Some(Upload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "patient_name" | "patient_age" | "exam_date" | "show_confidence" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| form_error(e, limit_bytes))?;
                match name.as_str() {
                    "patient_name" => values.patient_name = text,
                    "patient_age" => values.patient_age = text,
                    "exam_date" => values.exam_date = text,
                    _ => values.show_confidence = true,
                }
            }
            _ => {}
        }
    }

    Ok(upload)
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Html<String>), InferenceError> {
    let today = today();
    let mut values = FormValues::initial(today);
    let outcome = classify_upload(&state, multipart, &mut values, today).await;

    let mut page = PageView::new(values, state.max_upload_bytes);
    let status = match outcome {
        Ok((patient, result)) => {
            page.patient = Some(patient);
            page.result = Some(result);
            StatusCode::OK
        }
        Err(InferenceError::MissingUpload) => {
            page.warning = Some(UPLOAD_PROMPT.to_string());
            StatusCode::BAD_REQUEST
        }
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!(error = %e, "prediction request failed");
            } else {
                warn!(error = %e, "prediction request rejected");
            }
            page.error = Some(e.to_string());
            status
        }
    };

    Ok((status, Html(state.views.render_page(&page)?)))
}

async fn classify_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    values: &mut FormValues,
    today: NaiveDate,
) -> Result<(Patient, ResultView), InferenceError> {
    // 1. Form fields
    let multipart = multipart.map_err(|e| InferenceError::InvalidForm(e.body_text()))?;
    let upload = read_form(multipart, values, state.max_upload_bytes).await?;
    let patient = values.patient(today)?;
    let upload = upload.ok_or(InferenceError::MissingUpload)?;
    check_extension(&upload.file_name)?;
    info!(
        file_name = %upload.file_name,
        bytes = upload.bytes.len(),
        "received mammogram"
    );

    // 2. Inference, off the async runtime
    let pipeline = state.pipeline.clone();
    let show_confidence = values.show_confidence;
    let bytes = upload.bytes;
    let diagnosis = tokio::task::spawn_blocking(move || pipeline.run(&bytes, show_confidence))
        .await
        .map_err(|e| InferenceError::TaskFailed(e.to_string()))??;

    Ok((patient, ResultView::new(upload.file_name, diagnosis)))
}
