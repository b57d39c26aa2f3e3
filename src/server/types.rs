use crate::diagnosis::{Confidence, Diagnosis, Finding, Tone};
use crate::error::InferenceError;
use crate::pipeline::Pipeline;
use crate::server::views::Views;
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_AGE: u8 = 30;
pub const MIN_AGE: u8 = 1;
pub const MAX_AGE: u8 = 120;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shared Application State
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub views: Views,
    pub metrics: Option<PrometheusHandle>,
    pub max_upload_bytes: usize,
}

// --- Form input ---

/// An uploaded file as received; empty uploads are dropped while parsing.
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Raw multipart field values, echoed back into the form on every render.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FormValues {
    pub patient_name: String,
    pub patient_age: String,
    pub exam_date: String,
    pub show_confidence: bool,
}

impl FormValues {
    pub fn initial(today: NaiveDate) -> Self {
        Self {
            patient_name: String::new(),
            patient_age: DEFAULT_AGE.to_string(),
            exam_date: today.format(DATE_FORMAT).to_string(),
            show_confidence: true,
        }
    }

    /// Validates the patient fields. Blank age or date fall back to the defaults.
    pub fn patient(&self, today: NaiveDate) -> Result<Patient, InferenceError> {
        let age = match self.patient_age.trim() {
            "" => DEFAULT_AGE,
            raw => raw
                .parse::<u8>()
                .ok()
                .filter(|age| (MIN_AGE..=MAX_AGE).contains(age))
                .ok_or_else(|| {
                    InferenceError::InvalidForm(format!(
                        "age must be a whole number between {MIN_AGE} and {MAX_AGE}, got '{raw}'"
                    ))
                })?,
        };

        let exam_date = match self.exam_date.trim() {
            "" => today,
            raw => NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
                InferenceError::InvalidForm(format!(
                    "exam date must look like YYYY-MM-DD, got '{raw}'"
                ))
            })?,
        };

        Ok(Patient {
            name: self.patient_name.trim().to_string(),
            age,
            exam_date,
        })
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Patient {
    pub name: String,
    pub age: u8,
    pub exam_date: NaiveDate,
}

// --- Page view model ---

#[derive(Serialize)]
pub struct ClassInfo {
    pub label: &'static str,
    pub summary: &'static str,
}

#[derive(Serialize)]
pub struct ResultView {
    pub file_name: String,
    pub class_index: i64,
    pub label: &'static str,
    pub verdict: &'static str,
    pub tone: Option<Tone>,
    pub advice: Option<&'static str>,
    pub preview: String,
    pub confidence: Confidence,
    pub inference_ms: String,
}

impl ResultView {
    pub fn new(file_name: String, diagnosis: Diagnosis) -> Self {
        let finding = diagnosis.finding;
        Self {
            file_name,
            class_index: diagnosis.class_index,
            label: diagnosis.label,
            verdict: finding.map(Finding::verdict).unwrap_or(diagnosis.label),
            tone: finding.map(Finding::tone),
            advice: finding.map(Finding::advice),
            preview: diagnosis.preview,
            confidence: diagnosis.confidence,
            inference_ms: format!("{:.1}", diagnosis.inference_ms),
        }
    }
}

#[derive(Serialize)]
pub struct PageView {
    pub form: FormValues,
    pub patient: Option<Patient>,
    pub result: Option<ResultView>,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub classes: Vec<ClassInfo>,
    pub max_upload_mb: usize,
}

impl PageView {
    pub fn new(form: FormValues, max_upload_bytes: usize) -> Self {
        Self {
            form,
            patient: None,
            result: None,
            warning: None,
            error: None,
            classes: Finding::ALL
                .iter()
                .map(|finding| ClassInfo {
                    label: finding.label(),
                    summary: finding.summary(),
                })
                .collect(),
            max_upload_mb: max_upload_bytes / (1024 * 1024),
        }
    }
}
