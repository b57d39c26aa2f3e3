use serde::Serialize;

/// Classes the classifier was trained on, in class-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Finding {
    Benign,
    Malignant,
    Normal,
}

/// How a finding is presented: green for reassuring, red for alarming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Reassuring,
    Alarming,
}

pub const UNKNOWN_LABEL: &str = "Unknown";

impl Finding {
    pub const ALL: [Finding; 3] = [Finding::Benign, Finding::Malignant, Finding::Normal];

    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn label(self) -> &'static str {
        match self {
            Finding::Benign => "Benign",
            Finding::Malignant => "Malignant",
            Finding::Normal => "Normal",
        }
    }

    pub fn verdict(self) -> &'static str {
        match self {
            Finding::Benign => "Benign (non-cancerous)",
            Finding::Malignant => "Malignant (cancerous)",
            Finding::Normal => "Normal",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            Finding::Malignant => Tone::Alarming,
            Finding::Benign | Finding::Normal => Tone::Reassuring,
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Finding::Benign => {
                "Benign tumors generally do not spread and are not aggressive. Keep up regular check-ups."
            }
            Finding::Malignant => {
                "Malignant tumors can spread quickly. Consult a specialist as soon as possible."
            }
            Finding::Normal => {
                "No sign of abnormality was found. Routine screening is still recommended."
            }
        }
    }

    /// One-line description for the educational section of the page.
    pub fn summary(self) -> &'static str {
        match self {
            Finding::Benign => "Non-cancerous tumor that does not spread. Still needs monitoring.",
            Finding::Malignant => "Cancerous tumor. Needs prompt medical treatment.",
            Finding::Normal => "No indication of abnormality.",
        }
    }
}

pub fn label_for(finding: Option<Finding>) -> &'static str {
    finding.map(Finding::label).unwrap_or(UNKNOWN_LABEL)
}

/// Rounds to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    pub label: &'static str,
    /// Probability in percent, rounded to two decimals.
    pub percent: f64,
    pub display: String,
    pub is_predicted: bool,
    /// Progress bar fill in [0, 1].
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceReport {
    pub scores: Vec<ClassScore>,
}

impl ConfidenceReport {
    /// Pairs class labels with `probabilities` by index. Extra entries on
    /// either side are dropped.
    pub fn from_probabilities(probabilities: &[f64], predicted_label: &str) -> Self {
        let scores = Finding::ALL
            .iter()
            .zip(probabilities)
            .map(|(finding, &p)| {
                let percent = round2(p * 100.0);
                ClassScore {
                    label: finding.label(),
                    percent,
                    display: format!("{:.2}%", percent),
                    is_predicted: finding.label() == predicted_label,
                    fraction: (percent / 100.0).clamp(0.0, 1.0),
                }
            })
            .collect();
        Self { scores }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Confidence {
    Report(ConfidenceReport),
    /// The classifier cannot produce probabilities.
    Unsupported,
    /// The user unticked the confidence checkbox.
    Hidden,
}

/// Outcome of one pass through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub class_index: i64,
    pub finding: Option<Finding>,
    pub label: &'static str,
    pub confidence: Confidence,
    pub preview: String,
    pub inference_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_index() {
        assert_eq!(Finding::from_index(0), Some(Finding::Benign));
        assert_eq!(Finding::from_index(1), Some(Finding::Malignant));
        assert_eq!(Finding::from_index(2), Some(Finding::Normal));
        assert_eq!(Finding::from_index(3), None);
        assert_eq!(Finding::from_index(-1), None);
    }

    #[test]
    fn test_unknown_label() {
        assert_eq!(label_for(None), "Unknown");
        assert_eq!(label_for(Some(Finding::Normal)), "Normal");
    }

    #[test]
    fn test_tone() {
        assert_eq!(Finding::Malignant.tone(), Tone::Alarming);
        assert_eq!(Finding::Benign.tone(), Tone::Reassuring);
        assert_eq!(Finding::Normal.tone(), Tone::Reassuring);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(12.344), 12.34);
        assert_eq!(round2(12.346), 12.35);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn test_confidence_report() {
        let report = ConfidenceReport::from_probabilities(&[0.1234, 0.8, 0.0766], "Malignant");
        let displays: Vec<&str> = report.scores.iter().map(|s| s.display.as_str()).collect();
        assert_eq!(displays, vec!["12.34%", "80.00%", "7.66%"]);

        let predicted: Vec<bool> = report.scores.iter().map(|s| s.is_predicted).collect();
        assert_eq!(predicted, vec![false, true, false]);
        assert!((report.scores[1].fraction - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_report_truncates_to_shorter_side() {
        let short = ConfidenceReport::from_probabilities(&[0.5, 0.5], "Benign");
        assert_eq!(short.scores.len(), 2);

        let long = ConfidenceReport::from_probabilities(&[0.1, 0.2, 0.3, 0.4], "Unknown");
        assert_eq!(long.scores.len(), 3);
        assert!(long.scores.iter().all(|s| !s.is_predicted));
    }

    #[test]
    fn test_confidence_serializes_with_kind_tag() {
        let json = serde_json::to_value(Confidence::Unsupported).unwrap();
        assert_eq!(json["kind"], "unsupported");
    }
}
