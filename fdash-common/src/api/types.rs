//! Document processing request/response types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ========================================
// Lifecycle
// ========================================

/// Server-side lifecycle of an uploaded document
///
/// Closed set: any other label in a status response is a parse error rather
/// than an implicitly non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Uploaded, processing not started
    Draft,
    /// Job running on the server
    Processing,
    /// Job finished, results available
    Completed,
    /// Job failed, no results
    Failed,
}

impl LifecycleStatus {
    /// Polling stops once a terminal status is observed
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Processing => "processing",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// Upload / Status
// ========================================

/// `POST /documents/upload` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// `GET /documents/{id}/status` response
///
/// `progress` and `stage` are display metadata; the client carries them
/// without interpreting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: LifecycleStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ========================================
// Results
// ========================================

/// `GET /documents/{id}/metrics` response
///
/// The well-known fund metrics are typed; anything else the service computes
/// is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinancialMetrics {
    #[serde(default)]
    pub nav: Option<f64>,
    #[serde(default)]
    pub irr: Option<f64>,
    #[serde(default)]
    pub tvpi: Option<f64>,
    #[serde(default)]
    pub dpi: Option<f64>,
    #[serde(default)]
    pub moic: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Overall compliance verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Pass,
    Warning,
    Fail,
}

/// One evaluated compliance rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub rule: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /documents/{id}/compliance` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub overall_status: ComplianceStatus,
    #[serde(default)]
    pub checks: Vec<ComplianceCheck>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ========================================
// Export
// ========================================

/// Document export format for `GET /documents/{id}/export`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Xlsx,
    Json,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "json" => Ok(ExportFormat::Json),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown export format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// Error Response Types
// ========================================

/// Error body returned by the service on non-2xx responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorBody {
    /// Extract the human-readable message from a raw error body
    ///
    /// Falls back to the raw text when the body is not the JSON error shape.
    pub fn message_from(raw: &str) -> String {
        match serde_json::from_str::<ErrorBody>(raw) {
            Ok(ErrorBody {
                detail: Some(detail),
            }) => detail,
            _ => raw.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_terminal_set() {
        assert!(!LifecycleStatus::Draft.is_terminal());
        assert!(!LifecycleStatus::Processing.is_terminal());
        assert!(LifecycleStatus::Completed.is_terminal());
        assert!(LifecycleStatus::Failed.is_terminal());
    }

    #[test]
    fn test_unknown_lifecycle_label_rejected() {
        let result = serde_json::from_str::<StatusResponse>(r#"{"status":"done"}"#);
        assert!(result.is_err(), "unknown labels must not parse");
    }

    #[test]
    fn test_status_response_optional_fields() {
        let parsed: StatusResponse =
            serde_json::from_str(r#"{"status":"processing","progress":40,"stage":"ocr"}"#)
                .unwrap();

        assert_eq!(parsed.status, LifecycleStatus::Processing);
        assert_eq!(parsed.progress, Some(40.0));
        assert_eq!(parsed.stage.as_deref(), Some("ocr"));
        assert!(parsed.error_message.is_none());
    }

    #[test]
    fn test_metrics_keep_unknown_fields() {
        let parsed: FinancialMetrics =
            serde_json::from_str(r#"{"nav":1250000.5,"irr":0.12,"carry":0.2}"#).unwrap();

        assert_eq!(parsed.nav, Some(1250000.5));
        assert_eq!(parsed.extra.get("carry"), Some(&Value::from(0.2)));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert!("docx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_error_body_message() {
        assert_eq!(
            ErrorBody::message_from(r#"{"detail":"Unsupported file type"}"#),
            "Unsupported file type"
        );
        assert_eq!(ErrorBody::message_from("Bad Gateway\n"), "Bad Gateway");
    }
}
