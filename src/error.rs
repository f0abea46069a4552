//! Error types for the edgequake-docscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocScanError`] — **Fatal**: the analysis of one file cannot complete
//!   (unknown id, unsupported format, retries exhausted, schema violation).
//!   Returned as `Err(DocScanError)` from [`crate::DocumentAnalyzer::process`].
//!
//! * [`BackendError`] — **Per-attempt**: one call to the vision endpoint
//!   failed. The [`crate::pipeline::llm::AnalysisClient`] retries these and
//!   only surfaces the last one, as text, inside
//!   [`DocScanError::AnalysisFailed`].
//!
//! Cache faults have no error type at all: the cache degrades to a miss.

use crate::output::AnalysisEnvelope;
use std::fmt;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docscan library.
#[derive(Debug, Error)]
pub enum DocScanError {
    // ── Retrieval errors ──────────────────────────────────────────────────
    /// The file source has no file with this id.
    #[error("File not found: '{file_id}'")]
    NotFound { file_id: String },

    /// The file exceeds the configured size bound.
    #[error("File '{file_id}' is too large: {size_bytes} bytes (limit {limit_bytes} bytes)")]
    TooLarge {
        file_id: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    /// HTTP retrieval failed for a reason other than 404.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// HTTP retrieval exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The declared media type is not one the dispatcher handles.
    #[error("Unsupported media type '{media_type}'")]
    UnsupportedFormat { media_type: String },

    /// The media type is supported but the payload could not be converted.
    #[error("Conversion of '{file_name}' failed: {detail}")]
    ConversionFailed { file_name: String, detail: String },

    // ── Analysis errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every attempt against the vision endpoint failed.
    #[error("Analysis failed after {attempts} attempts: {last_error}")]
    AnalysisFailed { attempts: u32, last_error: String },

    /// The model output contains no parseable JSON object.
    #[error("Could not parse model response: {0}")]
    Parse(String),

    /// The JSON object violates the response schema.
    #[error("Model response failed validation: {}", format_violations(.violations))]
    Validation { violations: Vec<Violation> },

    // ── Persistence errors ────────────────────────────────────────────────
    /// Analysis succeeded but saving it did not.
    ///
    /// The computed envelope is carried along so the caller does not lose
    /// the analysis.
    #[error("Analysis of '{}' succeeded but saving failed: {detail}", .envelope.file_id)]
    Persistence {
        detail: String,
        envelope: Box<AnalysisEnvelope>,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`DocScanError`] variants.
///
/// Useful for callers that map failures onto status codes or exit codes
/// without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TooLarge,
    Retrieval,
    Conversion,
    Analysis,
    Parse,
    Validation,
    Persistence,
    Config,
    Internal,
}

impl DocScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::DownloadFailed { .. } | Self::DownloadTimeout { .. } => ErrorKind::Retrieval,
            Self::UnsupportedFormat { .. } | Self::ConversionFailed { .. } => {
                ErrorKind::Conversion
            }
            Self::ProviderNotConfigured { .. } | Self::AnalysisFailed { .. } => {
                ErrorKind::Analysis
            }
            Self::Parse(_) => ErrorKind::Parse,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn conversion(file_name: &str, detail: impl Into<String>) -> Self {
        Self::ConversionFailed {
            file_name: file_name.to_string(),
            detail: detail.into(),
        }
    }
}

/// One schema rule broken by the model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON path of the offending field, e.g. `entities[2].type`.
    pub field: String,
    /// Human-readable rule that was broken.
    pub rule: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.rule)
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single failed call to the vision endpoint.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The provider returned an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider answered with nothing usable.
    #[error("empty response from model")]
    EmptyResponse,

    /// The call did not finish within the per-attempt timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_lists_every_violation() {
        let e = DocScanError::Validation {
            violations: vec![
                Violation::new("title", "must be a non-empty string"),
                Violation::new("entities[0].type", "must be one of person, location"),
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("title: must be a non-empty string"), "got: {msg}");
        assert!(msg.contains("entities[0].type"), "got: {msg}");
    }

    #[test]
    fn too_large_display() {
        let e = DocScanError::TooLarge {
            file_id: "scan.pdf".into(),
            size_bytes: 60,
            limit_bytes: 50,
        };
        let msg = e.to_string();
        assert!(msg.contains("scan.pdf"));
        assert!(msg.contains("limit 50"));
    }

    #[test]
    fn unsupported_format_names_media_type() {
        let e = DocScanError::UnsupportedFormat {
            media_type: "application/zip".into(),
        };
        assert!(e.to_string().contains("application/zip"));
        assert_eq!(e.kind(), ErrorKind::Conversion);
    }

    #[test]
    fn analysis_failed_carries_last_error() {
        let e = DocScanError::AnalysisFailed {
            attempts: 3,
            last_error: BackendError::EmptyResponse.to_string(),
        };
        assert!(e.to_string().contains("3 attempts"));
        assert!(e.to_string().contains("empty response"));
        assert_eq!(e.kind(), ErrorKind::Analysis);
    }

    #[test]
    fn kinds_cover_retrieval_failures() {
        let e = DocScanError::DownloadTimeout {
            url: "https://files.local/x".into(),
            secs: 5,
        };
        assert_eq!(e.kind(), ErrorKind::Retrieval);
        assert_eq!(
            DocScanError::NotFound { file_id: "x".into() }.kind(),
            ErrorKind::NotFound
        );
    }
}
