//! Error taxonomy for job execution and validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every foreseeable failure maps to one of these kinds. The HTTP layer
/// turns kinds into semantic status codes; the worker uses
/// `is_transient` to decide between retry (nack) and terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Validation (rejected at the door, never enqueued)
    TooLarge,
    Empty,
    WrongExtension,
    NotPdf,
    CorruptSignature,
    SuspectedMalicious,
    InvalidFilename,

    // Transient (worker nacks, job retried with backoff)
    BlobIo,
    StoreUnavailable,
    OcrTransient,

    // Permanent (worker acks terminal failed)
    Unparseable,
    UnsupportedPdfVariant,
    ExtractorBug,

    // Lifecycle
    DeadlineExceeded,
    ExhaustedRetries,
    Cancelled,

    // API-surface conditions
    NotFound,
    RateLimited,

    // Catch-all for unexpected panics, reported opaquely
    ServerError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TooLarge => "too_large",
            ErrorKind::Empty => "empty",
            ErrorKind::WrongExtension => "wrong_extension",
            ErrorKind::NotPdf => "not_pdf",
            ErrorKind::CorruptSignature => "corrupt_signature",
            ErrorKind::SuspectedMalicious => "suspected_malicious",
            ErrorKind::InvalidFilename => "invalid_filename",
            ErrorKind::BlobIo => "blob_io",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::OcrTransient => "ocr_transient",
            ErrorKind::Unparseable => "unparseable",
            ErrorKind::UnsupportedPdfVariant => "unsupported_pdf_variant",
            ErrorKind::ExtractorBug => "extractor_bug",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::ExhaustedRetries => "exhausted_retries",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
        }
    }

    /// Transient kinds go back to the queue; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::BlobIo | ErrorKind::StoreUnavailable | ErrorKind::OcrTransient
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::TooLarge
                | ErrorKind::Empty
                | ErrorKind::WrongExtension
                | ErrorKind::NotPdf
                | ErrorKind::CorruptSignature
                | ErrorKind::SuspectedMalicious
                | ErrorKind::InvalidFilename
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "too_large" => Ok(ErrorKind::TooLarge),
            "empty" => Ok(ErrorKind::Empty),
            "wrong_extension" => Ok(ErrorKind::WrongExtension),
            "not_pdf" => Ok(ErrorKind::NotPdf),
            "corrupt_signature" => Ok(ErrorKind::CorruptSignature),
            "suspected_malicious" => Ok(ErrorKind::SuspectedMalicious),
            "invalid_filename" => Ok(ErrorKind::InvalidFilename),
            "blob_io" => Ok(ErrorKind::BlobIo),
            "store_unavailable" => Ok(ErrorKind::StoreUnavailable),
            "ocr_transient" => Ok(ErrorKind::OcrTransient),
            "unparseable" => Ok(ErrorKind::Unparseable),
            "unsupported_pdf_variant" => Ok(ErrorKind::UnsupportedPdfVariant),
            "extractor_bug" => Ok(ErrorKind::ExtractorBug),
            "deadline_exceeded" => Ok(ErrorKind::DeadlineExceeded),
            "exhausted_retries" => Ok(ErrorKind::ExhaustedRetries),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "not_found" => Ok(ErrorKind::NotFound),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "server_error" => Ok(ErrorKind::ServerError),
            _ => Err(format!("Invalid error kind: '{}'", s)),
        }
    }
}

/// Error payload stored on a failed job and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    /// Pipeline stage that raised, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
            details: None,
        }
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "{} at {}: {}", self.kind, stage, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ErrorKind::BlobIo.is_transient());
        assert!(ErrorKind::OcrTransient.is_transient());
        assert!(!ErrorKind::Unparseable.is_transient());
        assert!(!ErrorKind::TooLarge.is_transient());
    }

    #[test]
    fn validation_classification() {
        assert!(ErrorKind::SuspectedMalicious.is_validation());
        assert!(!ErrorKind::ExtractorBug.is_validation());
    }

    #[test]
    fn kind_round_trips() {
        for kind in [
            ErrorKind::TooLarge,
            ErrorKind::OcrTransient,
            ErrorKind::ExhaustedRetries,
            ErrorKind::ServerError,
        ] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn job_error_display_includes_stage() {
        let err = JobError::new(ErrorKind::Unparseable, "no text layer").at_stage("extract_text");
        assert_eq!(
            err.to_string(),
            "unparseable at extract_text: no text layer"
        );
    }
}
