//! Unified error types for the attribution engine.
//!
//! Error codes:
//! - VALID_001-003: Validation errors (batch rejected, nothing persisted)
//! - STORE_001: Storage unavailable (retried with backoff, then surfaced)
//! - REFRESH_001: Refresh exceeded the caller's deadline
//! - ROLLUP_001: Rollup dependency incomplete for the requested range
//! - INTERNAL_001: Internal errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorCode {
    /// VALID_001: One or more records failed validation
    InvalidRecord,
    /// VALID_002: Batch exceeds record or byte limits
    BatchTooLarge,
    /// VALID_003: Payload could not be parsed
    InvalidFormat,
}

impl ValidationErrorCode {
    /// Get the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRecord => "VALID_001",
            Self::BatchTooLarge => "VALID_002",
            Self::InvalidFormat => "VALID_003",
        }
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BatchTooLarge => 413,
            Self::InvalidRecord | Self::InvalidFormat => 400,
        }
    }
}

/// Coarse error category, used for propagation and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unavailable,
    Timeout,
    Inconsistent,
    Internal,
}

/// Unified error type for the attribution engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input; the whole batch is rejected.
    #[error("[{code}] {message}")]
    Validation {
        code: &'static str,
        message: String,
        http_status: u16,
        details: Vec<String>,
    },

    /// Storage unreachable.
    #[error("[STORE_001] storage unavailable: {0}")]
    Unavailable(String),

    /// Refresh exceeded the caller's deadline.
    #[error("[REFRESH_001] refresh timed out: {0}")]
    Timeout(String),

    /// A rollup stage found its dependency incomplete for the range.
    #[error("[ROLLUP_001] inconsistent rollup state: {0}")]
    Inconsistent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("[INTERNAL_001] internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error with code.
    pub fn validation(code: ValidationErrorCode, msg: impl Into<String>) -> Self {
        Self::Validation {
            code: code.code(),
            message: msg.into(),
            http_status: code.http_status(),
            details: Vec::new(),
        }
    }

    /// Create a VALID_001 error listing every offending record.
    pub fn invalid_records(details: Vec<String>) -> Self {
        let code = ValidationErrorCode::InvalidRecord;
        Self::Validation {
            code: code.code(),
            message: format!("{} record(s) failed validation", details.len()),
            http_status: code.http_status(),
            details,
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => ErrorKind::Validation,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Inconsistent(_) => ErrorKind::Inconsistent,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only storage outages are worth retrying; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable)
    }

    /// Get the stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Serialization(_) => ValidationErrorCode::InvalidFormat.code(),
            Self::Unavailable(_) => "STORE_001",
            Self::Timeout(_) => "REFRESH_001",
            Self::Inconsistent(_) => "ROLLUP_001",
            Self::Internal(_) => "INTERNAL_001",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { http_status, .. } => *http_status,
            Self::Serialization(_) => 400,
            Self::Unavailable(_) => 503,
            Self::Timeout(_) => 504,
            Self::Inconsistent(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    /// Per-record validation failures, if any.
    pub fn details(&self) -> &[String] {
        match self {
            Self::Validation { details, .. } => details,
            _ => &[],
        }
    }
}
