//! Error types for TALLY operations

use std::time::Duration;
use thiserror::Error;

/// Errors from the remote generator.
///
/// These are the only errors a cache read ever surfaces to its caller.
/// Callers are expected to tell them apart: `RateLimited` warrants a
/// cooldown, `Unauthorized` a re-authentication, everything else a retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Rate limited{}", format_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Service error{}: {message}", format_status(.status))]
    ServiceError {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status {})", s),
        None => String::new(),
    }
}

impl GenerationError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn service(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ServiceError {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Backoff hint carried by a rate-limit response.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether retrying the same request later could succeed.
    ///
    /// Authorization and schema failures will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ServiceError { .. })
    }

    /// Short machine-readable kind, used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceError { .. } => "service_error",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Tier I/O failures.
///
/// Always absorbed by the cache and demoted to a miss; never returned from
/// a cache read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization error: {reason}")]
    Deserialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all TALLY errors.
#[derive(Debug, Clone, Error)]
pub enum TallyError {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for TALLY operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================
