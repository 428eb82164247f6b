use thiserror::Error;

use crate::resource::{DurationParseError, ObjectKey};
use crate::store::StoreError;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

/// Errors surfaced to whoever invokes reconciliation.
///
/// Evaluation and parameter failures never show up here: they are recorded in
/// the resource status instead. Only problems the invoker should back off on
/// are returned.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Store error: {source}")]
    Store {
        code: u16,
        #[source]
        source: StoreError,
    },

    #[error("[E{code:04}] Invalid recalculation interval {value:?}: {source}")]
    Schedule {
        code: u16,
        value: String,
        #[source]
        source: DurationParseError,
    },

    #[error("[E{code:04}] Status update for {key} conflicted {attempts} times")]
    Conflict {
        code: u16,
        key: ObjectKey,
        attempts: u32,
    },

    #[error("[E{code:04}] Reconciliation of {key} was cancelled")]
    Cancelled { code: u16, key: ObjectKey },
}

impl ControllerError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::CONFIG_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn schedule(value: impl Into<String>, source: DurationParseError) -> Self {
        Self::Schedule {
            code: ErrorCode::SCHEDULE_INVALID_INTERVAL,
            value: value.into(),
            source,
        }
    }

    pub fn conflict(key: ObjectKey, attempts: u32) -> Self {
        Self::Conflict {
            code: ErrorCode::INVOCATION_CONFLICT_RETRIES_EXHAUSTED,
            key,
            attempts,
        }
    }

    pub fn cancelled(key: ObjectKey) -> Self {
        Self::Cancelled {
            code: ErrorCode::INVOCATION_CANCELLED,
            key,
        }
    }

    /// Attach a source error (only meaningful for configuration errors)
    pub fn with_source(mut self, err: impl std::error::Error + Send + Sync + 'static) -> Self {
        if let Self::Config { ref mut source, .. } = self {
            *source = Some(Box::new(err));
        }
        self
    }

    /// Get the numeric error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Store { code, .. }
            | Self::Schedule { code, .. }
            | Self::Conflict { code, .. }
            | Self::Cancelled { code, .. } => *code,
        }
    }

    /// Whether the store rejected a write because of a concurrent update
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_conflict())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether retrying the invocation later can succeed without user action
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_retryable() || source.is_conflict(),
            Self::Conflict { .. } => true,
            Self::Config { .. } | Self::Schedule { .. } | Self::Cancelled { .. } => false,
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::NotFound(_) => ErrorCode::STORE_NOT_FOUND,
            StoreError::Conflict(_) => ErrorCode::STORE_CONFLICT,
            StoreError::Unavailable(_) => ErrorCode::STORE_UNAVAILABLE,
            StoreError::Serialization(_) => ErrorCode::STORE_SERIALIZATION_ERROR,
            StoreError::Io(_) => ErrorCode::STORE_GENERIC,
        };
        Self::Store { code, source: err }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_rendering() {
        let err = ControllerError::conflict(ObjectKey::new("default", "pi"), 4);
        assert_eq!(err.code(), ErrorCode::INVOCATION_CONFLICT_RETRIES_EXHAUSTED);
        assert_eq!(
            err.to_string(),
            "[E4012] Status update for default/pi conflicted 4 times"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_store_conversion_keeps_conflict() {
        let err: ControllerError = StoreError::conflict("resource version 3 is stale").into();
        assert!(err.is_conflict());
        assert_eq!(err.code(), ErrorCode::STORE_CONFLICT);
    }

    #[test]
    fn test_schedule_error_is_not_retryable() {
        let err = ControllerError::schedule("ten seconds", DurationParseError::Invalid("ten seconds".into()));
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("[E5002]"));
    }

    #[test]
    fn test_config_source_is_attached() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ControllerError::config_with_code(ErrorCode::CONFIG_NOT_FOUND, "no file")
            .with_source(io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
