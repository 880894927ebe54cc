//! Error types for Mailflow

use thiserror::Error;

/// Main error type for Mailflow
///
/// All routing errors are scoped to a single recipient or derived envelope;
/// one recipient's failure never aborts processing of other recipients of
/// the same message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Handler fault: {0}")]
    Handler(String),

    #[error("Loop guard exceeded: {0}")]
    LoopGuard(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Mailflow
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string, used when reporting through the
    /// `error` event point.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Resolution(_) => "RESOLUTION_ERROR",
            Error::AccessDenied(_) => "ACCESS_DENIED",
            Error::Handler(_) => "HANDLER_FAULT",
            Error::LoopGuard(_) => "LOOP_GUARD_EXCEEDED",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Queue(_) => "QUEUE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error should surface as a per-recipient delivery
    /// failure rather than bubbling up to the caller.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Error::Resolution(_)
                | Error::AccessDenied(_)
                | Error::LoopGuard(_)
                | Error::Storage(_)
                | Error::Queue(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::AccessDenied("x".into()).code(), "ACCESS_DENIED");
        assert_eq!(Error::LoopGuard("x".into()).code(), "LOOP_GUARD_EXCEEDED");
    }

    #[test]
    fn test_delivery_failure_classification() {
        assert!(Error::AccessDenied("not a member".into()).is_delivery_failure());
        assert!(!Error::Config("bad list".into()).is_delivery_failure());
    }
}
