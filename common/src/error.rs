//! Error handling for the chorus runtime.

use thiserror::Error;

/// Error type shared by every chorus crate.
///
/// Variants carry a human readable message and, where an underlying library
/// error exists, the original error as `source` so the chain is preserved.
#[derive(Error, Debug)]
pub enum ChorusError {
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Communication failed: {message}")]
    Communication {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Task execution failed: {message}")]
    TaskExecution {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Protocol violation: {message}")]
    Protocol { message: String },

    #[error("Combine failed: {message}")]
    Combine { message: String },

    #[error("Serialization failed: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for chorus operations.
pub type Result<T> = std::result::Result<T, ChorusError>;

/// Error severity levels for categorizing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The failing call can be retried as a whole
    Medium,
    /// The call must be aborted but the worker can continue
    High,
    /// A programming error; the computation phase should be aborted
    Critical,
}

/// Error category for grouping related error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Peer links and transport
    Network,
    /// Encoding, decoding and combining payloads
    DataProcessing,
    /// Configuration and setup errors
    Configuration,
    /// API misuse and protocol violations
    Usage,
    /// Failures raised by application task code
    Application,
}

/// Diagnostics for deciding how to react to an error.
pub trait Diagnose {
    /// Get the error severity level.
    fn severity(&self) -> ErrorSeverity;

    /// Get the error category.
    fn category(&self) -> ErrorCategory;

    /// Whether retrying the whole enclosing operation may succeed.
    fn is_retryable(&self) -> bool;
}

impl ChorusError {
    /// Create a type mismatch error from the two element kinds involved.
    pub fn type_mismatch<E: ToString, F: ToString>(expected: E, found: F) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Create an invalid state error with a custom message.
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a communication error with a custom message.
    pub fn communication_error<S: Into<String>>(message: S) -> Self {
        Self::Communication {
            message: message.into(),
            source: None,
        }
    }

    /// Create a communication error with a custom message and source error.
    pub fn communication_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Communication {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a task execution error with a custom message.
    pub fn task_execution_error<S: Into<String>>(message: S) -> Self {
        Self::TaskExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a task execution error with a custom message and source error.
    pub fn task_execution_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::TaskExecution {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a combine error.
    pub fn combine_error<S: Into<String>>(message: S) -> Self {
        Self::Combine {
            message: message.into(),
        }
    }

    /// Create a serialization error with a custom message and source error.
    pub fn serialization_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with a custom message and source error.
    pub fn configuration_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl Diagnose for ChorusError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            ChorusError::Communication { .. } => ErrorSeverity::Medium,
            ChorusError::TaskExecution { .. } => ErrorSeverity::Medium,
            ChorusError::Serialization { .. } => ErrorSeverity::High,
            ChorusError::Configuration { .. } => ErrorSeverity::High,
            ChorusError::Combine { .. } => ErrorSeverity::High,
            ChorusError::TypeMismatch { .. } => ErrorSeverity::Critical,
            ChorusError::InvalidState { .. } => ErrorSeverity::Critical,
            ChorusError::Protocol { .. } => ErrorSeverity::Critical,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            ChorusError::Communication { .. } => ErrorCategory::Network,
            ChorusError::Serialization { .. }
            | ChorusError::Combine { .. }
            | ChorusError::TypeMismatch { .. } => ErrorCategory::DataProcessing,
            ChorusError::Configuration { .. } => ErrorCategory::Configuration,
            ChorusError::InvalidState { .. } | ChorusError::Protocol { .. } => {
                ErrorCategory::Usage
            }
            ChorusError::TaskExecution { .. } => ErrorCategory::Application,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChorusError::Communication { .. } | ChorusError::TaskExecution { .. }
        )
    }
}

/// Context helpers for mapping foreign errors into [`ChorusError`].
pub mod context {
    use super::*;

    /// Extension trait for adding context to Results.
    pub trait ErrorContext<T> {
        /// Wrap the error as a communication failure.
        fn with_communication_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;

        /// Wrap the error as a serialization failure.
        fn with_serialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;

        /// Wrap the error as a configuration failure.
        fn with_configuration_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String;
    }

    impl<T, E> ErrorContext<T> for std::result::Result<T, E>
    where
        E: Into<anyhow::Error>,
    {
        fn with_communication_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| ChorusError::communication_error_with_source(f(), e.into()))
        }

        fn with_serialization_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| ChorusError::serialization_error_with_source(f(), e.into()))
        }

        fn with_configuration_context<F>(self, f: F) -> Result<T>
        where
            F: FnOnce() -> String,
        {
            self.map_err(|e| ChorusError::configuration_error_with_source(f(), e.into()))
        }
    }
}

pub use context::ErrorContext;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::error::Error;

    #[test]
    fn test_error_creation() {
        let err = ChorusError::type_mismatch("Double", "Int32");
        assert!(matches!(err, ChorusError::TypeMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "Type mismatch: expected Double, found Int32"
        );

        let err = ChorusError::communication_error_with_source(
            "peer 3 unreachable",
            anyhow!("connection reset"),
        );
        assert!(matches!(err, ChorusError::Communication { .. }));
    }

    #[test]
    fn test_diagnose_trait() {
        let comm = ChorusError::communication_error("link down");
        assert_eq!(comm.severity(), ErrorSeverity::Medium);
        assert_eq!(comm.category(), ErrorCategory::Network);
        assert!(comm.is_retryable());

        let state = ChorusError::invalid_state("submit before start");
        assert_eq!(state.severity(), ErrorSeverity::Critical);
        assert_eq!(state.category(), ErrorCategory::Usage);
        assert!(!state.is_retryable());

        let mismatch = ChorusError::type_mismatch("Int64", "Byte");
        assert_eq!(mismatch.category(), ErrorCategory::DataProcessing);
        assert!(!mismatch.is_retryable());
    }

    #[test]
    fn test_error_context_extension() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let mapped = result.with_communication_context(|| "dial rank 1".to_string());
        assert!(matches!(
            mapped.unwrap_err(),
            ChorusError::Communication { .. }
        ));

        let result: std::result::Result<(), anyhow::Error> = Err(anyhow!("bad json"));
        let mapped = result.with_configuration_context(|| "parse config".to_string());
        assert!(matches!(
            mapped.unwrap_err(),
            ChorusError::Configuration { .. }
        ));
    }

    #[test]
    fn test_error_chaining() {
        let err = ChorusError::serialization_error_with_source("encode frame", anyhow!("eof"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("Serialization failed"));
    }
}
