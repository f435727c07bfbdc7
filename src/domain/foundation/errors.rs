//! Error types for the domain layer.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Caller errors
    InvalidArgument,
    NotFound,

    // Type and payload errors
    TypeNotFound,
    SerializationFailed,

    // Delivery errors
    HandlerFailed,

    // Infrastructure errors
    StorageError,
    BrokerError,
    ConfigurationError,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::TypeNotFound => "TYPE_NOT_FOUND",
            ErrorCode::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorCode::HandlerFailed => "HANDLER_FAILED",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::BrokerError => "BROKER_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Standard domain error with code, message, and optional details.
#[derive(Debug, Clone)]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl DomainError {
    /// Creates a new domain error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Creates an invalid argument error naming the offending argument.
    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message).with_detail("argument", argument)
    }

    /// Creates a storage error from any underlying failure.
    pub fn storage(context: &str, err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::StorageError, format!("{}: {}", context, err))
    }

    /// Adds a detail to the error.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for DomainError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_displays_code_and_message() {
        let err = DomainError::new(ErrorCode::TypeNotFound, "Type not found");
        assert_eq!(format!("{}", err), "[TYPE_NOT_FOUND] Type not found");
    }

    #[test]
    fn invalid_argument_records_argument_name() {
        let err = DomainError::invalid_argument("event", "event type is not registered");
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.details.get("argument"), Some(&"event".to_string()));
    }

    #[test]
    fn storage_error_prefixes_context() {
        let err = DomainError::storage("Failed to add outbox record", "connection reset");
        assert_eq!(err.code, ErrorCode::StorageError);
        assert_eq!(err.message, "Failed to add outbox record: connection reset");
    }

    #[test]
    fn error_code_display_formats_correctly() {
        assert_eq!(format!("{}", ErrorCode::HandlerFailed), "HANDLER_FAILED");
        assert_eq!(format!("{}", ErrorCode::ConfigurationError), "CONFIGURATION_ERROR");
    }
}
