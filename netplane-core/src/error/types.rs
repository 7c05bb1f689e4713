//! Core error types for netplane
//!
//! This module contains the main NetplaneError enum with all error variants
//! and associated type aliases for Result types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used by callers to decide between retrying,
/// re-fetching and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad input or an illegal request; never retried automatically
    Validation,
    /// Router, agent or store could not be reached in time
    ResourceUnavailable,
    /// Another actor changed the resource first
    Conflict,
    /// Serialization failures, unknown dispatchers and internal bugs
    Fatal,
}

/// Comprehensive error type for netplane operations
#[derive(Error, Debug)]
pub enum NetplaneError {
    // Validation
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("No transition for {entity} from state {from} on event {event}")]
    NoTransition {
        entity: String,
        from: String,
        event: String,
    },

    #[error("Rule category '{rule}' is not supported by the {topology} topology")]
    Unsupported { topology: String, rule: String },

    #[error("Invalid operation '{operation}': {reason}")]
    InvalidOperation { operation: String, reason: String },

    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Resource availability
    #[error("Resource unavailable: {resource_type} - {message}")]
    ResourceUnavailable {
        resource_type: String,
        message: String,
    },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Conflicts
    #[error("Concurrent operation on {resource}: {message}")]
    ConcurrentOperation { resource: String, message: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    // Lookups
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Not initialized: {component}")]
    NotInitialized { component: String },

    // Fatal
    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unknown job dispatcher: {name}")]
    UnknownDispatcher { name: String },

    #[error("VM operation '{operation}' failed: {details}")]
    VmOperationFailed { operation: String, details: String },

    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Multiple errors in {context}: {}", format_errors(.errors))]
    Multiple {
        context: String,
        errors: Vec<NetplaneError>,
    },
}

impl NetplaneError {
    /// Classify the error into one of the four handling classes
    pub fn category(&self) -> ErrorCategory {
        match self {
            NetplaneError::Validation { .. }
            | NetplaneError::NoTransition { .. }
            | NetplaneError::Unsupported { .. }
            | NetplaneError::InvalidOperation { .. }
            | NetplaneError::ConfigurationError { .. }
            | NetplaneError::NotFound { .. } => ErrorCategory::Validation,

            NetplaneError::ResourceUnavailable { .. }
            | NetplaneError::Timeout { .. }
            | NetplaneError::Storage { .. }
            | NetplaneError::IoError(_) => ErrorCategory::ResourceUnavailable,

            NetplaneError::ConcurrentOperation { .. } | NetplaneError::AlreadyExists { .. } => {
                ErrorCategory::Conflict
            }

            NetplaneError::Serialization { .. }
            | NetplaneError::UnknownDispatcher { .. }
            | NetplaneError::VmOperationFailed { .. }
            | NetplaneError::NotInitialized { .. }
            | NetplaneError::Internal { .. } => ErrorCategory::Fatal,

            NetplaneError::Multiple { errors, .. } => errors
                .iter()
                .map(NetplaneError::category)
                .find(|c| *c != ErrorCategory::ResourceUnavailable)
                .unwrap_or(ErrorCategory::ResourceUnavailable),
        }
    }

    /// Only resource availability problems are worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::ResourceUnavailable
    }
}

// Helper function to format multiple errors
pub fn format_errors(errors: &[NetplaneError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, NetplaneError>;
pub type NetplaneResult<T> = std::result::Result<T, NetplaneError>;
