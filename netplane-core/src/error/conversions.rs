//! Error conversion implementations for NetplaneError
//!
//! This module provides From trait implementations for converting
//! external error types into NetplaneError variants.

use super::types::NetplaneError;

// Storage error conversions
impl From<redb::TransactionError> for NetplaneError {
    fn from(err: redb::TransactionError) -> Self {
        NetplaneError::storage("transaction", err)
    }
}

impl From<redb::TableError> for NetplaneError {
    fn from(err: redb::TableError) -> Self {
        NetplaneError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for NetplaneError {
    fn from(err: redb::StorageError) -> Self {
        NetplaneError::storage("storage_operation", err)
    }
}

impl From<redb::DatabaseError> for NetplaneError {
    fn from(err: redb::DatabaseError) -> Self {
        NetplaneError::storage("database_operation", err)
    }
}

impl From<redb::CommitError> for NetplaneError {
    fn from(err: redb::CommitError) -> Self {
        NetplaneError::storage("commit", err)
    }
}

impl From<redb::Error> for NetplaneError {
    fn from(err: redb::Error) -> Self {
        NetplaneError::storage("redb", err)
    }
}

// Serialization error conversions
impl From<bincode::Error> for NetplaneError {
    fn from(err: bincode::Error) -> Self {
        NetplaneError::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for NetplaneError {
    fn from(err: serde_json::Error) -> Self {
        NetplaneError::serialization("json", err)
    }
}

impl From<toml::de::Error> for NetplaneError {
    fn from(err: toml::de::Error) -> Self {
        NetplaneError::ConfigurationError {
            component: "config_file".to_string(),
            message: format!("Invalid TOML: {}", err),
        }
    }
}

// System error conversions
impl From<std::io::Error> for NetplaneError {
    fn from(err: std::io::Error) -> Self {
        NetplaneError::IoError(Box::new(err))
    }
}

impl From<std::num::ParseIntError> for NetplaneError {
    fn from(err: std::num::ParseIntError) -> Self {
        NetplaneError::ConfigurationError {
            component: "numeric_value".to_string(),
            message: format!("Invalid numeric value: {}", err),
        }
    }
}

// Async/Task error conversions
impl From<tokio::task::JoinError> for NetplaneError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            NetplaneError::Internal {
                message: "Task was cancelled".to_string(),
            }
        } else if err.is_panic() {
            NetplaneError::Internal {
                message: "Task panicked".to_string(),
            }
        } else {
            NetplaneError::Internal {
                message: format!("Task failed: {}", err),
            }
        }
    }
}

impl From<tokio::time::error::Elapsed> for NetplaneError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        NetplaneError::Timeout {
            operation: "async_operation".to_string(),
            duration: std::time::Duration::from_secs(0),
        }
    }
}
