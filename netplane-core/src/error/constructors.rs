//! Constructor methods and convenience functions for NetplaneError

use super::types::NetplaneError;

impl NetplaneError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use netplane_core::error::NetplaneError;
    ///
    /// let err = NetplaneError::configuration("lock.lease_ttl", "must be non-zero");
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        NetplaneError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for a named field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NetplaneError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        NetplaneError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        NetplaneError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        NetplaneError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        NetplaneError::Internal {
            message: message.into(),
        }
    }

    pub fn invalid_operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        NetplaneError::InvalidOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Router, agent or host could not be reached
    pub fn unavailable(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        NetplaneError::ResourceUnavailable {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    pub fn concurrent(resource: impl Into<String>, message: impl Into<String>) -> Self {
        NetplaneError::ConcurrentOperation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(topology: impl Into<String>, rule: impl Into<String>) -> Self {
        NetplaneError::Unsupported {
            topology: topology.into(),
            rule: rule.into(),
        }
    }

    pub fn vm_operation_failed(operation: impl Into<String>, details: impl Into<String>) -> Self {
        NetplaneError::VmOperationFailed {
            operation: operation.into(),
            details: details.into(),
        }
    }
}
