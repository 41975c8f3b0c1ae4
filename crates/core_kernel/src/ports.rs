//! Ports and Adapters Infrastructure
//!
//! The reconciliation engine talks to two external collaborators through
//! port traits: the Policy Service (system of record for policies and
//! payment records) and the Payment Service (the card processor). This
//! module provides the foundational types those port traits build on.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │           Reconciliation Engine              │
//! └──────────────────────────────────────────────┘
//!            │                      │
//!            ▼                      ▼
//! ┌───────────────────┐  ┌─────────────────────┐
//! │ PolicyServicePort │  │ PaymentServicePort  │
//! └───────────────────┘  └─────────────────────┘
//!            ▲                      ▲
//!            │                      │
//!   REST adapter / mock    REST adapter / mock
//! ```
//!
//! Each domain defines its own port trait extending the [`DomainPort`]
//! marker; adapters implement the traits against the real services or as
//! in-memory mocks for testing.

use std::fmt;
use thiserror::Error;

/// Error type for port operations
///
/// Provides a unified error type that all port implementations must use,
/// ensuring consistent error handling across adapters for both services.
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The request was rejected as invalid by the remote service
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The operation conflicts with the remote object's current state
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Connection to the remote service failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation timed out
    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Rate limit exceeded on the remote API
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The remote service is unavailable
    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    /// A payload could not be mapped to or from the wire format
    #[error("Transformation error: {message}")]
    Transformation { message: String },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        PortError::Validation {
            message: message.into(),
        }
    }

    /// Creates a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        PortError::Conflict {
            message: message.into(),
        }
    }

    /// Creates a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a Transformation error
    pub fn transformation(message: impl Into<String>) -> Self {
        PortError::Transformation {
            message: message.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PortError::Connection { .. }
                | PortError::Timeout { .. }
                | PortError::RateLimited { .. }
                | PortError::ServiceUnavailable { .. }
        )
    }

    /// Returns true if this error indicates the entity was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound { .. })
    }
}

/// Marker trait for all domain ports
///
/// All port traits should extend this marker to ensure they are
/// thread-safe and can be used in async contexts.
pub trait DomainPort: Send + Sync + 'static {}
