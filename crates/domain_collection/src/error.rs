//! Collection domain errors
//!
//! Every upstream failure is wrapped with the operation that caused it and
//! the ids involved, so a failed reconciliation can be diagnosed from the
//! error alone. Non-fatal conditions are not errors; handlers return
//! [`crate::engine::Outcome::Skipped`] for those.

use core_kernel::{PolicyId, PortError};
use domain_billing::BillingError;
use thiserror::Error;

/// Errors that can occur while reconciling an event
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A billing calculation or mapping failed
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// The policy has no subscription/schedule linkage where one is required
    #[error("Policy {policy_id} has no usable billing linkage: {detail}")]
    MissingLinkage { policy_id: PolicyId, detail: String },

    /// A processor object lacks required correlation metadata
    #[error("{object} {id} lacks required metadata: {detail}")]
    MissingMetadata {
        object: &'static str,
        id: String,
        detail: String,
    },

    /// The event cannot be applied in the current billing state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A call to one of the external services failed
    #[error("Upstream call {operation} failed ({context}): {source}")]
    Upstream {
        operation: &'static str,
        context: String,
        #[source]
        source: PortError,
    },
}

impl ReconcileError {
    pub fn missing_linkage(policy_id: &PolicyId, detail: impl Into<String>) -> Self {
        ReconcileError::MissingLinkage {
            policy_id: policy_id.clone(),
            detail: detail.into(),
        }
    }

    pub fn missing_metadata(
        object: &'static str,
        id: impl ToString,
        detail: impl Into<String>,
    ) -> Self {
        ReconcileError::MissingMetadata {
            object,
            id: id.to_string(),
            detail: detail.into(),
        }
    }

    pub fn invalid_state(detail: impl Into<String>) -> Self {
        ReconcileError::InvalidState(detail.into())
    }
}

/// Wraps a port failure with its operation name and context ids
///
/// Intended for `map_err`:
///
/// ```rust,ignore
/// self.payments
///     .retrieve_subscription(&id)
///     .await
///     .map_err(upstream("retrieve_subscription", &id))?;
/// ```
pub fn upstream(
    operation: &'static str,
    context: impl ToString,
) -> impl FnOnce(PortError) -> ReconcileError {
    let context = context.to_string();
    move |source| ReconcileError::Upstream {
        operation,
        context,
        source,
    }
}
