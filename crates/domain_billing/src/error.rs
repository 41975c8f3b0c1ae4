//! Billing domain errors

use core_kernel::{MoneyError, TemporalError};
use thiserror::Error;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// The billing frequency is not valid in this context
    #[error("Invalid billing frequency for this operation: {0}")]
    InvalidFrequency(String),

    /// Month arithmetic requires a billing day and the policy has none
    #[error("Policy has no billing day set")]
    MissingBillingDay,

    /// A schedule rewrite requires an end date and the policy has none
    #[error("Policy has no end date set")]
    MissingEndDate,

    /// The invoice payment mapping metadata could not be parsed
    #[error("Malformed invoice payment mapping: {0}")]
    MalformedMapping(String),

    /// Money arithmetic failed
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// Date arithmetic failed
    #[error(transparent)]
    Temporal(#[from] TemporalError),
}
