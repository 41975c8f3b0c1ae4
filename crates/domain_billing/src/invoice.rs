//! Processor invoice value objects
//!
//! The slice of the processor's invoice shape the reconciliation flows
//! consume. Amounts arrive in minor units and are carried as [`Money`];
//! timestamps stay epoch seconds until the payment adapter converts them
//! to the reporting timezone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{CustomerId, InvoiceId, LineItemId, Money, SubscriptionId};

/// Processor invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

/// One line item on a processor invoice
///
/// Negative amounts are credits (premium decreases settled mid-cycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: LineItemId,
    pub amount: Money,
    pub description: Option<String>,
}

/// A processor invoice as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub customer: Option<CustomerId>,
    pub subscription: Option<SubscriptionId>,
    pub status: InvoiceStatus,
    pub amount_due: Money,
    /// Epoch seconds at which the processor created the invoice
    pub created: i64,
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Message from the processor's last failed finalization attempt
    pub last_finalization_error: Option<String>,
}

/// Metadata marker the processor sets on manually raised invoices
pub const CREATED_BY_KEY: &str = "createdBy";
/// Value of [`CREATED_BY_KEY`] for invoices raised outside subscriptions
pub const CREATED_BY_MANUAL: &str = "manual";

impl Invoice {
    /// Whether this invoice was raised manually rather than by a subscription
    pub fn is_manual(&self) -> bool {
        self.metadata
            .get(CREATED_BY_KEY)
            .is_some_and(|v| v == CREATED_BY_MANUAL)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
