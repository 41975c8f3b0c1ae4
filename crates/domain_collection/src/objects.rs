//! External service object models
//!
//! The slices of the Payment Service and Policy Service objects the engine
//! consumes. These are deliberately narrower than the real wire shapes;
//! adapters map down to them.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{
    ChargeId, CustomerId, InvoiceId, Money, PaymentIntentId, PaymentMethodRecordId,
    PaymentRecordId, PolicyId, PolicyholderId, PriceId, ProcessorPaymentMethodId, ScheduleId,
    SubscriptionId,
};
use domain_billing::proration::ChargeCandidate;
use domain_billing::schedule::PriceInterval;
use domain_billing::PaymentStatus;

/// A processor customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub default_payment_method: Option<ProcessorPaymentMethodId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A processor price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: PriceId,
    pub unit_amount: Money,
    pub recurring: Option<PriceInterval>,
}

/// Processor subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Canceled,
}

/// One priced item on a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: Price,
}

/// A processor subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer: CustomerId,
    pub status: SubscriptionStatus,
    pub items: Vec<SubscriptionItem>,
    pub default_payment_method: Option<ProcessorPaymentMethodId>,
    pub latest_invoice: Option<InvoiceId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Subscription {
    /// The single price this engine's subscriptions carry
    pub fn current_price(&self) -> Option<&Price> {
        self.items.first().map(|item| &item.price)
    }
}

/// Processor subscription schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    NotStarted,
    Active,
    Completed,
    Released,
    Canceled,
}

impl ScheduleStatus {
    /// Whether the schedule can still be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ScheduleStatus::NotStarted | ScheduleStatus::Active)
    }
}

/// One phase of a live subscription schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePhase {
    pub price: PriceId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// A processor subscription schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSchedule {
    pub id: ScheduleId,
    pub customer: CustomerId,
    pub status: ScheduleStatus,
    /// Set once the schedule has started its subscription
    pub subscription: Option<SubscriptionId>,
    pub start_date: NaiveDate,
    pub phases: Vec<SchedulePhase>,
    /// The phase covering the current instant, when started
    pub current_phase: Option<SchedulePhase>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Processor charge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

/// A processor charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: ChargeId,
    pub customer: Option<CustomerId>,
    pub invoice: Option<InvoiceId>,
    pub amount: Money,
    pub amount_refunded: Money,
    pub status: ChargeStatus,
    pub refunded: bool,
    /// Epoch seconds
    pub created: i64,
}

impl Charge {
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
    }

    /// This charge as a refund-source candidate
    pub fn as_candidate(&self) -> ChargeCandidate {
        ChargeCandidate {
            charge_id: self.id.clone(),
            amount: self.amount,
            created: self.created_at(),
            succeeded: self.status == ChargeStatus::Succeeded,
            refunded: self.refunded,
        }
    }
}

/// A processor dispute, as delivered on funds withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub charge: ChargeId,
    pub reason: Option<String>,
}

/// Processor payment intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Processing,
    Succeeded,
    RequiresPaymentMethod,
    Canceled,
}

/// A processor payment intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub amount: Money,
    pub status: PaymentIntentStatus,
    pub last_payment_error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A processor payment method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorPaymentMethod {
    pub id: ProcessorPaymentMethodId,
    pub customer: Option<CustomerId>,
}

/// A payment method record on the Policy Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyPaymentMethod {
    pub id: PaymentMethodRecordId,
    pub policyholder_id: PolicyholderId,
    /// The processor payment method this record wraps, when captured
    pub processor_payment_method_id: Option<ProcessorPaymentMethodId>,
}

/// A payment record as read back from the Policy Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentRecordId,
    pub policy_id: PolicyId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub description: String,
    pub external_reference: Option<String>,
}

impl PaymentRecord {
    /// Whether this record was created by the reconciliation engine
    ///
    /// Engine-created records always carry a processor object reference.
    pub fn is_engine_generated(&self) -> bool {
        self.external_reference.is_some()
    }
}
