//! Inbound event taxonomy
//!
//! Events arrive already authenticated and routed; the transport layer is a
//! collaborator. Dispatch is by enum variant, one typed handler per kind,
//! so there is no stringly-typed branching past this module's parsers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use core_kernel::{Money, PaymentMethodRecordId, PolicyId};
use domain_billing::Invoice;

use crate::error::ReconcileError;
use crate::objects::{Charge, Dispute, PaymentIntent, PaymentRecord, SubscriptionSchedule};

/// A billing-relevant field of the policy record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingField {
    StartDate,
    EndDate,
    MonthlyPremium,
    BillingDay,
}

impl BillingField {
    /// Picks the billing-relevant fields out of an update payload's keys
    pub fn filter_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<BillingField> {
        keys.into_iter()
            .filter_map(|key| match key {
                "start_date" => Some(BillingField::StartDate),
                "end_date" => Some(BillingField::EndDate),
                "monthly_premium" => Some(BillingField::MonthlyPremium),
                "billing_day" => Some(BillingField::BillingDay),
                _ => None,
            })
            .collect()
    }
}

/// The alteration hooks the engine recognizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterationHook {
    UpdateBillingFrequency,
    CollectOutstandingPremium,
    RenewPolicy,
    CollectAdhocPayment,
    UpdatePolicyCover,
    /// Any other hook key; takes the generic cover-update path
    #[serde(untagged)]
    Other(String),
}

impl AlterationHook {
    pub fn from_key(key: &str) -> Self {
        match key {
            "update_billing_frequency" => AlterationHook::UpdateBillingFrequency,
            "collect_outstanding_premium" => AlterationHook::CollectOutstandingPremium,
            "renew_policy" => AlterationHook::RenewPolicy,
            "collect_adhoc_payment" => AlterationHook::CollectAdhocPayment,
            "update_policy_cover" => AlterationHook::UpdatePolicyCover,
            other => AlterationHook::Other(other.to_string()),
        }
    }
}

/// An applied alteration package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterationPackage {
    pub hook: AlterationHook,
    /// The requester-supplied payload; shape depends on the hook
    #[serde(default)]
    pub input: Value,
}

/// The payload of a `collect_adhoc_payment` alteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdhocPaymentRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub amount: Money,
}

impl AlterationPackage {
    /// Parses the ad-hoc payment payload out of the package input
    pub fn adhoc_request(&self) -> Result<AdhocPaymentRequest, ReconcileError> {
        serde_json::from_value(self.input.clone()).map_err(|e| {
            ReconcileError::invalid_state(format!("malformed ad-hoc payment payload: {e}"))
        })
    }
}

/// Events originating from the Policy Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyEvent {
    PaymentMethodAssigned {
        policy_id: PolicyId,
        payment_method_id: PaymentMethodRecordId,
    },
    PaymentCreated {
        policy_id: PolicyId,
        payment: PaymentRecord,
    },
    PaymentMethodRemoved {
        policy_id: PolicyId,
    },
    AlterationPackageApplied {
        policy_id: PolicyId,
        package: AlterationPackage,
    },
    PolicyCancelled {
        policy_id: PolicyId,
    },
    PolicyExpired {
        policy_id: PolicyId,
    },
    PolicyLapsed {
        policy_id: PolicyId,
    },
    PolicyUpdated {
        policy_id: PolicyId,
        changed_fields: Vec<BillingField>,
    },
}

/// Events originating from the Payment Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorEvent {
    InvoiceCreated(Invoice),
    InvoicePaid(Invoice),
    InvoicePaymentFailed(Invoice),
    InvoiceVoided(Invoice),
    InvoiceMarkedUncollectible(Invoice),
    ChargeRefunded(Charge),
    ChargeDisputeFundsWithdrawn(Dispute),
    SubscriptionScheduleUpdated(SubscriptionSchedule),
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentFailed(PaymentIntent),
}
