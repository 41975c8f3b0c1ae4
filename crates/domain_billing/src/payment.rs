//! Payment Record Adapter
//!
//! Converts processor invoice lines, refunds, and ad-hoc collection
//! requests into the Policy Service's payment record shapes. Payment
//! records are created once and then only ever patched by status; the
//! update shape is deliberately narrow.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use core_kernel::{local_timestamp, ChargeId, Money, PaymentRecordId, PolicyId};

use crate::invoice::InvoiceLine;

/// Policy Service payment record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Submitted,
    Processing,
    Failed,
    Successful,
    Cancelled,
}

/// Policy Service payment record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Premium,
    PremiumRefund,
    Reversal,
    ClaimPayout,
    Other,
}

/// Classification of premium payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumType {
    Recurring,
    Arrears,
    AdHoc,
    ProRata,
    CoverPeriod,
}

/// What the Policy Service should do about a failed payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    BlockRetry,
    BlockPaymentMethod,
    AllowRetry,
}

/// A payment record to create on the Policy Service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub policy_id: PolicyId,
    /// Negative for refunds and credits
    pub amount: Money,
    pub status: PaymentStatus,
    pub description: String,
    pub payment_type: PaymentType,
    pub premium_type: Option<PremiumType>,
    /// Processor object id this record mirrors (line item, charge, ...)
    pub external_reference: Option<String>,
    /// Civil date of the payment in the reporting timezone
    pub payment_date: NaiveDate,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl PaymentDraft {
    /// Whether this record was produced by the reconciliation engine itself
    ///
    /// Engine-created records always reference a processor object; the
    /// payment-created handler uses this to avoid re-collecting its own
    /// records through payment intents.
    pub fn is_engine_generated(&self) -> bool {
        self.external_reference.is_some()
    }
}

/// A status patch for an existing payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub payment_id: PaymentRecordId,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<FailureAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl PaymentUpdate {
    pub fn successful(payment_id: PaymentRecordId, finalized_at: DateTime<Utc>) -> Self {
        Self {
            payment_id,
            status: PaymentStatus::Successful,
            failure_reason: None,
            failure_action: None,
            finalized_at: Some(finalized_at),
        }
    }

    pub fn failed(
        payment_id: PaymentRecordId,
        reason: impl Into<String>,
        action: FailureAction,
    ) -> Self {
        Self {
            payment_id,
            status: PaymentStatus::Failed,
            failure_reason: Some(reason.into()),
            failure_action: Some(action),
            finalized_at: None,
        }
    }
}

/// Derives a payment record from one invoice line item
///
/// Zero amount-due means the processor settled the invoice at creation, so
/// the record is already `Successful` and finalized at the invoice created
/// time; otherwise it starts `Pending`. Credits (negative lines) become
/// premium refunds without a premium classification; ordinary lines are
/// recurring premium. The payment date is the invoice creation instant in
/// the reporting timezone.
pub fn payment_for_invoice_line(
    policy_id: &PolicyId,
    line: &InvoiceLine,
    invoice_created: i64,
    amount_due: Money,
    tz: Tz,
) -> PaymentDraft {
    let created_utc = local_timestamp(invoice_created, chrono_tz::UTC).with_timezone(&Utc);
    let settled = amount_due.is_zero();

    let (payment_type, premium_type) = if line.amount.is_negative() {
        (PaymentType::PremiumRefund, None)
    } else {
        (PaymentType::Premium, Some(PremiumType::Recurring))
    };

    PaymentDraft {
        policy_id: policy_id.clone(),
        amount: line.amount,
        status: if settled {
            PaymentStatus::Successful
        } else {
            PaymentStatus::Pending
        },
        description: line
            .description
            .clone()
            .unwrap_or_else(|| "Premium".to_string()),
        payment_type,
        premium_type,
        external_reference: Some(line.id.to_string()),
        payment_date: local_timestamp(invoice_created, tz).date_naive(),
        finalized_at: settled.then_some(created_utc),
    }
}

/// Derives a reversal record from a charge refund
///
/// The amount is the negated refunded amount; the record is immediately
/// successful and finalized at the charge creation time.
pub fn payment_for_charge_refund(
    policy_id: &PolicyId,
    charge_id: &ChargeId,
    amount_refunded: Money,
    charge_created: i64,
    tz: Tz,
) -> PaymentDraft {
    PaymentDraft {
        policy_id: policy_id.clone(),
        amount: -amount_refunded,
        status: PaymentStatus::Successful,
        description: "Refund".to_string(),
        payment_type: PaymentType::Reversal,
        premium_type: None,
        external_reference: Some(charge_id.to_string()),
        payment_date: local_timestamp(charge_created, tz).date_naive(),
        finalized_at: Some(
            local_timestamp(charge_created, chrono_tz::UTC).with_timezone(&Utc),
        ),
    }
}

/// Derives a pending ad-hoc collection record from an alteration payload
///
/// Type and description are carried verbatim from the requester; no
/// external reference exists until a payment intent is raised for it.
pub fn adhoc_payment(
    policy_id: &PolicyId,
    kind: &str,
    description: &str,
    amount: Money,
    today: NaiveDate,
) -> PaymentDraft {
    PaymentDraft {
        policy_id: policy_id.clone(),
        amount,
        status: PaymentStatus::Pending,
        description: format!("{kind} - {description}"),
        payment_type: PaymentType::Other,
        premium_type: Some(PremiumType::AdHoc),
        external_reference: None,
        payment_date: today,
        finalized_at: None,
    }
}
