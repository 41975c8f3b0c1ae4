//! Proration & Refund Calculator
//!
//! Pure calculations over billing frequency, dates, and charge history.
//! Nothing here talks to either external service; the engine feeds in the
//! already-fetched values and acts on the results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use core_kernel::{months_between, ChargeId, Money};

use crate::error::BillingError;
use crate::profile::BillingFrequency;

/// Whole billing months left between today and the policy end date
///
/// When the billing day has already passed (or is today), the processor has
/// billed the current cycle, so one month is subtracted from the raw
/// calendar difference. Fails when the policy has no billing day: the
/// calculation is meaningless without one.
pub fn months_remaining(
    end_date: NaiveDate,
    billing_day: Option<u32>,
    today: NaiveDate,
) -> Result<i32, BillingError> {
    use chrono::Datelike;

    let billing_day = billing_day.ok_or(BillingError::MissingBillingDay)?;
    let mut months = months_between(today, end_date);
    if billing_day <= today.day() {
        months -= 1;
    }
    Ok(months)
}

/// Premium still owed for the remainder of the term
pub fn outstanding_premium(months_remaining: i32, monthly_premium: Money) -> Money {
    monthly_premium.times(months_remaining.max(0) as u32)
}

/// Whether today falls inside the cooling-off window after inception
pub fn within_cooling_off(start_date: NaiveDate, today: NaiveDate, window_days: u32) -> bool {
    let elapsed = (today - start_date).num_days();
    elapsed >= 0 && elapsed < i64::from(window_days)
}

/// Whether a cancellation is eligible for a pro-rata refund
///
/// Only yearly-paid policies with no claim against them, past the
/// cooling-off window, qualify. Monthly policies settle at the next cycle;
/// claimed and cooling-off policies follow different compliance paths.
pub fn should_prorate_cancellation(
    frequency: BillingFrequency,
    claimed_against: bool,
    within_cooling_off: bool,
) -> bool {
    frequency == BillingFrequency::Yearly && !claimed_against && !within_cooling_off
}

/// A charge considered as a refund source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeCandidate {
    pub charge_id: ChargeId,
    pub amount: Money,
    pub created: DateTime<Utc>,
    pub succeeded: bool,
    pub refunded: bool,
}

/// A refund to issue against a specific charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundDecision {
    pub charge_id: ChargeId,
    pub amount: Money,
}

/// Selects the charge to refund when a yearly premium decreases mid-term
///
/// The processor returns the price difference as account credit (a negative
/// invoice total); the policyholder is owed cash instead. Partial refunds
/// against smaller charges are disallowed, so the most recent successful,
/// unrefunded charge covering the full credit is chosen. A positive invoice
/// total means the premium increased and no refund is due. No eligible
/// charge is a logged condition, not an error.
pub fn refund_for_downgrade(
    latest_invoice_total: Money,
    charges: &[ChargeCandidate],
) -> Option<RefundDecision> {
    if !latest_invoice_total.is_negative() {
        return None;
    }
    let owed = latest_invoice_total.abs();

    let eligible = charges
        .iter()
        .filter(|c| c.succeeded && !c.refunded && c.amount >= owed)
        .max_by_key(|c| c.created);

    match eligible {
        Some(charge) => Some(RefundDecision {
            charge_id: charge.charge_id.clone(),
            amount: owed,
        }),
        None => {
            info!(owed = %owed, "no charge large enough to refund downgrade credit");
            None
        }
    }
}
