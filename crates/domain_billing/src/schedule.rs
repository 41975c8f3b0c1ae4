//! Billing State Mapper
//!
//! Translates policy billing attributes into processor price and
//! subscription-schedule parameters. Schedules built here always have
//! exactly two phases: the first covers the opening billing month and
//! anchors the first charge to the phase start; the second runs at the
//! same or a new price until the policy end date. Every phase restarts
//! the billing cycle at its own start (`billing_cycle_anchor =
//! phase_start`) so the anchor never drifts back to the original
//! subscription start when prices change mid-term.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{add_months, CustomerId, Money, PriceId, ProductId};

use crate::error::BillingError;
use crate::profile::{BillingFrequency, PolicyBillingProfile};

/// Recurrence interval for a processor price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceInterval {
    Month,
    Year,
}

/// Parameters for creating a processor price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSpec {
    pub product: ProductId,
    pub unit_amount: Money,
    /// Absent for one-time prices
    pub recurring: Option<PriceInterval>,
    pub nickname: String,
}

impl PriceSpec {
    /// Maps a billing frequency to price parameters
    ///
    /// `once_off` maps to a one-time price with no recurring component.
    pub fn for_frequency(
        frequency: BillingFrequency,
        unit_amount: Money,
        product: ProductId,
        nickname: impl Into<String>,
    ) -> Self {
        let recurring = match frequency {
            BillingFrequency::Monthly => Some(PriceInterval::Month),
            BillingFrequency::Yearly => Some(PriceInterval::Year),
            BillingFrequency::OnceOff => None,
        };
        Self {
            product,
            unit_amount,
            recurring,
            nickname: nickname.into(),
        }
    }

    /// As [`Self::for_frequency`], but only for frequencies that recur
    ///
    /// Subscription and schedule contexts cannot carry a one-time price, so
    /// `once_off` is rejected here rather than at the processor.
    pub fn recurring_for_frequency(
        frequency: BillingFrequency,
        unit_amount: Money,
        product: ProductId,
        nickname: impl Into<String>,
    ) -> Result<Self, BillingError> {
        if frequency == BillingFrequency::OnceOff {
            return Err(BillingError::InvalidFrequency(
                frequency.as_str().to_string(),
            ));
        }
        Ok(Self::for_frequency(frequency, unit_amount, product, nickname))
    }
}

/// Correlation metadata stamped on schedules, phases, and payment intents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMetadata {
    pub root_policy_id: String,
    pub root_policy_number: String,
}

/// Metadata key carrying the policy id on processor objects
pub const ROOT_POLICY_ID_KEY: &str = "rootPolicyId";
/// Metadata key carrying the policy number on processor objects
pub const ROOT_POLICY_NUMBER_KEY: &str = "rootPolicyNumber";
/// Metadata key carrying the payment record id on payment intents
pub const ROOT_PAYMENT_ID_KEY: &str = "rootPaymentId";

impl CorrelationMetadata {
    pub fn for_policy(profile: &PolicyBillingProfile) -> Self {
        Self {
            root_policy_id: profile.policy_id.to_string(),
            root_policy_number: profile.policy_number.clone(),
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (ROOT_POLICY_ID_KEY.to_string(), self.root_policy_id.clone()),
            (
                ROOT_POLICY_NUMBER_KEY.to_string(),
                self.root_policy_number.clone(),
            ),
        ])
    }
}

/// How the processor settles mid-cycle price changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    /// Absorb the difference silently
    None,
    /// Invoice the difference immediately
    AlwaysInvoice,
}

/// What anchors the billing cycle within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingAnchor {
    PhaseStart,
}

/// What happens when the final phase ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndBehavior {
    Cancel,
}

/// One time-bounded segment of a subscription schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePhaseSpec {
    pub price: PriceId,
    pub start_date: NaiveDate,
    /// Open-ended when absent
    pub end_date: Option<NaiveDate>,
    pub proration_behavior: ProrationBehavior,
    pub billing_cycle_anchor: BillingAnchor,
    pub metadata: HashMap<String, String>,
}

/// Parameters for creating a subscription schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub customer: CustomerId,
    pub start_date: NaiveDate,
    pub end_behavior: EndBehavior,
    /// Always exactly two phases
    pub phases: Vec<SchedulePhaseSpec>,
    pub metadata: HashMap<String, String>,
}

/// Replacement phases for an existing schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePhaseUpdate {
    pub phases: Vec<SchedulePhaseSpec>,
    pub proration_behavior: ProrationBehavior,
}

/// Builds the two-phase schedule for a policy
///
/// Phase 1 runs from `start_date` for one calendar month and anchors the
/// first invoice to the start date; phase 2 runs from there to the policy
/// end date (open-ended when the policy has none). `start_date` is a
/// parameter so alteration paths can backdate the schedule to the original
/// policy start.
pub fn schedule_for(
    profile: &PolicyBillingProfile,
    price: &PriceId,
    customer: &CustomerId,
    proration: ProrationBehavior,
    start_date: NaiveDate,
) -> Result<ScheduleSpec, BillingError> {
    if profile.billing_frequency == BillingFrequency::OnceOff {
        return Err(BillingError::InvalidFrequency(
            profile.billing_frequency.as_str().to_string(),
        ));
    }

    let metadata = CorrelationMetadata::for_policy(profile).to_map();
    let first_month_end = add_months(start_date, 1);

    let phases = vec![
        SchedulePhaseSpec {
            price: price.clone(),
            start_date,
            end_date: Some(first_month_end),
            proration_behavior: proration,
            billing_cycle_anchor: BillingAnchor::PhaseStart,
            metadata: metadata.clone(),
        },
        SchedulePhaseSpec {
            price: price.clone(),
            start_date: first_month_end,
            end_date: profile.end_date,
            proration_behavior: proration,
            billing_cycle_anchor: BillingAnchor::PhaseStart,
            metadata: metadata.clone(),
        },
    ];

    Ok(ScheduleSpec {
        customer: customer.clone(),
        start_date,
        end_behavior: EndBehavior::Cancel,
        phases,
        metadata,
    })
}

/// Builds the two-phase rewrite used when a linked policy's price changes
///
/// Phase 1 keeps the current price from the current phase start until
/// `split_date`; phase 2 runs the new price from `split_date` to the policy
/// end date. Used by the billing-day update and the generic alteration path
/// so phase boundaries stay aligned with the next billing occurrence.
pub fn reschedule_at(
    profile: &PolicyBillingProfile,
    current_price: &PriceId,
    new_price: &PriceId,
    current_phase_start: NaiveDate,
    split_date: NaiveDate,
    proration: ProrationBehavior,
) -> SchedulePhaseUpdate {
    let metadata = CorrelationMetadata::for_policy(profile).to_map();

    SchedulePhaseUpdate {
        phases: vec![
            SchedulePhaseSpec {
                price: current_price.clone(),
                start_date: current_phase_start,
                end_date: Some(split_date),
                proration_behavior: proration,
                billing_cycle_anchor: BillingAnchor::PhaseStart,
                metadata: metadata.clone(),
            },
            SchedulePhaseSpec {
                price: new_price.clone(),
                start_date: split_date,
                end_date: profile.end_date,
                proration_behavior: proration,
                billing_cycle_anchor: BillingAnchor::PhaseStart,
                metadata,
            },
        ],
        proration_behavior: proration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::{Currency, PolicyholderId, PolicyId};
    use crate::profile::AppData;

    fn profile(frequency: BillingFrequency) -> PolicyBillingProfile {
        PolicyBillingProfile {
            policy_id: PolicyId::new("pol_1"),
            policy_number: "P-1001".to_string(),
            policyholder_id: PolicyholderId::new("ph_1"),
            policyholder_name: "N Dlamini".to_string(),
            monthly_premium: Money::from_minor(25_00, Currency::ZAR),
            billing_frequency: frequency,
            billing_day: Some(15),
            start_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            end_date: Some(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
            claimed_against: false,
            app_data: AppData::default(),
        }
    }

    #[test]
    fn test_price_intervals() {
        let product = ProductId::new("prod_1");
        let amount = Money::from_minor(25_00, Currency::ZAR);

        let monthly =
            PriceSpec::for_frequency(BillingFrequency::Monthly, amount, product.clone(), "P-1001");
        assert_eq!(monthly.recurring, Some(PriceInterval::Month));

        let yearly =
            PriceSpec::for_frequency(BillingFrequency::Yearly, amount, product.clone(), "P-1001");
        assert_eq!(yearly.recurring, Some(PriceInterval::Year));

        let once = PriceSpec::for_frequency(BillingFrequency::OnceOff, amount, product, "P-1001");
        assert_eq!(once.recurring, None);
    }

    #[test]
    fn test_recurring_price_rejects_once_off() {
        let result = PriceSpec::recurring_for_frequency(
            BillingFrequency::OnceOff,
            Money::from_minor(25_00, Currency::ZAR),
            ProductId::new("prod_1"),
            "P-1001",
        );
        assert!(matches!(result, Err(BillingError::InvalidFrequency(_))));
    }

    #[test]
    fn test_schedule_has_exactly_two_phases() {
        let profile = profile(BillingFrequency::Monthly);
        let spec = schedule_for(
            &profile,
            &PriceId::new("price_1"),
            &CustomerId::new("cus_1"),
            ProrationBehavior::None,
            profile.start_date,
        )
        .unwrap();

        assert_eq!(spec.phases.len(), 2);
        assert_eq!(
            spec.phases[0].end_date,
            Some(NaiveDate::from_ymd_opt(2025, 2, 15).unwrap())
        );
        assert_eq!(spec.phases[1].start_date, spec.phases[0].end_date.unwrap());
        assert_eq!(spec.phases[1].end_date, profile.end_date);
        assert_eq!(spec.end_behavior, EndBehavior::Cancel);
        for phase in &spec.phases {
            assert_eq!(phase.billing_cycle_anchor, BillingAnchor::PhaseStart);
            assert_eq!(phase.metadata.get(ROOT_POLICY_ID_KEY).unwrap(), "pol_1");
            assert_eq!(
                phase.metadata.get(ROOT_POLICY_NUMBER_KEY).unwrap(),
                "P-1001"
            );
        }
    }

    #[test]
    fn test_schedule_open_ended_without_end_date() {
        let mut profile = profile(BillingFrequency::Yearly);
        profile.end_date = None;
        let spec = schedule_for(
            &profile,
            &PriceId::new("price_1"),
            &CustomerId::new("cus_1"),
            ProrationBehavior::AlwaysInvoice,
            profile.start_date,
        )
        .unwrap();
        assert_eq!(spec.phases[1].end_date, None);
    }

    #[test]
    fn test_schedule_rejects_once_off() {
        let profile = profile(BillingFrequency::OnceOff);
        let result = schedule_for(
            &profile,
            &PriceId::new("price_1"),
            &CustomerId::new("cus_1"),
            ProrationBehavior::None,
            profile.start_date,
        );
        assert!(matches!(result, Err(BillingError::InvalidFrequency(_))));
    }

    #[test]
    fn test_reschedule_splits_at_date() {
        let profile = profile(BillingFrequency::Monthly);
        let split = NaiveDate::from_ymd_opt(2025, 4, 20).unwrap();
        let update = reschedule_at(
            &profile,
            &PriceId::new("price_old"),
            &PriceId::new("price_new"),
            NaiveDate::from_ymd_opt(2025, 4, 15).unwrap(),
            split,
            ProrationBehavior::None,
        );

        assert_eq!(update.phases.len(), 2);
        assert_eq!(update.phases[0].price, PriceId::new("price_old"));
        assert_eq!(update.phases[0].end_date, Some(split));
        assert_eq!(update.phases[1].price, PriceId::new("price_new"));
        assert_eq!(update.phases[1].start_date, split);
        assert_eq!(update.phases[1].end_date, profile.end_date);
    }
}
