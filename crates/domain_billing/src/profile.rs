//! Policy billing profile and processor linkage
//!
//! The Policy Service owns the billing profile; the engine reads it and
//! writes back only the linkage subset of `app_data`. Linkage writes always
//! go through [`AppData::apply`] so every transition produces a complete,
//! merged `app_data` object rather than an ad hoc patch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use core_kernel::{CustomerId, Money, PolicyId, PolicyholderId, ScheduleId, SubscriptionId};

/// How often a policy is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    Monthly,
    Yearly,
    OnceOff,
}

impl BillingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingFrequency::Monthly => "monthly",
            BillingFrequency::Yearly => "yearly",
            BillingFrequency::OnceOff => "once_off",
        }
    }
}

/// The policy attributes the billing engine consumes
///
/// Read-only to the engine apart from the linkage fields inside `app_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBillingProfile {
    pub policy_id: PolicyId,
    pub policy_number: String,
    pub policyholder_id: PolicyholderId,
    pub policyholder_name: String,
    /// Premium per month, regardless of billing frequency
    pub monthly_premium: Money,
    pub billing_frequency: BillingFrequency,
    /// Day of month the processor bills on, when set
    pub billing_day: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub claimed_against: bool,
    #[serde(default)]
    pub app_data: AppData,
}

impl PolicyBillingProfile {
    /// Premium per billing cycle: the processor prices are per-cycle totals,
    /// so yearly policies carry twelve months of premium per cycle.
    pub fn cycle_premium(&self) -> Money {
        match self.billing_frequency {
            BillingFrequency::Yearly => self.monthly_premium.times(12),
            BillingFrequency::Monthly | BillingFrequency::OnceOff => self.monthly_premium,
        }
    }

    pub fn linkage(&self) -> BillingLinkage {
        self.app_data.linkage()
    }

    pub fn linkage_state(&self) -> LinkageState {
        self.app_data.linkage().state()
    }
}

/// The `app_data` blob stored against a policy
///
/// The engine owns the three linkage keys; any other keys belong to other
/// modules and must survive linkage writes unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<CustomerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_id: Option<SubscriptionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_schedule_id: Option<ScheduleId>,
    /// Keys owned by other modules, carried through verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppData {
    /// The linkage currently recorded in this app_data
    pub fn linkage(&self) -> BillingLinkage {
        BillingLinkage {
            customer_id: self.stripe_customer_id.clone(),
            subscription_id: self.stripe_subscription_id.clone(),
            schedule_id: self.stripe_subscription_schedule_id.clone(),
        }
    }

    /// Merges a linkage into this app_data, preserving foreign keys
    ///
    /// This is the single write path for linkage state. The returned value is
    /// the complete app_data object to send to the Policy Service.
    pub fn apply(&self, linkage: &BillingLinkage) -> AppData {
        AppData {
            stripe_customer_id: linkage.customer_id.clone(),
            stripe_subscription_id: linkage.subscription_id.clone(),
            stripe_subscription_schedule_id: linkage.schedule_id.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// The processor-side ids a policy is linked to
///
/// At most one subscription/schedule pair is live at a time; re-linking
/// requires cancelling the old pair first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingLinkage {
    pub customer_id: Option<CustomerId>,
    pub subscription_id: Option<SubscriptionId>,
    pub schedule_id: Option<ScheduleId>,
}

/// Position of a policy in the linkage state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageState {
    /// No schedule or subscription ids
    Unlinked,
    /// Schedule id present, subscription may not have started
    Scheduled,
    /// Subscription id present
    Subscribed,
}

impl BillingLinkage {
    /// A fresh linkage holding only a schedule (subscription not yet started)
    pub fn scheduled(customer_id: CustomerId, schedule_id: ScheduleId) -> Self {
        Self {
            customer_id: Some(customer_id),
            subscription_id: None,
            schedule_id: Some(schedule_id),
        }
    }

    /// A linkage with both a started subscription and its schedule
    pub fn subscribed(
        customer_id: CustomerId,
        subscription_id: SubscriptionId,
        schedule_id: Option<ScheduleId>,
    ) -> Self {
        Self {
            customer_id: Some(customer_id),
            subscription_id: Some(subscription_id),
            schedule_id,
        }
    }

    /// Linkage after cancellation: the customer survives, the pair is gone
    pub fn detached(&self) -> Self {
        Self {
            customer_id: self.customer_id.clone(),
            subscription_id: None,
            schedule_id: None,
        }
    }

    pub fn with_subscription(&self, subscription_id: SubscriptionId) -> Self {
        Self {
            customer_id: self.customer_id.clone(),
            subscription_id: Some(subscription_id),
            schedule_id: self.schedule_id.clone(),
        }
    }

    pub fn state(&self) -> LinkageState {
        if self.subscription_id.is_some() {
            LinkageState::Subscribed
        } else if self.schedule_id.is_some() {
            LinkageState::Scheduled
        } else {
            LinkageState::Unlinked
        }
    }
}
