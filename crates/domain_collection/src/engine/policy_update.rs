//! Direct policy record updates
//!
//! Of the billing-relevant fields, only a lone billing-day change is
//! reconciled here: the live schedule is split at the next occurrence of
//! the new day so invoices move to it without charging the difference.
//! Premium and term changes arrive through alteration packages instead,
//! and combined updates are deliberately not untangled.

use tracing::warn;

use core_kernel::{next_occurrence, PolicyId};
use domain_billing::schedule::{self, ProrationBehavior};
use domain_billing::BillingError;

use crate::error::{upstream, ReconcileError};
use crate::events::BillingField;
use crate::objects::SubscriptionStatus;

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_policy_updated(
        &self,
        policy_id: &PolicyId,
        changed_fields: &[BillingField],
    ) -> Result<Outcome, ReconcileError> {
        if changed_fields.is_empty() {
            return Ok(Outcome::Skipped("no billing-relevant fields changed"));
        }
        if changed_fields != [BillingField::BillingDay] {
            warn!(
                policy = %policy_id,
                ?changed_fields,
                "unsupported billing field combination, not reconciling"
            );
            return Ok(Outcome::Skipped("unsupported billing field combination"));
        }

        let policy = self
            .policies()
            .get_policy(policy_id)
            .await
            .map_err(upstream("get_policy", policy_id))?;
        let linkage = policy.linkage();
        let Some(schedule_id) = linkage.schedule_id.clone() else {
            return Ok(Outcome::Skipped("policy has no schedule to re-anchor"));
        };

        let existing = self
            .payments()
            .retrieve_schedule(&schedule_id)
            .await
            .map_err(upstream("retrieve_schedule", &schedule_id))?;

        // A scheduled-but-not-yet-subscribed policy may have activated
        // since the linkage was last written; pick the subscription up from
        // the schedule and persist it before touching the phases.
        let subscription_id = match linkage.subscription_id.clone() {
            Some(id) => id,
            None => {
                let id = existing.subscription.clone().ok_or_else(|| {
                    ReconcileError::invalid_state(format!(
                        "schedule {schedule_id} has no subscription to re-anchor"
                    ))
                })?;
                self.policies()
                    .update_policy_app_data(
                        policy_id,
                        policy.app_data.apply(&linkage.with_subscription(id.clone())),
                    )
                    .await
                    .map_err(upstream("update_policy_app_data", policy_id))?;
                id
            }
        };

        let subscription = self
            .payments()
            .retrieve_subscription(&subscription_id)
            .await
            .map_err(upstream("retrieve_subscription", &subscription_id))?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(ReconcileError::invalid_state(format!(
                "cannot re-anchor subscription {subscription_id} in status {:?}",
                subscription.status
            )));
        }
        let price = subscription.current_price().cloned().ok_or_else(|| {
            ReconcileError::invalid_state(format!(
                "subscription {subscription_id} has no price item"
            ))
        })?;

        let billing_day = policy.billing_day.ok_or(BillingError::MissingBillingDay)?;
        let split = next_occurrence(self.today(), billing_day)
            .map_err(|e| ReconcileError::Billing(e.into()))?;
        let phase_start = existing
            .current_phase
            .as_ref()
            .map(|p| p.start_date)
            .unwrap_or(existing.start_date);

        // Same price both sides of the split: only the anchor moves
        let update = schedule::reschedule_at(
            &policy,
            &price.id,
            &price.id,
            phase_start,
            split,
            ProrationBehavior::None,
        );
        self.payments()
            .update_schedule(&schedule_id, update)
            .await
            .map_err(upstream("update_schedule", &schedule_id))?;

        Ok(Outcome::Completed)
    }
}
