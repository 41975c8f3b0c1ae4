//! Schedule activation
//!
//! When a schedule's first phase starts, the processor births the actual
//! subscription. This handler promotes the policy's linkage from Scheduled
//! to Subscribed and resyncs the default payment method back onto the
//! Policy Service, since the processor side is authoritative for which
//! instrument is actually collecting.

use tracing::info;

use core_kernel::PolicyId;
use domain_billing::profile::BillingLinkage;
use domain_billing::schedule::ROOT_POLICY_ID_KEY;

use crate::error::{upstream, ReconcileError};
use crate::objects::{ScheduleStatus, SubscriptionSchedule};

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_schedule_updated(
        &self,
        schedule: &SubscriptionSchedule,
    ) -> Result<Outcome, ReconcileError> {
        let policy_id = schedule
            .metadata
            .get(ROOT_POLICY_ID_KEY)
            .map(|id| PolicyId::new(id.clone()))
            .ok_or_else(|| {
                ReconcileError::missing_metadata("schedule", &schedule.id, "no rootPolicyId")
            })?;

        if schedule.status != ScheduleStatus::Active {
            return Ok(Outcome::Skipped("schedule not yet active"));
        }
        let subscription_id = schedule.subscription.clone().ok_or_else(|| {
            ReconcileError::invalid_state(format!(
                "active schedule {} has no subscription",
                schedule.id
            ))
        })?;

        let policy = self
            .policies()
            .get_policy(&policy_id)
            .await
            .map_err(upstream("get_policy", &policy_id))?;

        let linkage = BillingLinkage::subscribed(
            schedule.customer.clone(),
            subscription_id.clone(),
            Some(schedule.id.clone()),
        );
        self.policies()
            .update_policy_app_data(&policy_id, policy.app_data.apply(&linkage))
            .await
            .map_err(upstream("update_policy_app_data", &policy_id))?;
        info!(policy = %policy_id, subscription = %subscription_id, "policy now subscribed");

        self.resync_payment_method(&policy, &subscription_id).await?;

        Ok(Outcome::Completed)
    }

    /// Mirrors the subscription's default instrument onto the policy record
    async fn resync_payment_method(
        &self,
        policy: &domain_billing::PolicyBillingProfile,
        subscription_id: &core_kernel::SubscriptionId,
    ) -> Result<(), ReconcileError> {
        let subscription = self
            .payments()
            .retrieve_subscription(subscription_id)
            .await
            .map_err(upstream("retrieve_subscription", subscription_id))?;
        let Some(processor_method) = subscription.default_payment_method else {
            return Ok(());
        };

        let known = self
            .policies()
            .get_policyholder_payment_methods(&policy.policyholder_id)
            .await
            .map_err(upstream(
                "get_policyholder_payment_methods",
                &policy.policyholder_id,
            ))?;
        let record = match known
            .into_iter()
            .find(|m| m.processor_payment_method_id.as_ref() == Some(&processor_method))
        {
            Some(existing) => existing,
            None => self
                .policies()
                .create_policyholder_payment_method(&policy.policyholder_id, &processor_method)
                .await
                .map_err(upstream(
                    "create_policyholder_payment_method",
                    &policy.policyholder_id,
                ))?,
        };
        self.policies()
            .assign_policy_payment_method(&policy.policy_id, &record.id)
            .await
            .map_err(upstream("assign_policy_payment_method", &policy.policy_id))?;
        Ok(())
    }
}
