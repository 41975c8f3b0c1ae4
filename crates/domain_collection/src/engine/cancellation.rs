//! Policy termination
//!
//! Cancellation, expiry, lapse and payment-method removal all land here:
//! the processor side is torn down and the linkage detached. Refund
//! eligibility is decided before anything is cancelled, since cancelling
//! the subscription first would change what the processor reports for the
//! charges under review.

use tracing::info;

use core_kernel::PolicyId;
use domain_billing::profile::LinkageState;
use domain_billing::proration;

use crate::error::{upstream, ReconcileError};
use crate::objects::SubscriptionStatus;

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_policy_terminated(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Outcome, ReconcileError> {
        let policy = self
            .policies()
            .get_policy(policy_id)
            .await
            .map_err(upstream("get_policy", policy_id))?;
        let linkage = policy.linkage();

        if linkage.state() == LinkageState::Unlinked && linkage.customer_id.is_none() {
            return Ok(Outcome::Skipped("policy has no processor linkage"));
        }

        let cooling_off = proration::within_cooling_off(
            policy.start_date,
            self.today(),
            self.config().cooling_off_days,
        );
        if cooling_off {
            if let Some(customer_id) = &linkage.customer_id {
                self.refund_recent_charges(policy_id, customer_id).await?;
            }
        }

        let prorate = proration::should_prorate_cancellation(
            policy.billing_frequency,
            policy.claimed_against,
            cooling_off,
        );

        if let Some(subscription_id) = &linkage.subscription_id {
            let subscription = self
                .payments()
                .retrieve_subscription(subscription_id)
                .await
                .map_err(upstream("retrieve_subscription", subscription_id))?;
            if subscription.status != SubscriptionStatus::Canceled {
                self.payments()
                    .cancel_subscription(subscription_id, prorate)
                    .await
                    .map_err(upstream("cancel_subscription", subscription_id))?;
                info!(policy = %policy_id, subscription = %subscription_id, prorate, "subscription cancelled");
            }
        }

        if let Some(schedule_id) = &linkage.schedule_id {
            let schedule = self
                .payments()
                .retrieve_schedule(schedule_id)
                .await
                .map_err(upstream("retrieve_schedule", schedule_id))?;
            if schedule.status.is_cancellable() {
                self.payments()
                    .cancel_schedule(schedule_id)
                    .await
                    .map_err(upstream("cancel_schedule", schedule_id))?;
                info!(policy = %policy_id, schedule = %schedule_id, "schedule cancelled");
            }
        }

        self.policies()
            .update_policy_app_data(policy_id, policy.app_data.apply(&linkage.detached()))
            .await
            .map_err(upstream("update_policy_app_data", policy_id))?;

        Ok(Outcome::Completed)
    }

    /// Fully refunds recent successful charges during the cooling-off window
    async fn refund_recent_charges(
        &self,
        policy_id: &PolicyId,
        customer_id: &core_kernel::CustomerId,
    ) -> Result<(), ReconcileError> {
        let charges = self
            .payments()
            .list_charges(customer_id, self.config().charge_lookback)
            .await
            .map_err(upstream("list_charges", customer_id))?;

        for charge in charges {
            let candidate = charge.as_candidate();
            if candidate.succeeded && !candidate.refunded && charge.invoice.is_some() {
                self.payments()
                    .create_refund(&charge.id, None)
                    .await
                    .map_err(upstream("create_refund", &charge.id))?;
                info!(policy = %policy_id, charge = %charge.id, "cooling-off refund issued");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, RetryPolicy};
    use crate::objects::{Charge, ChargeStatus, SchedulePhase, SubscriptionSchedule};
    use crate::ports::mock::{MockPaymentService, MockPolicyService};
    use chrono::{Duration, Utc};
    use core_kernel::{
        ChargeId, Currency, CustomerId, InvoiceId, Money, PolicyholderId, PriceId, ScheduleId,
        SubscriptionId,
    };
    use domain_billing::profile::{AppData, BillingFrequency};
    use domain_billing::PolicyBillingProfile;
    use std::sync::Arc;

    fn policy_started(days_ago: i64) -> PolicyBillingProfile {
        let start = Utc::now().date_naive() - Duration::days(days_ago);
        PolicyBillingProfile {
            policy_id: PolicyId::new("pol_1"),
            policy_number: "P-1001".to_string(),
            policyholder_id: PolicyholderId::new("ph_1"),
            policyholder_name: "N Dlamini".to_string(),
            monthly_premium: Money::from_minor(25_00, Currency::ZAR),
            billing_frequency: BillingFrequency::Monthly,
            billing_day: Some(1),
            start_date: start,
            end_date: Some(start + Duration::days(365)),
            claimed_against: false,
            app_data: AppData {
                stripe_customer_id: Some(CustomerId::new("cus_1")),
                stripe_subscription_id: Some(SubscriptionId::new("sub_1")),
                stripe_subscription_schedule_id: Some(ScheduleId::new("sched_1")),
                ..AppData::default()
            },
        }
    }

    async fn engine_with(
        policy: PolicyBillingProfile,
    ) -> (
        ReconciliationEngine,
        Arc<MockPaymentService>,
        Arc<MockPolicyService>,
    ) {
        let payments = Arc::new(MockPaymentService::new());
        let policies = Arc::new(MockPolicyService::new());
        policies.insert_policy(policy).await;
        let config = CollectionConfig {
            metadata_retry: RetryPolicy::immediate(2),
            ..CollectionConfig::default()
        };
        let engine = ReconciliationEngine::new(payments.clone(), policies.clone(), config);
        (engine, payments, policies)
    }

    async fn seed_linked_processor(payments: &MockPaymentService) {
        payments
            .insert_subscription(crate::objects::Subscription {
                id: SubscriptionId::new("sub_1"),
                customer: CustomerId::new("cus_1"),
                status: SubscriptionStatus::Active,
                items: vec![],
                default_payment_method: None,
                latest_invoice: None,
                metadata: Default::default(),
            })
            .await;
        payments
            .insert_schedule(SubscriptionSchedule {
                id: ScheduleId::new("sched_1"),
                customer: CustomerId::new("cus_1"),
                status: crate::objects::ScheduleStatus::Active,
                subscription: Some(SubscriptionId::new("sub_1")),
                start_date: Utc::now().date_naive(),
                phases: vec![SchedulePhase {
                    price: PriceId::new("price_1"),
                    start_date: Utc::now().date_naive(),
                    end_date: None,
                }],
                current_phase: None,
                metadata: Default::default(),
            })
            .await;
    }

    fn succeeded_charge(id: &str, created: i64) -> Charge {
        Charge {
            id: ChargeId::new(id),
            customer: Some(CustomerId::new("cus_1")),
            invoice: Some(InvoiceId::new("in_1")),
            amount: Money::from_minor(25_00, Currency::ZAR),
            amount_refunded: Money::from_minor(0, Currency::ZAR),
            status: ChargeStatus::Succeeded,
            refunded: false,
            created,
        }
    }

    #[tokio::test]
    async fn test_unlinked_policy_is_skipped() {
        let mut p = policy_started(30);
        p.app_data = AppData::default();
        let (engine, _payments, _policies) = engine_with(p).await;
        let outcome = engine
            .on_policy_terminated(&PolicyId::new("pol_1"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_cooling_off_cancellation_refunds_charges() {
        let (engine, payments, policies) = engine_with(policy_started(5)).await;
        seed_linked_processor(&payments).await;
        payments.insert_charge(succeeded_charge("ch_1", 1_700_000_000)).await;
        let mut refunded = succeeded_charge("ch_2", 1_700_100_000);
        refunded.refunded = true;
        payments.insert_charge(refunded).await;

        let outcome = engine
            .on_policy_terminated(&PolicyId::new("pol_1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);

        // Only the unrefunded charge gets a full refund
        let refunds = payments.refunds.read().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0], (ChargeId::new("ch_1"), None));

        let updated = policies.policy(&PolicyId::new("pol_1")).await.unwrap();
        assert!(updated.app_data.stripe_subscription_id.is_none());
        assert!(updated.app_data.stripe_subscription_schedule_id.is_none());
        // Customer linkage survives detachment
        assert_eq!(
            updated.app_data.stripe_customer_id,
            Some(CustomerId::new("cus_1"))
        );
    }

    #[tokio::test]
    async fn test_cancellation_outside_cooling_off_issues_no_refund() {
        let (engine, payments, _policies) = engine_with(policy_started(60)).await;
        seed_linked_processor(&payments).await;
        payments.insert_charge(succeeded_charge("ch_1", 1_700_000_000)).await;

        engine
            .on_policy_terminated(&PolicyId::new("pol_1"))
            .await
            .unwrap();

        assert!(payments.refunds.read().await.is_empty());
        let subs = payments.subscriptions.read().await;
        assert_eq!(
            subs.get(&SubscriptionId::new("sub_1")).unwrap().status,
            SubscriptionStatus::Canceled
        );
        let schedules = payments.schedules.read().await;
        assert_eq!(
            schedules.get(&ScheduleId::new("sched_1")).unwrap().status,
            crate::objects::ScheduleStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_yearly_unclaimed_cancellation_prorates() {
        let mut p = policy_started(60);
        p.billing_frequency = BillingFrequency::Yearly;
        let (engine, payments, _policies) = engine_with(p).await;
        seed_linked_processor(&payments).await;

        engine
            .on_policy_terminated(&PolicyId::new("pol_1"))
            .await
            .unwrap();

        let cancellations = payments.cancelled_subscriptions.read().await;
        assert_eq!(cancellations.as_slice(), &[(SubscriptionId::new("sub_1"), true)]);
    }

    #[tokio::test]
    async fn test_already_cancelled_subscription_is_left_alone() {
        let (engine, payments, _policies) = engine_with(policy_started(60)).await;
        seed_linked_processor(&payments).await;
        {
            let mut subs = payments.subscriptions.write().await;
            subs.get_mut(&SubscriptionId::new("sub_1")).unwrap().status =
                SubscriptionStatus::Canceled;
        }

        let outcome = engine
            .on_policy_terminated(&PolicyId::new("pol_1"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(payments.cancelled_subscriptions.read().await.is_empty());
    }
}
