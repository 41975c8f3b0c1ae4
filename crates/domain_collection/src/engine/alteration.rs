//! Alteration package transitions
//!
//! Alterations change billing terms mid-term. Each hook has its own
//! sub-transition; anything unrecognized takes the generic cover-update
//! path, which preserves a deliberate asymmetry: monthly downgrades
//! suppress proration while monthly upgrades and all yearly changes
//! invoice the difference immediately. Yearly downgrades additionally
//! convert the resulting account credit into a cash refund.

use tracing::{info, warn};

use core_kernel::{next_occurrence, PolicyId};
use domain_billing::profile::{BillingFrequency, BillingLinkage};
use domain_billing::proration;
use domain_billing::schedule::{self, PriceSpec, ProrationBehavior};
use domain_billing::{BillingError, PolicyBillingProfile};

use crate::error::{upstream, ReconcileError};
use crate::events::{AlterationHook, AlterationPackage};
use crate::objects::{Price, SubscriptionStatus};
use crate::ports::SubscriptionUpdate;

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_alteration_applied(
        &self,
        policy_id: &PolicyId,
        package: &AlterationPackage,
    ) -> Result<Outcome, ReconcileError> {
        let policy = self
            .policies()
            .get_policy(policy_id)
            .await
            .map_err(upstream("get_policy", policy_id))?;

        match &package.hook {
            AlterationHook::UpdateBillingFrequency | AlterationHook::CollectOutstandingPremium => {
                self.change_billing_frequency(&policy).await
            }
            AlterationHook::RenewPolicy => self.renew_policy(&policy).await,
            AlterationHook::CollectAdhocPayment => {
                self.collect_adhoc_payment(&policy, package).await
            }
            AlterationHook::UpdatePolicyCover | AlterationHook::Other(_) => {
                self.update_policy_cover(&policy).await
            }
        }
    }

    /// Moves a policy onto yearly billing with a backdated schedule
    ///
    /// The old subscription/schedule pair is cancelled without proration and
    /// a fresh yearly schedule is anchored at the original policy start, so
    /// the first yearly invoice covers the term from inception.
    async fn change_billing_frequency(
        &self,
        policy: &PolicyBillingProfile,
    ) -> Result<Outcome, ReconcileError> {
        if policy.billing_frequency != BillingFrequency::Yearly {
            return Err(ReconcileError::invalid_state(format!(
                "billing frequency change requires yearly, policy {} is {}",
                policy.policy_id,
                policy.billing_frequency.as_str()
            )));
        }

        let linkage = policy.linkage();
        let customer_id = linkage.customer_id.clone().ok_or_else(|| {
            ReconcileError::missing_linkage(&policy.policy_id, "no customer for frequency change")
        })?;

        if let Some(subscription_id) = &linkage.subscription_id {
            self.payments()
                .cancel_subscription(subscription_id, false)
                .await
                .map_err(upstream("cancel_subscription", subscription_id))?;
        }
        if let Some(schedule_id) = &linkage.schedule_id {
            let existing = self
                .payments()
                .retrieve_schedule(schedule_id)
                .await
                .map_err(upstream("retrieve_schedule", schedule_id))?;
            if existing.status.is_cancellable() {
                self.payments()
                    .cancel_schedule(schedule_id)
                    .await
                    .map_err(upstream("cancel_schedule", schedule_id))?;
            }
        }
        self.policies()
            .update_policy_app_data(&policy.policy_id, policy.app_data.apply(&linkage.detached()))
            .await
            .map_err(upstream("update_policy_app_data", &policy.policy_id))?;

        let end_date = policy.end_date.ok_or(BillingError::MissingEndDate)?;
        let months =
            proration::months_remaining(end_date, policy.billing_day, self.today())?;
        let outstanding = proration::outstanding_premium(months, policy.monthly_premium);
        info!(
            policy = %policy.policy_id,
            months_remaining = months,
            outstanding = %outstanding,
            "collecting outstanding premium via backdated yearly schedule"
        );

        let price = self.create_policy_price(policy).await?;
        let spec = schedule::schedule_for(
            policy,
            &price.id,
            &customer_id,
            ProrationBehavior::None,
            policy.start_date,
        )?;
        let created = self
            .payments()
            .create_schedule(spec)
            .await
            .map_err(upstream("create_schedule", &policy.policy_id))?;

        self.policies()
            .update_policy_app_data(
                &policy.policy_id,
                policy
                    .app_data
                    .apply(&BillingLinkage::scheduled(customer_id, created.id)),
            )
            .await
            .map_err(upstream("update_policy_app_data", &policy.policy_id))?;

        Ok(Outcome::Completed)
    }

    /// Starts a fresh billing term for a renewed policy
    ///
    /// The previous subscription is assumed already expired, so nothing is
    /// cancelled: the old linkage is detached and a new schedule starts now.
    async fn renew_policy(
        &self,
        policy: &PolicyBillingProfile,
    ) -> Result<Outcome, ReconcileError> {
        let linkage = policy.linkage();
        let customer_id = linkage.customer_id.clone().ok_or_else(|| {
            ReconcileError::missing_linkage(&policy.policy_id, "no customer for renewal")
        })?;

        let price = self.create_policy_price(policy).await?;
        let spec = schedule::schedule_for(
            policy,
            &price.id,
            &customer_id,
            ProrationBehavior::None,
            self.today(),
        )?;
        let created = self
            .payments()
            .create_schedule(spec)
            .await
            .map_err(upstream("create_schedule", &policy.policy_id))?;

        self.policies()
            .update_policy_app_data(
                &policy.policy_id,
                policy
                    .app_data
                    .apply(&BillingLinkage::scheduled(customer_id, created.id)),
            )
            .await
            .map_err(upstream("update_policy_app_data", &policy.policy_id))?;

        Ok(Outcome::Completed)
    }

    /// Records a pending ad-hoc collection on the Policy Service
    ///
    /// Subscriptions are bypassed entirely; the payment-created event for
    /// the new record drives the actual collection.
    async fn collect_adhoc_payment(
        &self,
        policy: &PolicyBillingProfile,
        package: &AlterationPackage,
    ) -> Result<Outcome, ReconcileError> {
        let request = package.adhoc_request()?;
        let draft = domain_billing::payment::adhoc_payment(
            &policy.policy_id,
            &request.kind,
            &request.description,
            request.amount,
            self.today(),
        );
        self.policies()
            .create_policy_payment(draft)
            .await
            .map_err(upstream("create_policy_payment", &policy.policy_id))?;
        Ok(Outcome::Completed)
    }

    /// The generic path: reprice whatever the policy is linked to
    async fn update_policy_cover(
        &self,
        policy: &PolicyBillingProfile,
    ) -> Result<Outcome, ReconcileError> {
        let linkage = policy.linkage();
        let new_price = self.create_policy_price(policy).await?;

        if let Some(subscription_id) = &linkage.subscription_id {
            let subscription = self
                .payments()
                .retrieve_subscription(subscription_id)
                .await
                .map_err(upstream("retrieve_subscription", subscription_id))?;
            if subscription.status != SubscriptionStatus::Active {
                return Err(ReconcileError::invalid_state(format!(
                    "cannot alter subscription {subscription_id} in status {:?}",
                    subscription.status
                )));
            }
            let old_price = subscription.current_price().cloned().ok_or_else(|| {
                ReconcileError::invalid_state(format!(
                    "subscription {subscription_id} has no price item"
                ))
            })?;

            let downgrade = new_price.unit_amount < old_price.unit_amount;
            // Monthly downgrades absorb the difference; everything else
            // settles immediately.
            let proration =
                if policy.billing_frequency == BillingFrequency::Monthly && downgrade {
                    ProrationBehavior::None
                } else {
                    ProrationBehavior::AlwaysInvoice
                };

            self.payments()
                .update_subscription(
                    subscription_id,
                    SubscriptionUpdate {
                        price: Some(new_price.id.clone()),
                        proration_behavior: Some(proration),
                        ..Default::default()
                    },
                )
                .await
                .map_err(upstream("update_subscription", subscription_id))?;

            if policy.billing_frequency == BillingFrequency::Yearly && downgrade {
                self.refund_downgrade_credit(policy, &subscription).await?;
            }

            if let Some(schedule_id) = &linkage.schedule_id {
                self.rewrite_schedule_phases(policy, schedule_id, &old_price, &new_price, proration)
                    .await?;
            }
            return Ok(Outcome::Completed);
        }

        if let Some(schedule_id) = &linkage.schedule_id {
            let existing = self
                .payments()
                .retrieve_schedule(schedule_id)
                .await
                .map_err(upstream("retrieve_schedule", schedule_id))?;
            if !existing.status.is_cancellable() {
                return Err(ReconcileError::invalid_state(format!(
                    "cannot replace schedule {schedule_id} in status {:?}",
                    existing.status
                )));
            }
            let customer_id = linkage.customer_id.clone().ok_or_else(|| {
                ReconcileError::missing_linkage(&policy.policy_id, "schedule without customer")
            })?;

            self.payments()
                .cancel_schedule(schedule_id)
                .await
                .map_err(upstream("cancel_schedule", schedule_id))?;
            self.policies()
                .update_policy_app_data(
                    &policy.policy_id,
                    policy.app_data.apply(&linkage.detached()),
                )
                .await
                .map_err(upstream("update_policy_app_data", &policy.policy_id))?;

            let spec = schedule::schedule_for(
                policy,
                &new_price.id,
                &customer_id,
                ProrationBehavior::None,
                policy.start_date,
            )?;
            let created = self
                .payments()
                .create_schedule(spec)
                .await
                .map_err(upstream("create_schedule", &policy.policy_id))?;
            self.policies()
                .update_policy_app_data(
                    &policy.policy_id,
                    policy
                        .app_data
                        .apply(&BillingLinkage::scheduled(customer_id, created.id)),
                )
                .await
                .map_err(upstream("update_policy_app_data", &policy.policy_id))?;
            return Ok(Outcome::Completed);
        }

        Err(ReconcileError::missing_linkage(
            &policy.policy_id,
            "alteration cannot update billing terms for an unlinked policy",
        ))
    }

    /// Converts a yearly downgrade's account credit into a cash refund
    async fn refund_downgrade_credit(
        &self,
        policy: &PolicyBillingProfile,
        subscription: &crate::objects::Subscription,
    ) -> Result<(), ReconcileError> {
        let Some(invoice_id) = &subscription.latest_invoice else {
            info!(policy = %policy.policy_id, "no latest invoice, skipping downgrade refund");
            return Ok(());
        };
        let invoice = self
            .payments()
            .retrieve_invoice(invoice_id)
            .await
            .map_err(upstream("retrieve_invoice", invoice_id))?;

        let charges = self
            .payments()
            .list_charges(&subscription.customer, self.config().charge_lookback)
            .await
            .map_err(upstream("list_charges", &subscription.customer))?;
        let candidates: Vec<_> = charges.iter().map(|c| c.as_candidate()).collect();

        match proration::refund_for_downgrade(invoice.amount_due, &candidates) {
            Some(decision) => {
                self.payments()
                    .create_refund(&decision.charge_id, Some(decision.amount))
                    .await
                    .map_err(upstream("create_refund", &decision.charge_id))?;
                info!(
                    policy = %policy.policy_id,
                    charge = %decision.charge_id,
                    amount = %decision.amount,
                    "downgrade credit refunded as cash"
                );
            }
            None => {
                warn!(policy = %policy.policy_id, "no refund issued for downgrade");
            }
        }
        Ok(())
    }

    /// Aligns a live schedule's future phases with a new price
    async fn rewrite_schedule_phases(
        &self,
        policy: &PolicyBillingProfile,
        schedule_id: &core_kernel::ScheduleId,
        old_price: &Price,
        new_price: &Price,
        proration: ProrationBehavior,
    ) -> Result<(), ReconcileError> {
        let Some(billing_day) = policy.billing_day else {
            warn!(
                policy = %policy.policy_id,
                "no billing day, leaving schedule phases untouched"
            );
            return Ok(());
        };
        let existing = self
            .payments()
            .retrieve_schedule(schedule_id)
            .await
            .map_err(upstream("retrieve_schedule", schedule_id))?;
        let phase_start = existing
            .current_phase
            .as_ref()
            .map(|p| p.start_date)
            .unwrap_or(existing.start_date);
        let split = next_occurrence(self.today(), billing_day)
            .map_err(|e| ReconcileError::Billing(e.into()))?;

        let update = schedule::reschedule_at(
            policy,
            &old_price.id,
            &new_price.id,
            phase_start,
            split,
            proration,
        );
        self.payments()
            .update_schedule(schedule_id, update)
            .await
            .map_err(upstream("update_schedule", schedule_id))?;
        Ok(())
    }

    /// Creates the processor price matching the policy's current terms
    pub(crate) async fn create_policy_price(
        &self,
        policy: &PolicyBillingProfile,
    ) -> Result<Price, ReconcileError> {
        let spec = PriceSpec::recurring_for_frequency(
            policy.billing_frequency,
            policy.cycle_premium(),
            self.config().product_id.clone(),
            policy.policy_number.clone(),
        )?;
        self.payments()
            .create_price(spec)
            .await
            .map_err(upstream("create_price", &policy.policy_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, RetryPolicy};
    use crate::events::AlterationHook;
    use crate::objects::{SubscriptionItem, SubscriptionStatus};
    use crate::ports::mock::{MockPaymentService, MockPolicyService};
    use chrono::NaiveDate;
    use core_kernel::{Currency, CustomerId, Money, PolicyholderId, PriceId, SubscriptionId};
    use domain_billing::profile::{AppData, LinkageState};
    use domain_billing::schedule::PriceInterval;
    use serde_json::json;
    use std::sync::Arc;

    fn policy(frequency: BillingFrequency) -> PolicyBillingProfile {
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

    fn active_subscription(id: &str, customer: &str, unit_minor: i64) -> crate::objects::Subscription {
        crate::objects::Subscription {
            id: SubscriptionId::new(id),
            customer: CustomerId::new(customer),
            status: SubscriptionStatus::Active,
            items: vec![SubscriptionItem {
                id: "si_1".to_string(),
                price: Price {
                    id: PriceId::new("price_old"),
                    unit_amount: Money::from_minor(unit_minor, Currency::ZAR),
                    recurring: Some(PriceInterval::Month),
                },
            }],
            default_payment_method: None,
            latest_invoice: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_frequency_change_requires_yearly() {
        let (engine, _payments, _policies) = engine_with(policy(BillingFrequency::Monthly)).await;
        let package = AlterationPackage {
            hook: AlterationHook::UpdateBillingFrequency,
            input: json!({}),
        };
        let result = engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await;
        assert!(matches!(result, Err(ReconcileError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_frequency_change_backdates_schedule() {
        let mut p = policy(BillingFrequency::Yearly);
        p.app_data.stripe_customer_id = Some(CustomerId::new("cus_1"));
        p.app_data.stripe_subscription_id = Some(SubscriptionId::new("sub_old"));
        let (engine, payments, policies) = engine_with(p).await;
        payments
            .insert_subscription(active_subscription("sub_old", "cus_1", 25_00))
            .await;

        let package = AlterationPackage {
            hook: AlterationHook::UpdateBillingFrequency,
            input: json!({}),
        };
        let outcome = engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);

        // Old subscription cancelled, new schedule backdated to policy start
        let subs = payments.subscriptions.read().await;
        assert_eq!(
            subs.get(&SubscriptionId::new("sub_old")).unwrap().status,
            SubscriptionStatus::Canceled
        );
        let schedules = payments.schedules.read().await;
        let schedule = schedules.values().next().unwrap();
        assert_eq!(
            schedule.start_date,
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );

        let updated = policies.policy(&PolicyId::new("pol_1")).await.unwrap();
        assert_eq!(updated.linkage_state(), LinkageState::Scheduled);
    }

    #[tokio::test]
    async fn test_adhoc_payment_creates_pending_record() {
        let (engine, _payments, policies) = engine_with(policy(BillingFrequency::Monthly)).await;
        let package = AlterationPackage {
            hook: AlterationHook::CollectAdhocPayment,
            input: json!({
                "type": "claim_excess",
                "description": "Windscreen excess",
                "amount": Money::from_minor(50_00, Currency::ZAR),
            }),
        };
        engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await
            .unwrap();

        let records = policies.payments_in_order().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.status, domain_billing::PaymentStatus::Pending);
        assert_eq!(
            records[0].1.draft.description,
            "claim_excess - Windscreen excess"
        );
    }

    #[tokio::test]
    async fn test_cover_update_on_unlinked_policy_is_fatal() {
        let (engine, _payments, _policies) = engine_with(policy(BillingFrequency::Monthly)).await;
        let package = AlterationPackage {
            hook: AlterationHook::UpdatePolicyCover,
            input: json!({}),
        };
        let result = engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await;
        assert!(matches!(result, Err(ReconcileError::MissingLinkage { .. })));
    }

    #[tokio::test]
    async fn test_monthly_downgrade_suppresses_proration() {
        // Premium drops from 30 to 25: subscription gets the new price and
        // the mock records no refund since frequency is monthly
        let mut p = policy(BillingFrequency::Monthly);
        p.app_data.stripe_customer_id = Some(CustomerId::new("cus_1"));
        p.app_data.stripe_subscription_id = Some(SubscriptionId::new("sub_1"));
        let (engine, payments, _policies) = engine_with(p).await;
        payments
            .insert_subscription(active_subscription("sub_1", "cus_1", 30_00))
            .await;

        let package = AlterationPackage {
            hook: AlterationHook::UpdatePolicyCover,
            input: json!({}),
        };
        engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await
            .unwrap();

        let subs = payments.subscriptions.read().await;
        let sub = subs.get(&SubscriptionId::new("sub_1")).unwrap();
        assert_eq!(
            sub.current_price().unwrap().unit_amount,
            Money::from_minor(25_00, Currency::ZAR)
        );
        assert!(payments.refunds.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_yearly_downgrade_refunds_credit() {
        let mut p = policy(BillingFrequency::Yearly);
        p.app_data.stripe_customer_id = Some(CustomerId::new("cus_1"));
        p.app_data.stripe_subscription_id = Some(SubscriptionId::new("sub_1"));
        let (engine, payments, _policies) = engine_with(p).await;

        let mut sub = active_subscription("sub_1", "cus_1", 360_00);
        sub.latest_invoice = Some(core_kernel::InvoiceId::new("in_1"));
        payments.insert_subscription(sub).await;
        payments
            .insert_invoice(domain_billing::Invoice {
                id: core_kernel::InvoiceId::new("in_1"),
                customer: Some(CustomerId::new("cus_1")),
                subscription: Some(SubscriptionId::new("sub_1")),
                status: domain_billing::InvoiceStatus::Paid,
                amount_due: Money::from_minor(-60_00, Currency::ZAR),
                created: 1_700_000_000,
                lines: vec![],
                metadata: Default::default(),
                last_finalization_error: None,
            })
            .await;
        payments
            .insert_charge(crate::objects::Charge {
                id: core_kernel::ChargeId::new("ch_1"),
                customer: Some(CustomerId::new("cus_1")),
                invoice: Some(core_kernel::InvoiceId::new("in_1")),
                amount: Money::from_minor(360_00, Currency::ZAR),
                amount_refunded: Money::from_minor(0, Currency::ZAR),
                status: crate::objects::ChargeStatus::Succeeded,
                refunded: false,
                created: 1_700_000_000,
            })
            .await;

        let package = AlterationPackage {
            hook: AlterationHook::UpdatePolicyCover,
            input: json!({}),
        };
        engine
            .on_alteration_applied(&PolicyId::new("pol_1"), &package)
            .await
            .unwrap();

        let refunds = payments.refunds.read().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].0, core_kernel::ChargeId::new("ch_1"));
        assert_eq!(refunds[0].1, Some(Money::from_minor(60_00, Currency::ZAR)));
    }
}
