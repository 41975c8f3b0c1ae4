//! Payment-method assignment transitions
//!
//! Assigning a payment method is what first links a policy to the
//! processor: `Unlinked → Scheduled` creates the customer, price, and
//! two-phase schedule. For already-linked policies the new method becomes
//! the default on the customer and, when started, the subscription.

use std::collections::HashMap;
use tracing::info;

use core_kernel::{PaymentMethodRecordId, PolicyId, ProcessorPaymentMethodId};
use domain_billing::profile::{BillingFrequency, BillingLinkage, LinkageState};
use domain_billing::schedule::{
    self, CorrelationMetadata, PriceSpec, ProrationBehavior, ROOT_PAYMENT_ID_KEY,
    ROOT_POLICY_ID_KEY,
};
use domain_billing::PolicyBillingProfile;

use crate::error::{upstream, ReconcileError};
use crate::objects::PaymentRecord;
use crate::ports::{CustomerDraft, PaymentIntentDraft, SubscriptionUpdate};

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_payment_method_assigned(
        &self,
        policy_id: &PolicyId,
        payment_method_id: &PaymentMethodRecordId,
    ) -> Result<Outcome, ReconcileError> {
        let policy = self
            .policies()
            .get_policy(policy_id)
            .await
            .map_err(upstream("get_policy", policy_id))?;

        let method = self
            .policies()
            .get_policy_payment_method(policy_id)
            .await
            .map_err(upstream("get_policy_payment_method", policy_id))?
            .filter(|m| &m.id == payment_method_id)
            .and_then(|m| m.processor_payment_method_id)
            .ok_or_else(|| {
                ReconcileError::missing_linkage(
                    policy_id,
                    "assigned payment method has no processor payment method",
                )
            })?;

        match policy.linkage_state() {
            LinkageState::Unlinked => self.link_policy(&policy, &method).await,
            LinkageState::Scheduled | LinkageState::Subscribed => {
                self.switch_default_payment_method(&policy, &method).await
            }
        }
    }

    /// First linkage: customer, price, and schedule (or a one-off charge)
    async fn link_policy(
        &self,
        policy: &PolicyBillingProfile,
        method: &ProcessorPaymentMethodId,
    ) -> Result<Outcome, ReconcileError> {
        let linkage = policy.linkage();
        let customer_id = match linkage.customer_id.clone() {
            Some(id) => id,
            None => {
                let customer = self
                    .payments()
                    .create_customer(CustomerDraft {
                        name: policy.policyholder_name.clone(),
                        metadata: CorrelationMetadata::for_policy(policy).to_map(),
                    })
                    .await
                    .map_err(upstream("create_customer", &policy.policy_id))?;
                customer.id
            }
        };

        self.payments()
            .attach_payment_method(method, &customer_id)
            .await
            .map_err(upstream("attach_payment_method", method))?;
        self.payments()
            .update_customer_default_payment_method(&customer_id, method)
            .await
            .map_err(upstream("update_customer", &customer_id))?;

        if policy.billing_frequency == BillingFrequency::OnceOff {
            // One-off policies never get a schedule: a single price and a
            // confirmed off-session intent collect the whole premium.
            self.payments()
                .create_price(PriceSpec::for_frequency(
                    BillingFrequency::OnceOff,
                    policy.cycle_premium(),
                    self.config().product_id.clone(),
                    policy.policy_number.clone(),
                ))
                .await
                .map_err(upstream("create_price", &policy.policy_id))?;
            self.payments()
                .create_payment_intent(PaymentIntentDraft {
                    customer: customer_id.clone(),
                    payment_method: method.clone(),
                    amount: policy.cycle_premium(),
                    description: format!("Premium - {}", policy.policy_number),
                    off_session: true,
                    metadata: CorrelationMetadata::for_policy(policy).to_map(),
                })
                .await
                .map_err(upstream("create_payment_intent", &policy.policy_id))?;

            let app_data = policy.app_data.apply(&BillingLinkage {
                customer_id: Some(customer_id),
                subscription_id: None,
                schedule_id: None,
            });
            self.policies()
                .update_policy_app_data(&policy.policy_id, app_data)
                .await
                .map_err(upstream("update_policy_app_data", &policy.policy_id))?;
            return Ok(Outcome::Completed);
        }

        let price = self
            .payments()
            .create_price(PriceSpec::recurring_for_frequency(
                policy.billing_frequency,
                policy.cycle_premium(),
                self.config().product_id.clone(),
                policy.policy_number.clone(),
            )?)
            .await
            .map_err(upstream("create_price", &policy.policy_id))?;

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

        info!(policy = %policy.policy_id, schedule = %created.id, "policy linked");

        let app_data = policy
            .app_data
            .apply(&BillingLinkage::scheduled(customer_id, created.id));
        self.policies()
            .update_policy_app_data(&policy.policy_id, app_data)
            .await
            .map_err(upstream("update_policy_app_data", &policy.policy_id))?;

        Ok(Outcome::Completed)
    }

    /// Re-points an existing linkage at a new default payment method
    async fn switch_default_payment_method(
        &self,
        policy: &PolicyBillingProfile,
        method: &ProcessorPaymentMethodId,
    ) -> Result<Outcome, ReconcileError> {
        let linkage = policy.linkage();
        let customer_id = linkage.customer_id.clone().ok_or_else(|| {
            ReconcileError::missing_linkage(&policy.policy_id, "linked policy has no customer")
        })?;

        self.payments()
            .attach_payment_method(method, &customer_id)
            .await
            .map_err(upstream("attach_payment_method", method))?;
        self.payments()
            .update_customer_default_payment_method(&customer_id, method)
            .await
            .map_err(upstream("update_customer", &customer_id))?;

        if let Some(subscription_id) = &linkage.subscription_id {
            self.payments()
                .update_subscription(
                    subscription_id,
                    SubscriptionUpdate {
                        default_payment_method: Some(method.clone()),
                        ..Default::default()
                    },
                )
                .await
                .map_err(upstream("update_subscription", subscription_id))?;
        }

        Ok(Outcome::Completed)
    }

    /// Collects a pending, manually raised payment through a payment intent
    ///
    /// Records the engine created itself (they carry a processor reference)
    /// are skipped: their collection is driven by the subscription cycle.
    pub(crate) async fn on_payment_created(
        &self,
        policy_id: &PolicyId,
        payment: &PaymentRecord,
    ) -> Result<Outcome, ReconcileError> {
        if payment.is_engine_generated() {
            return Ok(Outcome::Skipped("engine-generated payment"));
        }
        if payment.status != domain_billing::PaymentStatus::Pending {
            return Ok(Outcome::Skipped("payment not pending"));
        }

        let policy = self
            .policies()
            .get_policy(policy_id)
            .await
            .map_err(upstream("get_policy", policy_id))?;
        let customer_id = policy.linkage().customer_id.ok_or_else(|| {
            ReconcileError::missing_linkage(policy_id, "no customer to collect from")
        })?;
        let method = self
            .policies()
            .get_policy_payment_method(policy_id)
            .await
            .map_err(upstream("get_policy_payment_method", policy_id))?
            .and_then(|m| m.processor_payment_method_id)
            .ok_or_else(|| {
                ReconcileError::missing_linkage(policy_id, "no payment method to collect with")
            })?;

        let metadata = HashMap::from([
            (ROOT_PAYMENT_ID_KEY.to_string(), payment.id.to_string()),
            (ROOT_POLICY_ID_KEY.to_string(), policy_id.to_string()),
        ]);
        self.payments()
            .create_payment_intent(PaymentIntentDraft {
                customer: customer_id,
                payment_method: method,
                amount: payment.amount,
                description: payment.description.clone(),
                off_session: true,
                metadata,
            })
            .await
            .map_err(upstream("create_payment_intent", &payment.id))?;

        Ok(Outcome::Completed)
    }
}
