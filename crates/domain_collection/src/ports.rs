//! Collection domain ports
//!
//! Two port traits cover everything the engine needs from the outside
//! world: [`PaymentServicePort`] for the processor and
//! [`PolicyServicePort`] for the policy platform. Adapters implement them
//! against the real APIs; the [`mock`] module provides in-memory
//! implementations for tests.

use async_trait::async_trait;
use std::collections::HashMap;

use core_kernel::{
    ChargeId, CustomerId, DomainPort, InvoiceId, Money, PaymentMethodRecordId, PaymentRecordId,
    PolicyId, PolicyholderId, PortError, ProcessorPaymentMethodId, ScheduleId, SubscriptionId,
};
use domain_billing::schedule::{PriceSpec, ProrationBehavior, SchedulePhaseUpdate, ScheduleSpec};
use domain_billing::{AppData, Invoice, PaymentDraft, PaymentUpdate, PolicyBillingProfile};

use crate::objects::{
    Charge, Customer, PaymentIntent, PolicyPaymentMethod, Price, ProcessorPaymentMethod,
    Subscription, SubscriptionSchedule,
};

/// Request for creating a processor customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerDraft {
    pub name: String,
    pub metadata: HashMap<String, String>,
}

/// Patch for an existing subscription
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionUpdate {
    /// Replace the subscription's price
    pub price: Option<core_kernel::PriceId>,
    /// How to settle the price difference
    pub proration_behavior: Option<ProrationBehavior>,
    pub default_payment_method: Option<ProcessorPaymentMethodId>,
}

/// Request for creating a payment intent
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentDraft {
    pub customer: CustomerId,
    pub payment_method: ProcessorPaymentMethodId,
    pub amount: Money,
    pub description: String,
    /// Confirm immediately without customer interaction
    pub off_session: bool,
    pub metadata: HashMap<String, String>,
}

/// Operations the engine requires from the payment processor
#[async_trait]
pub trait PaymentServicePort: DomainPort {
    async fn create_price(&self, spec: PriceSpec) -> Result<Price, PortError>;

    async fn create_schedule(&self, spec: ScheduleSpec) -> Result<SubscriptionSchedule, PortError>;

    async fn retrieve_schedule(&self, id: &ScheduleId) -> Result<SubscriptionSchedule, PortError>;

    /// Replaces the schedule's future phases
    async fn update_schedule(
        &self,
        id: &ScheduleId,
        update: SchedulePhaseUpdate,
    ) -> Result<SubscriptionSchedule, PortError>;

    async fn cancel_schedule(&self, id: &ScheduleId) -> Result<SubscriptionSchedule, PortError>;

    async fn retrieve_subscription(&self, id: &SubscriptionId) -> Result<Subscription, PortError>;

    async fn update_subscription(
        &self,
        id: &SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, PortError>;

    /// Cancels a subscription, optionally invoicing a final proration
    async fn cancel_subscription(
        &self,
        id: &SubscriptionId,
        prorate: bool,
    ) -> Result<Subscription, PortError>;

    async fn create_customer(&self, draft: CustomerDraft) -> Result<Customer, PortError>;

    /// Sets the customer's default payment method
    async fn update_customer_default_payment_method(
        &self,
        id: &CustomerId,
        payment_method: &ProcessorPaymentMethodId,
    ) -> Result<Customer, PortError>;

    async fn retrieve_payment_method(
        &self,
        id: &ProcessorPaymentMethodId,
    ) -> Result<ProcessorPaymentMethod, PortError>;

    async fn attach_payment_method(
        &self,
        id: &ProcessorPaymentMethodId,
        customer: &CustomerId,
    ) -> Result<ProcessorPaymentMethod, PortError>;

    async fn create_payment_intent(
        &self,
        draft: PaymentIntentDraft,
    ) -> Result<PaymentIntent, PortError>;

    /// Most recent charges first
    async fn list_charges(
        &self,
        customer: &CustomerId,
        limit: u32,
    ) -> Result<Vec<Charge>, PortError>;

    /// Refunds a charge; `amount` of `None` refunds it in full
    async fn create_refund(
        &self,
        charge: &ChargeId,
        amount: Option<Money>,
    ) -> Result<(), PortError>;

    async fn retrieve_charge(&self, id: &ChargeId) -> Result<Charge, PortError>;

    async fn retrieve_invoice(&self, id: &InvoiceId) -> Result<Invoice, PortError>;

    /// Merges keys into the invoice's metadata
    async fn update_invoice_metadata(
        &self,
        id: &InvoiceId,
        metadata: HashMap<String, String>,
    ) -> Result<(), PortError>;
}

/// Operations the engine requires from the policy platform
#[async_trait]
pub trait PolicyServicePort: DomainPort {
    async fn get_policy(&self, id: &PolicyId) -> Result<PolicyBillingProfile, PortError>;

    /// Writes the complete app_data object back to the policy
    async fn update_policy_app_data(
        &self,
        id: &PolicyId,
        app_data: AppData,
    ) -> Result<(), PortError>;

    /// The payment method currently assigned to a policy, if any
    async fn get_policy_payment_method(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<PolicyPaymentMethod>, PortError>;

    async fn get_policyholder_payment_methods(
        &self,
        policyholder_id: &PolicyholderId,
    ) -> Result<Vec<PolicyPaymentMethod>, PortError>;

    async fn assign_policy_payment_method(
        &self,
        policy_id: &PolicyId,
        payment_method_id: &PaymentMethodRecordId,
    ) -> Result<(), PortError>;

    async fn create_policyholder_payment_method(
        &self,
        policyholder_id: &PolicyholderId,
        processor_payment_method_id: &ProcessorPaymentMethodId,
    ) -> Result<PolicyPaymentMethod, PortError>;

    async fn create_policy_payment(
        &self,
        draft: PaymentDraft,
    ) -> Result<PaymentRecordId, PortError>;

    /// Applies status patches to existing payment records
    async fn update_payments(&self, updates: Vec<PaymentUpdate>) -> Result<(), PortError>;

    /// Fires a named notification event against a policy
    async fn trigger_notification(
        &self,
        policy_id: &PolicyId,
        event: &str,
        payment_id: Option<&PaymentRecordId>,
    ) -> Result<(), PortError>;
}

/// In-memory mock adapters for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use domain_billing::mapping::ASSOCIATED_PAYMENTS_KEY;
    use domain_billing::PaymentStatus;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use crate::objects::{ScheduleStatus, SubscriptionItem, SubscriptionStatus};
    use crate::objects::{PaymentIntentStatus, SchedulePhase};

    fn mint(prefix: &str) -> String {
        format!("{prefix}_{}", Uuid::new_v4().simple())
    }

    /// In-memory mock of the payment processor
    #[derive(Debug, Default)]
    pub struct MockPaymentService {
        pub prices: Arc<RwLock<HashMap<core_kernel::PriceId, Price>>>,
        pub customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
        pub subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
        pub schedules: Arc<RwLock<HashMap<ScheduleId, SubscriptionSchedule>>>,
        pub payment_methods: Arc<RwLock<HashMap<ProcessorPaymentMethodId, ProcessorPaymentMethod>>>,
        pub invoices: Arc<RwLock<HashMap<InvoiceId, Invoice>>>,
        pub charges: Arc<RwLock<HashMap<ChargeId, Charge>>>,
        /// Refunds issued, in call order
        pub refunds: Arc<RwLock<Vec<(ChargeId, Option<Money>)>>>,
        /// Subscription cancellations with their prorate flag, in call order
        pub cancelled_subscriptions: Arc<RwLock<Vec<(SubscriptionId, bool)>>>,
        /// Payment intents created, in call order
        pub payment_intents: Arc<RwLock<Vec<PaymentIntentDraft>>>,
    }

    impl MockPaymentService {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_subscription(&self, subscription: Subscription) {
            self.subscriptions
                .write()
                .await
                .insert(subscription.id.clone(), subscription);
        }

        pub async fn insert_schedule(&self, schedule: SubscriptionSchedule) {
            self.schedules
                .write()
                .await
                .insert(schedule.id.clone(), schedule);
        }

        pub async fn insert_invoice(&self, invoice: Invoice) {
            self.invoices.write().await.insert(invoice.id.clone(), invoice);
        }

        pub async fn insert_charge(&self, charge: Charge) {
            self.charges.write().await.insert(charge.id.clone(), charge);
        }

        pub async fn insert_payment_method(&self, method: ProcessorPaymentMethod) {
            self.payment_methods
                .write()
                .await
                .insert(method.id.clone(), method);
        }

        /// The mapping metadata currently on an invoice, raw
        pub async fn invoice_mapping_raw(&self, id: &InvoiceId) -> Option<String> {
            self.invoices
                .read()
                .await
                .get(id)
                .and_then(|i| i.metadata.get(ASSOCIATED_PAYMENTS_KEY).cloned())
        }
    }

    impl DomainPort for MockPaymentService {}

    #[async_trait]
    impl PaymentServicePort for MockPaymentService {
        async fn create_price(&self, spec: PriceSpec) -> Result<Price, PortError> {
            let price = Price {
                id: core_kernel::PriceId::new(mint("price")),
                unit_amount: spec.unit_amount,
                recurring: spec.recurring,
            };
            self.prices
                .write()
                .await
                .insert(price.id.clone(), price.clone());
            Ok(price)
        }

        async fn create_schedule(
            &self,
            spec: ScheduleSpec,
        ) -> Result<SubscriptionSchedule, PortError> {
            let schedule = SubscriptionSchedule {
                id: ScheduleId::new(mint("sched")),
                customer: spec.customer.clone(),
                status: ScheduleStatus::NotStarted,
                subscription: None,
                start_date: spec.start_date,
                phases: spec
                    .phases
                    .iter()
                    .map(|p| SchedulePhase {
                        price: p.price.clone(),
                        start_date: p.start_date,
                        end_date: p.end_date,
                    })
                    .collect(),
                current_phase: None,
                metadata: spec.metadata.clone(),
            };
            self.schedules
                .write()
                .await
                .insert(schedule.id.clone(), schedule.clone());
            Ok(schedule)
        }

        async fn retrieve_schedule(
            &self,
            id: &ScheduleId,
        ) -> Result<SubscriptionSchedule, PortError> {
            self.schedules
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("SubscriptionSchedule", id))
        }

        async fn update_schedule(
            &self,
            id: &ScheduleId,
            update: SchedulePhaseUpdate,
        ) -> Result<SubscriptionSchedule, PortError> {
            let mut schedules = self.schedules.write().await;
            let schedule = schedules
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("SubscriptionSchedule", id))?;
            schedule.phases = update
                .phases
                .iter()
                .map(|p| SchedulePhase {
                    price: p.price.clone(),
                    start_date: p.start_date,
                    end_date: p.end_date,
                })
                .collect();
            Ok(schedule.clone())
        }

        async fn cancel_schedule(&self, id: &ScheduleId) -> Result<SubscriptionSchedule, PortError> {
            let mut schedules = self.schedules.write().await;
            let schedule = schedules
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("SubscriptionSchedule", id))?;
            schedule.status = ScheduleStatus::Canceled;
            Ok(schedule.clone())
        }

        async fn retrieve_subscription(
            &self,
            id: &SubscriptionId,
        ) -> Result<Subscription, PortError> {
            self.subscriptions
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Subscription", id))
        }

        async fn update_subscription(
            &self,
            id: &SubscriptionId,
            update: SubscriptionUpdate,
        ) -> Result<Subscription, PortError> {
            let prices = self.prices.read().await;
            let mut subscriptions = self.subscriptions.write().await;
            let subscription = subscriptions
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("Subscription", id))?;
            if let Some(price_id) = update.price {
                let price = prices
                    .get(&price_id)
                    .cloned()
                    .ok_or_else(|| PortError::not_found("Price", &price_id))?;
                match subscription.items.first_mut() {
                    Some(item) => item.price = price,
                    None => subscription.items.push(SubscriptionItem {
                        id: mint("si"),
                        price,
                    }),
                }
            }
            if let Some(method) = update.default_payment_method {
                subscription.default_payment_method = Some(method);
            }
            Ok(subscription.clone())
        }

        async fn cancel_subscription(
            &self,
            id: &SubscriptionId,
            prorate: bool,
        ) -> Result<Subscription, PortError> {
            let mut subscriptions = self.subscriptions.write().await;
            let subscription = subscriptions
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("Subscription", id))?;
            subscription.status = SubscriptionStatus::Canceled;
            self.cancelled_subscriptions
                .write()
                .await
                .push((id.clone(), prorate));
            Ok(subscription.clone())
        }

        async fn create_customer(&self, draft: CustomerDraft) -> Result<Customer, PortError> {
            let customer = Customer {
                id: CustomerId::new(mint("cus")),
                name: draft.name,
                default_payment_method: None,
                metadata: draft.metadata,
            };
            self.customers
                .write()
                .await
                .insert(customer.id.clone(), customer.clone());
            Ok(customer)
        }

        async fn update_customer_default_payment_method(
            &self,
            id: &CustomerId,
            payment_method: &ProcessorPaymentMethodId,
        ) -> Result<Customer, PortError> {
            let mut customers = self.customers.write().await;
            let customer = customers
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("Customer", id))?;
            customer.default_payment_method = Some(payment_method.clone());
            Ok(customer.clone())
        }

        async fn retrieve_payment_method(
            &self,
            id: &ProcessorPaymentMethodId,
        ) -> Result<ProcessorPaymentMethod, PortError> {
            self.payment_methods
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("PaymentMethod", id))
        }

        async fn attach_payment_method(
            &self,
            id: &ProcessorPaymentMethodId,
            customer: &CustomerId,
        ) -> Result<ProcessorPaymentMethod, PortError> {
            let mut methods = self.payment_methods.write().await;
            let method = methods
                .entry(id.clone())
                .or_insert_with(|| ProcessorPaymentMethod {
                    id: id.clone(),
                    customer: None,
                });
            method.customer = Some(customer.clone());
            Ok(method.clone())
        }

        async fn create_payment_intent(
            &self,
            draft: PaymentIntentDraft,
        ) -> Result<PaymentIntent, PortError> {
            let intent = PaymentIntent {
                id: core_kernel::PaymentIntentId::new(mint("pi")),
                amount: draft.amount,
                status: PaymentIntentStatus::Processing,
                last_payment_error: None,
                metadata: draft.metadata.clone(),
            };
            self.payment_intents.write().await.push(draft);
            Ok(intent)
        }

        async fn list_charges(
            &self,
            customer: &CustomerId,
            limit: u32,
        ) -> Result<Vec<Charge>, PortError> {
            let charges = self.charges.read().await;
            let mut matching: Vec<Charge> = charges
                .values()
                .filter(|c| c.customer.as_ref() == Some(customer))
                .cloned()
                .collect();
            matching.sort_by_key(|c| std::cmp::Reverse(c.created));
            matching.truncate(limit as usize);
            Ok(matching)
        }

        async fn create_refund(
            &self,
            charge: &ChargeId,
            amount: Option<Money>,
        ) -> Result<(), PortError> {
            if !self.charges.read().await.contains_key(charge) {
                return Err(PortError::not_found("Charge", charge));
            }
            self.refunds.write().await.push((charge.clone(), amount));
            Ok(())
        }

        async fn retrieve_charge(&self, id: &ChargeId) -> Result<Charge, PortError> {
            self.charges
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Charge", id))
        }

        async fn retrieve_invoice(&self, id: &InvoiceId) -> Result<Invoice, PortError> {
            self.invoices
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Invoice", id))
        }

        async fn update_invoice_metadata(
            &self,
            id: &InvoiceId,
            metadata: HashMap<String, String>,
        ) -> Result<(), PortError> {
            let mut invoices = self.invoices.write().await;
            let invoice = invoices
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("Invoice", id))?;
            invoice.metadata.extend(metadata);
            Ok(())
        }
    }

    /// A payment record held by the mock policy service
    #[derive(Debug, Clone)]
    pub struct StoredPayment {
        pub draft: PaymentDraft,
        pub status: PaymentStatus,
        pub failure_reason: Option<String>,
    }

    /// In-memory mock of the policy platform
    #[derive(Debug, Default)]
    pub struct MockPolicyService {
        pub policies: Arc<RwLock<HashMap<PolicyId, PolicyBillingProfile>>>,
        pub policy_payment_methods: Arc<RwLock<HashMap<PolicyId, PolicyPaymentMethod>>>,
        pub holder_payment_methods: Arc<RwLock<HashMap<PolicyholderId, Vec<PolicyPaymentMethod>>>>,
        /// Which payment method record each policy currently has assigned
        pub assignments: Arc<RwLock<HashMap<PolicyId, PaymentMethodRecordId>>>,
        pub payments: Arc<RwLock<HashMap<PaymentRecordId, StoredPayment>>>,
        /// Payment record ids in creation order
        pub payment_order: Arc<RwLock<Vec<PaymentRecordId>>>,
        pub notifications: Arc<RwLock<Vec<(PolicyId, String, Option<PaymentRecordId>)>>>,
    }

    impl MockPolicyService {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_policy(&self, policy: PolicyBillingProfile) {
            self.policies
                .write()
                .await
                .insert(policy.policy_id.clone(), policy);
        }

        pub async fn insert_policy_payment_method(
            &self,
            policy_id: PolicyId,
            method: PolicyPaymentMethod,
        ) {
            self.policy_payment_methods
                .write()
                .await
                .insert(policy_id, method);
        }

        pub async fn policy(&self, id: &PolicyId) -> Option<PolicyBillingProfile> {
            self.policies.read().await.get(id).cloned()
        }

        pub async fn payment(&self, id: &PaymentRecordId) -> Option<StoredPayment> {
            self.payments.read().await.get(id).cloned()
        }

        pub async fn payments_in_order(&self) -> Vec<(PaymentRecordId, StoredPayment)> {
            let order = self.payment_order.read().await;
            let payments = self.payments.read().await;
            order
                .iter()
                .filter_map(|id| payments.get(id).map(|p| (id.clone(), p.clone())))
                .collect()
        }
    }

    impl DomainPort for MockPolicyService {}

    #[async_trait]
    impl PolicyServicePort for MockPolicyService {
        async fn get_policy(&self, id: &PolicyId) -> Result<PolicyBillingProfile, PortError> {
            self.policies
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Policy", id))
        }

        async fn update_policy_app_data(
            &self,
            id: &PolicyId,
            app_data: AppData,
        ) -> Result<(), PortError> {
            let mut policies = self.policies.write().await;
            let policy = policies
                .get_mut(id)
                .ok_or_else(|| PortError::not_found("Policy", id))?;
            policy.app_data = app_data;
            Ok(())
        }

        async fn get_policy_payment_method(
            &self,
            policy_id: &PolicyId,
        ) -> Result<Option<PolicyPaymentMethod>, PortError> {
            Ok(self
                .policy_payment_methods
                .read()
                .await
                .get(policy_id)
                .cloned())
        }

        async fn get_policyholder_payment_methods(
            &self,
            policyholder_id: &PolicyholderId,
        ) -> Result<Vec<PolicyPaymentMethod>, PortError> {
            Ok(self
                .holder_payment_methods
                .read()
                .await
                .get(policyholder_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn assign_policy_payment_method(
            &self,
            policy_id: &PolicyId,
            payment_method_id: &PaymentMethodRecordId,
        ) -> Result<(), PortError> {
            self.assignments
                .write()
                .await
                .insert(policy_id.clone(), payment_method_id.clone());
            Ok(())
        }

        async fn create_policyholder_payment_method(
            &self,
            policyholder_id: &PolicyholderId,
            processor_payment_method_id: &ProcessorPaymentMethodId,
        ) -> Result<PolicyPaymentMethod, PortError> {
            let method = PolicyPaymentMethod {
                id: PaymentMethodRecordId::new(mint("pmr")),
                policyholder_id: policyholder_id.clone(),
                processor_payment_method_id: Some(processor_payment_method_id.clone()),
            };
            self.holder_payment_methods
                .write()
                .await
                .entry(policyholder_id.clone())
                .or_default()
                .push(method.clone());
            Ok(method)
        }

        async fn create_policy_payment(
            &self,
            draft: PaymentDraft,
        ) -> Result<PaymentRecordId, PortError> {
            let id = PaymentRecordId::new(mint("pay"));
            let status = draft.status;
            self.payments.write().await.insert(
                id.clone(),
                StoredPayment {
                    draft,
                    status,
                    failure_reason: None,
                },
            );
            self.payment_order.write().await.push(id.clone());
            Ok(id)
        }

        async fn update_payments(&self, updates: Vec<PaymentUpdate>) -> Result<(), PortError> {
            let mut payments = self.payments.write().await;
            for update in updates {
                let payment = payments
                    .get_mut(&update.payment_id)
                    .ok_or_else(|| PortError::not_found("Payment", &update.payment_id))?;
                payment.status = update.status;
                payment.failure_reason = update.failure_reason;
            }
            Ok(())
        }

        async fn trigger_notification(
            &self,
            policy_id: &PolicyId,
            event: &str,
            payment_id: Option<&PaymentRecordId>,
        ) -> Result<(), PortError> {
            self.notifications.write().await.push((
                policy_id.clone(),
                event.to_string(),
                payment_id.cloned(),
            ));
            Ok(())
        }
    }
}
