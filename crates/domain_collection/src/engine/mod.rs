//! Event Reconciliation Engine
//!
//! One handler per inbound event kind, each a short state-transition
//! procedure over the policy's billing linkage. Handlers consume the
//! mapper and calculator from `domain_billing` and issue calls to the two
//! external services through the ports. Processing is single-flow: one
//! event runs to completion before the next, and the only suspension
//! points are the port calls.

mod alteration;
mod cancellation;
mod charge;
mod invoice;
mod payment_intent;
mod payment_method;
mod policy_update;
mod schedule;

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use core_kernel::{InvoiceId, PolicyId};
use domain_billing::mapping::InvoicePaymentMap;
use domain_billing::schedule::ROOT_POLICY_ID_KEY;
use domain_billing::{Invoice, PolicyBillingProfile};

use crate::config::CollectionConfig;
use crate::error::{upstream, ReconcileError};
use crate::events::{PolicyEvent, ProcessorEvent};
use crate::ports::{PaymentServicePort, PolicyServicePort};

/// How a handler concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition ran and its writes were committed
    Completed,
    /// The event was not relevant; nothing was written
    Skipped(&'static str),
}

/// The orchestrator for all inbound billing events
pub struct ReconciliationEngine {
    payments: Arc<dyn PaymentServicePort>,
    policies: Arc<dyn PolicyServicePort>,
    config: CollectionConfig,
}

impl ReconciliationEngine {
    pub fn new(
        payments: Arc<dyn PaymentServicePort>,
        policies: Arc<dyn PolicyServicePort>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            payments,
            policies,
            config,
        }
    }

    pub(crate) fn payments(&self) -> &dyn PaymentServicePort {
        self.payments.as_ref()
    }

    pub(crate) fn policies(&self) -> &dyn PolicyServicePort {
        self.policies.as_ref()
    }

    pub(crate) fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Today's civil date in the reporting timezone
    pub(crate) fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.config.timezone).date_naive()
    }

    /// Handles one event from the Policy Service
    pub async fn handle_policy_event(
        &self,
        event: PolicyEvent,
    ) -> Result<Outcome, ReconcileError> {
        let outcome = match event {
            PolicyEvent::PaymentMethodAssigned {
                policy_id,
                payment_method_id,
            } => {
                self.on_payment_method_assigned(&policy_id, &payment_method_id)
                    .await
            }
            PolicyEvent::PaymentCreated { policy_id, payment } => {
                self.on_payment_created(&policy_id, &payment).await
            }
            PolicyEvent::PaymentMethodRemoved { policy_id }
            | PolicyEvent::PolicyCancelled { policy_id }
            | PolicyEvent::PolicyExpired { policy_id }
            | PolicyEvent::PolicyLapsed { policy_id } => {
                self.on_policy_terminated(&policy_id).await
            }
            PolicyEvent::AlterationPackageApplied { policy_id, package } => {
                self.on_alteration_applied(&policy_id, &package).await
            }
            PolicyEvent::PolicyUpdated {
                policy_id,
                changed_fields,
            } => self.on_policy_updated(&policy_id, &changed_fields).await,
        }?;
        log_outcome("policy", &outcome);
        Ok(outcome)
    }

    /// Handles one event from the Payment Service
    pub async fn handle_processor_event(
        &self,
        event: ProcessorEvent,
    ) -> Result<Outcome, ReconcileError> {
        let outcome = match event {
            ProcessorEvent::InvoiceCreated(invoice) => self.on_invoice_created(&invoice).await,
            ProcessorEvent::InvoicePaid(invoice) => self.on_invoice_paid(&invoice).await,
            ProcessorEvent::InvoicePaymentFailed(invoice) => {
                self.on_invoice_payment_failed(&invoice).await
            }
            ProcessorEvent::InvoiceVoided(invoice)
            | ProcessorEvent::InvoiceMarkedUncollectible(invoice) => {
                self.on_invoice_uncollected(&invoice).await
            }
            ProcessorEvent::ChargeRefunded(charge) => self.on_charge_refunded(&charge).await,
            ProcessorEvent::ChargeDisputeFundsWithdrawn(dispute) => {
                self.on_dispute_funds_withdrawn(&dispute).await
            }
            ProcessorEvent::SubscriptionScheduleUpdated(schedule) => {
                self.on_schedule_updated(&schedule).await
            }
            ProcessorEvent::PaymentIntentSucceeded(intent) => {
                self.on_payment_intent_succeeded(&intent).await
            }
            ProcessorEvent::PaymentIntentFailed(intent) => {
                self.on_payment_intent_failed(&intent).await
            }
        }?;
        log_outcome("processor", &outcome);
        Ok(outcome)
    }

    /// Reads the invoice's payment mapping, retrying once for metadata lag
    ///
    /// The processor commits invoice metadata asynchronously, so the first
    /// read after an invoice event can miss a mapping that is on its way.
    /// The invoice is re-fetched for each attempt.
    pub(crate) async fn invoice_mapping_with_retry(
        &self,
        invoice: &Invoice,
    ) -> Result<Option<InvoicePaymentMap>, ReconcileError> {
        if let Some(mapping) = InvoicePaymentMap::from_metadata(&invoice.metadata)? {
            return Ok(Some(mapping));
        }

        let retry = self.config.metadata_retry;
        for attempt in 2..=retry.max_attempts {
            tokio::time::sleep(retry.delay()).await;
            let fresh = self
                .payments
                .retrieve_invoice(&invoice.id)
                .await
                .map_err(upstream("retrieve_invoice", &invoice.id))?;
            if let Some(mapping) = InvoicePaymentMap::from_metadata(&fresh.metadata)? {
                info!(invoice = %invoice.id, attempt, "payment mapping arrived on retry");
                return Ok(Some(mapping));
            }
        }
        warn!(invoice = %invoice.id, "no payment mapping after retries");
        Ok(None)
    }

    /// Resolves the policy an invoice belongs to via its subscription
    ///
    /// Subscription metadata inherits the schedule phase metadata, so the
    /// policy id travels with every subscription this engine creates.
    pub(crate) async fn policy_for_invoice(
        &self,
        invoice: &Invoice,
    ) -> Result<PolicyBillingProfile, ReconcileError> {
        let subscription_id = invoice.subscription.as_ref().ok_or_else(|| {
            ReconcileError::missing_metadata("invoice", &invoice.id, "no subscription")
        })?;
        let subscription = self
            .payments
            .retrieve_subscription(subscription_id)
            .await
            .map_err(upstream("retrieve_subscription", subscription_id))?;
        let policy_id = subscription
            .metadata
            .get(ROOT_POLICY_ID_KEY)
            .map(|id| PolicyId::new(id.clone()))
            .ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "subscription",
                    subscription_id,
                    "no rootPolicyId",
                )
            })?;
        self.policies
            .get_policy(&policy_id)
            .await
            .map_err(upstream("get_policy", &policy_id))
    }

    /// Persists a mapping write onto the invoice
    pub(crate) async fn write_invoice_mapping(
        &self,
        invoice_id: &InvoiceId,
        mapping: &InvoicePaymentMap,
    ) -> Result<(), ReconcileError> {
        let metadata = HashMap::from([(
            domain_billing::mapping::ASSOCIATED_PAYMENTS_KEY.to_string(),
            mapping.to_metadata_value()?,
        )]);
        self.payments
            .update_invoice_metadata(invoice_id, metadata)
            .await
            .map_err(upstream("update_invoice_metadata", invoice_id))
    }
}

fn log_outcome(source: &'static str, outcome: &Outcome) {
    match outcome {
        Outcome::Completed => info!(source, "event reconciled"),
        Outcome::Skipped(reason) => info!(source, reason, "event skipped"),
    }
}
