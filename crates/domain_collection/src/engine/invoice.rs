//! Invoice lifecycle reconciliation
//!
//! Every subscription invoice is mirrored onto the Policy Service as one
//! payment record per line item, correlated through the invoice's
//! `associatedRootPaymentIds` metadata. The mapping is written back after
//! each record is created so a crash mid-invoice never orphans more than
//! the record in flight.

use chrono::Utc;
use tracing::warn;

use domain_billing::mapping::InvoicePaymentMap;
use domain_billing::payment::{self, PaymentUpdate};
use domain_billing::{FailureAction, Invoice};

use crate::error::{upstream, ReconcileError};

use super::{Outcome, ReconciliationEngine};

const FAILED_PAYMENT_NOTIFICATION: &str = "failed_payment_retry";

impl ReconciliationEngine {
    pub(crate) async fn on_invoice_created(
        &self,
        invoice: &Invoice,
    ) -> Result<Outcome, ReconcileError> {
        if invoice.is_manual() {
            return Ok(Outcome::Skipped("manually created invoice"));
        }
        if invoice.subscription.is_none() {
            return Ok(Outcome::Skipped("invoice not tied to a subscription"));
        }

        let policy = self.policy_for_invoice(invoice).await?;
        // A policy without an assigned payment method cannot have reached
        // this point through the engine's own linking flow.
        self.policies()
            .get_policy_payment_method(&policy.policy_id)
            .await
            .map_err(upstream("get_policy_payment_method", &policy.policy_id))?
            .ok_or_else(|| {
                ReconcileError::missing_linkage(
                    &policy.policy_id,
                    "invoiced policy has no payment method",
                )
            })?;

        let mut mapping = InvoicePaymentMap::from_metadata(&invoice.metadata)?
            .unwrap_or_else(InvoicePaymentMap::new);

        for line in &invoice.lines {
            if mapping.payment_for(&line.id).is_some() {
                continue;
            }
            let draft = payment::payment_for_invoice_line(
                &policy.policy_id,
                line,
                invoice.created,
                invoice.amount_due,
                self.config().timezone,
            );
            let record_id = self
                .policies()
                .create_policy_payment(draft)
                .await
                .map_err(upstream("create_policy_payment", &policy.policy_id))?;
            mapping.push(line.id.clone(), record_id);
            self.write_invoice_mapping(&invoice.id, &mapping).await?;
        }

        Ok(Outcome::Completed)
    }

    pub(crate) async fn on_invoice_paid(
        &self,
        invoice: &Invoice,
    ) -> Result<Outcome, ReconcileError> {
        if invoice.amount_due.is_zero() {
            return Ok(Outcome::Skipped("zero-amount invoice settles itself"));
        }

        let Some(mapping) = self.invoice_mapping_with_retry(invoice).await? else {
            warn!(invoice = %invoice.id, "paid invoice has no payment mapping");
            return Ok(Outcome::Skipped("no payment mapping on paid invoice"));
        };

        let now = Utc::now();
        let mut updates = Vec::with_capacity(invoice.lines.len());
        for line in &invoice.lines {
            let record_id = mapping.payment_for(&line.id).ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    &invoice.id,
                    format!("line {} missing from payment mapping", line.id),
                )
            })?;
            updates.push(PaymentUpdate::successful(record_id.clone(), now));
        }
        self.policies()
            .update_payments(updates)
            .await
            .map_err(upstream("update_payments", &invoice.id))?;

        Ok(Outcome::Completed)
    }

    pub(crate) async fn on_invoice_payment_failed(
        &self,
        invoice: &Invoice,
    ) -> Result<Outcome, ReconcileError> {
        let mapping = self
            .invoice_mapping_with_retry(invoice)
            .await?
            .ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    &invoice.id,
                    "failed invoice has no payment mapping",
                )
            })?;
        let policy = self.policy_for_invoice(invoice).await?;

        for line in &invoice.lines {
            let record_id = mapping.payment_for(&line.id).ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    &invoice.id,
                    format!("line {} missing from payment mapping", line.id),
                )
            })?;
            self.policies()
                .trigger_notification(
                    &policy.policy_id,
                    FAILED_PAYMENT_NOTIFICATION,
                    Some(record_id),
                )
                .await
                .map_err(upstream("trigger_notification", &policy.policy_id))?;
        }

        Ok(Outcome::Completed)
    }

    /// Voided or uncollectible: the payments will never arrive
    pub(crate) async fn on_invoice_uncollected(
        &self,
        invoice: &Invoice,
    ) -> Result<Outcome, ReconcileError> {
        let mapping = self
            .invoice_mapping_with_retry(invoice)
            .await?
            .ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    &invoice.id,
                    "uncollected invoice has no payment mapping",
                )
            })?;

        let reason = invoice
            .last_finalization_error
            .clone()
            .unwrap_or_else(|| "payment failed to collect".to_string());

        let mut updates = Vec::with_capacity(invoice.lines.len());
        for line in &invoice.lines {
            let record_id = mapping.payment_for(&line.id).ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    &invoice.id,
                    format!("line {} missing from payment mapping", line.id),
                )
            })?;
            updates.push(PaymentUpdate::failed(
                record_id.clone(),
                reason.clone(),
                FailureAction::BlockPaymentMethod,
            ));
        }
        self.policies()
            .update_payments(updates)
            .await
            .map_err(upstream("update_payments", &invoice.id))?;

        Ok(Outcome::Completed)
    }
}
