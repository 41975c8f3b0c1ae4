//! Charge-level money movement
//!
//! Refunds and dispute withdrawals move money outside the invoice
//! lifecycle, so they get their own mirroring: a refund becomes a negative
//! reversal record, a dispute marks every payment under the charge's
//! invoice as failed.

use domain_billing::payment::{self, PaymentUpdate};
use domain_billing::FailureAction;

use crate::error::{upstream, ReconcileError};
use crate::objects::{Charge, Dispute};

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_charge_refunded(
        &self,
        charge: &Charge,
    ) -> Result<Outcome, ReconcileError> {
        let Some(invoice_id) = &charge.invoice else {
            return Ok(Outcome::Skipped("charge not invoice-linked"));
        };
        let invoice = self
            .payments()
            .retrieve_invoice(invoice_id)
            .await
            .map_err(upstream("retrieve_invoice", invoice_id))?;
        let policy = self.policy_for_invoice(&invoice).await?;

        let draft = payment::payment_for_charge_refund(
            &policy.policy_id,
            &charge.id,
            charge.amount_refunded,
            charge.created,
            self.config().timezone,
        );
        self.policies()
            .create_policy_payment(draft)
            .await
            .map_err(upstream("create_policy_payment", &policy.policy_id))?;

        Ok(Outcome::Completed)
    }

    pub(crate) async fn on_dispute_funds_withdrawn(
        &self,
        dispute: &Dispute,
    ) -> Result<Outcome, ReconcileError> {
        let charge = self
            .payments()
            .retrieve_charge(&dispute.charge)
            .await
            .map_err(upstream("retrieve_charge", &dispute.charge))?;
        let invoice_id = charge.invoice.as_ref().ok_or_else(|| {
            ReconcileError::missing_metadata("charge", &charge.id, "disputed charge has no invoice")
        })?;
        let invoice = self
            .payments()
            .retrieve_invoice(invoice_id)
            .await
            .map_err(upstream("retrieve_invoice", invoice_id))?;

        let mapping = self
            .invoice_mapping_with_retry(&invoice)
            .await?
            .ok_or_else(|| {
                ReconcileError::missing_metadata(
                    "invoice",
                    invoice_id,
                    "disputed invoice has no payment mapping",
                )
            })?;

        let reason = dispute
            .reason
            .clone()
            .unwrap_or_else(|| "dispute funds withdrawn".to_string());
        let updates: Vec<PaymentUpdate> = mapping
            .entries()
            .iter()
            .map(|entry| {
                PaymentUpdate::failed(
                    entry.root_payment_id.clone(),
                    reason.clone(),
                    FailureAction::BlockPaymentMethod,
                )
            })
            .collect();
        self.policies()
            .update_payments(updates)
            .await
            .map_err(upstream("update_payments", invoice_id))?;

        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, RetryPolicy};
    use crate::objects::{ChargeStatus, Subscription, SubscriptionStatus};
    use crate::ports::mock::{MockPaymentService, MockPolicyService};
    use crate::ports::PolicyServicePort;
    use chrono::NaiveDate;
    use core_kernel::{
        ChargeId, Currency, CustomerId, InvoiceId, Money, PolicyId, PolicyholderId,
        SubscriptionId,
    };
    use domain_billing::mapping::ASSOCIATED_PAYMENTS_KEY;
    use domain_billing::profile::{AppData, BillingFrequency};
    use domain_billing::schedule::ROOT_POLICY_ID_KEY;
    use domain_billing::{Invoice, InvoiceStatus, PaymentStatus, PaymentType, PolicyBillingProfile};
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn linked_engine() -> (
        ReconciliationEngine,
        Arc<MockPaymentService>,
        Arc<MockPolicyService>,
    ) {
        let payments = Arc::new(MockPaymentService::new());
        let policies = Arc::new(MockPolicyService::new());
        policies
            .insert_policy(PolicyBillingProfile {
                policy_id: PolicyId::new("pol_1"),
                policy_number: "P-1001".to_string(),
                policyholder_id: PolicyholderId::new("ph_1"),
                policyholder_name: "N Dlamini".to_string(),
                monthly_premium: Money::from_minor(25_00, Currency::ZAR),
                billing_frequency: BillingFrequency::Monthly,
                billing_day: Some(1),
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                end_date: None,
                claimed_against: false,
                app_data: AppData::default(),
            })
            .await;
        payments
            .insert_subscription(Subscription {
                id: SubscriptionId::new("sub_1"),
                customer: CustomerId::new("cus_1"),
                status: SubscriptionStatus::Active,
                items: vec![],
                default_payment_method: None,
                latest_invoice: None,
                metadata: HashMap::from([(
                    ROOT_POLICY_ID_KEY.to_string(),
                    "pol_1".to_string(),
                )]),
            })
            .await;
        payments
            .insert_invoice(Invoice {
                id: InvoiceId::new("in_1"),
                customer: Some(CustomerId::new("cus_1")),
                subscription: Some(SubscriptionId::new("sub_1")),
                status: InvoiceStatus::Paid,
                amount_due: Money::from_minor(25_00, Currency::ZAR),
                created: 1_700_000_000,
                lines: vec![],
                metadata: HashMap::new(),
                last_finalization_error: None,
            })
            .await;
        let config = CollectionConfig {
            metadata_retry: RetryPolicy::immediate(2),
            ..CollectionConfig::default()
        };
        let engine = ReconciliationEngine::new(payments.clone(), policies.clone(), config);
        (engine, payments, policies)
    }

    fn refunded_charge() -> Charge {
        Charge {
            id: ChargeId::new("ch_1"),
            customer: Some(CustomerId::new("cus_1")),
            invoice: Some(InvoiceId::new("in_1")),
            amount: Money::from_minor(25_00, Currency::ZAR),
            amount_refunded: Money::from_minor(25_00, Currency::ZAR),
            status: ChargeStatus::Succeeded,
            refunded: true,
            created: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_refund_creates_negative_reversal() {
        let (engine, _payments, policies) = linked_engine().await;

        let outcome = engine.on_charge_refunded(&refunded_charge()).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let records = policies.payments_in_order().await;
        assert_eq!(records.len(), 1);
        let draft = &records[0].1.draft;
        assert_eq!(draft.amount, Money::from_minor(-25_00, Currency::ZAR));
        assert_eq!(draft.payment_type, PaymentType::Reversal);
        assert_eq!(records[0].1.status, PaymentStatus::Successful);
    }

    #[tokio::test]
    async fn test_refund_without_invoice_is_skipped() {
        let (engine, _payments, policies) = linked_engine().await;
        let mut charge = refunded_charge();
        charge.invoice = None;

        let outcome = engine.on_charge_refunded(&charge).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(policies.payments_in_order().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispute_fails_all_mapped_payments() {
        let (engine, payments, policies) = linked_engine().await;
        payments.insert_charge(refunded_charge()).await;

        let draft = domain_billing::payment::adhoc_payment(
            &PolicyId::new("pol_1"),
            "premium",
            "test",
            Money::from_minor(25_00, Currency::ZAR),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        );
        let pay_1 = policies.create_policy_payment(draft).await.unwrap();
        {
            let mut invoices = payments.invoices.write().await;
            invoices.get_mut(&InvoiceId::new("in_1")).unwrap().metadata = HashMap::from([(
                ASSOCIATED_PAYMENTS_KEY.to_string(),
                format!(
                    r#"[{{"invoiceLineItemId":"il_1","rootPaymentId":"{}"}}]"#,
                    pay_1
                ),
            )]);
        }

        let dispute = Dispute {
            id: "dp_1".to_string(),
            charge: ChargeId::new("ch_1"),
            reason: Some("fraudulent".to_string()),
        };
        engine.on_dispute_funds_withdrawn(&dispute).await.unwrap();

        let stored = policies.payment(&pay_1).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("fraudulent"));
    }

    #[tokio::test]
    async fn test_dispute_without_mapping_is_fatal() {
        let (engine, payments, _policies) = linked_engine().await;
        payments.insert_charge(refunded_charge()).await;

        let dispute = Dispute {
            id: "dp_1".to_string(),
            charge: ChargeId::new("ch_1"),
            reason: None,
        };
        let result = engine.on_dispute_funds_withdrawn(&dispute).await;
        assert!(matches!(
            result,
            Err(ReconcileError::MissingMetadata { .. })
        ));
    }
}
