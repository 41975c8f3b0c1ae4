//! Payment intent settlement
//!
//! Intents the engine creates (ad-hoc collections, once-off premiums)
//! carry the policy payment record id in their metadata; settlement events
//! close the loop by updating that record. Updates are idempotent on the
//! Policy Service side, so replayed events are harmless.

use chrono::Utc;

use core_kernel::PaymentRecordId;
use domain_billing::payment::PaymentUpdate;
use domain_billing::schedule::ROOT_PAYMENT_ID_KEY;
use domain_billing::FailureAction;

use crate::error::{upstream, ReconcileError};
use crate::objects::PaymentIntent;

use super::{Outcome, ReconciliationEngine};

impl ReconciliationEngine {
    pub(crate) async fn on_payment_intent_succeeded(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Outcome, ReconcileError> {
        let record_id = root_payment_id(intent)?;
        self.policies()
            .update_payments(vec![PaymentUpdate::successful(record_id, Utc::now())])
            .await
            .map_err(upstream("update_payments", &intent.id))?;
        Ok(Outcome::Completed)
    }

    pub(crate) async fn on_payment_intent_failed(
        &self,
        intent: &PaymentIntent,
    ) -> Result<Outcome, ReconcileError> {
        let record_id = root_payment_id(intent)?;
        let reason = intent
            .last_payment_error
            .clone()
            .unwrap_or_else(|| "payment failed".to_string());
        self.policies()
            .update_payments(vec![PaymentUpdate::failed(
                record_id,
                reason,
                FailureAction::AllowRetry,
            )])
            .await
            .map_err(upstream("update_payments", &intent.id))?;
        Ok(Outcome::Completed)
    }
}

fn root_payment_id(intent: &PaymentIntent) -> Result<PaymentRecordId, ReconcileError> {
    intent
        .metadata
        .get(ROOT_PAYMENT_ID_KEY)
        .map(|id| PaymentRecordId::new(id.clone()))
        .ok_or_else(|| {
            ReconcileError::missing_metadata("payment_intent", &intent.id, "no rootPaymentId")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionConfig, RetryPolicy};
    use crate::objects::PaymentIntentStatus;
    use crate::ports::mock::{MockPaymentService, MockPolicyService};
    use crate::ports::PolicyServicePort;
    use chrono::NaiveDate;
    use core_kernel::{Currency, Money, PaymentIntentId, PolicyId};
    use domain_billing::PaymentStatus;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn engine_with(
        policies: Arc<MockPolicyService>,
    ) -> ReconciliationEngine {
        let config = CollectionConfig {
            metadata_retry: RetryPolicy::immediate(2),
            ..CollectionConfig::default()
        };
        ReconciliationEngine::new(Arc::new(MockPaymentService::new()), policies, config)
    }

    async fn pending_payment(policies: &MockPolicyService) -> core_kernel::PaymentRecordId {
        let draft = domain_billing::payment::adhoc_payment(
            &PolicyId::new("pol_1"),
            "claim_excess",
            "Windscreen excess",
            Money::from_minor(50_00, Currency::ZAR),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        );
        policies.create_policy_payment(draft).await.unwrap()
    }

    fn intent(record_id: Option<&core_kernel::PaymentRecordId>, error: Option<&str>) -> PaymentIntent {
        let mut metadata = HashMap::new();
        if let Some(id) = record_id {
            metadata.insert(ROOT_PAYMENT_ID_KEY.to_string(), id.to_string());
        }
        PaymentIntent {
            id: PaymentIntentId::new("pi_1"),
            amount: Money::from_minor(50_00, Currency::ZAR),
            status: PaymentIntentStatus::Succeeded,
            last_payment_error: error.map(str::to_string),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_succeeded_intent_finalizes_record() {
        let policies = Arc::new(MockPolicyService::new());
        let record_id = pending_payment(&policies).await;
        let engine = engine_with(policies.clone());

        let outcome = engine
            .on_payment_intent_succeeded(&intent(Some(&record_id), None))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            policies.payment(&record_id).await.unwrap().status,
            PaymentStatus::Successful
        );
    }

    #[tokio::test]
    async fn test_replayed_success_is_idempotent() {
        let policies = Arc::new(MockPolicyService::new());
        let record_id = pending_payment(&policies).await;
        let engine = engine_with(policies.clone());

        let event = intent(Some(&record_id), None);
        engine.on_payment_intent_succeeded(&event).await.unwrap();
        engine.on_payment_intent_succeeded(&event).await.unwrap();
        assert_eq!(
            policies.payment(&record_id).await.unwrap().status,
            PaymentStatus::Successful
        );
    }

    #[tokio::test]
    async fn test_failed_intent_allows_retry() {
        let policies = Arc::new(MockPolicyService::new());
        let record_id = pending_payment(&policies).await;
        let engine = engine_with(policies.clone());

        engine
            .on_payment_intent_failed(&intent(Some(&record_id), Some("insufficient funds")))
            .await
            .unwrap();

        let stored = policies.payment(&record_id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(
            stored.failure_reason.as_deref(),
            Some("insufficient funds")
        );
    }

    #[tokio::test]
    async fn test_intent_without_record_metadata_is_fatal() {
        let engine = engine_with(Arc::new(MockPolicyService::new()));
        let result = engine.on_payment_intent_succeeded(&intent(None, None)).await;
        assert!(matches!(
            result,
            Err(ReconcileError::MissingMetadata { .. })
        ));
    }
}
