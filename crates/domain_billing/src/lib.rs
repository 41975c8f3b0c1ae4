//! Billing Domain - State mapping between policies and the payment processor
//!
//! This crate holds the pure billing logic of the reconciliation system:
//!
//! - **Billing profile & linkage** ([`profile`]): the policy-side billing
//!   attributes and the `app_data` linkage the engine owns.
//! - **Billing State Mapper** ([`schedule`]): translates billing frequency,
//!   premium, and cover dates into processor price and two-phase
//!   subscription-schedule parameters.
//! - **Proration & Refund Calculator** ([`proration`]): months-remaining,
//!   cancellation proration eligibility, and downgrade refund selection.
//! - **Invoice ↔ payment mapping** ([`mapping`]): the metadata ledger
//!   correlating processor invoice line items with policy payment records.
//! - **Payment Record Adapter** ([`payment`]): converts processor invoice,
//!   refund, and ad-hoc objects into Policy Service payment shapes.
//!
//! Everything here is synchronous and side-effect free; the orchestration
//! lives in `domain_collection`.

pub mod error;
pub mod invoice;
pub mod mapping;
pub mod payment;
pub mod profile;
pub mod proration;
pub mod schedule;

pub use error::BillingError;
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus};
pub use mapping::{InvoicePaymentMap, MappingEntry};
pub use payment::{
    FailureAction, PaymentDraft, PaymentStatus, PaymentType, PaymentUpdate, PremiumType,
};
pub use profile::{AppData, BillingFrequency, BillingLinkage, LinkageState, PolicyBillingProfile};
pub use proration::{ChargeCandidate, RefundDecision};
pub use schedule::{
    BillingAnchor, CorrelationMetadata, EndBehavior, PriceInterval, PriceSpec, ProrationBehavior,
    SchedulePhaseSpec, SchedulePhaseUpdate, ScheduleSpec,
};
