//! Core Kernel - Foundational types for the billing reconciliation system
//!
//! This crate provides the building blocks shared by the billing domain and
//! the reconciliation engine:
//! - Money types with precise decimal arithmetic over minor currency units
//! - Temporal helpers for calendar-month billing arithmetic
//! - Strongly-typed identifiers for policy-side and processor-side objects
//! - Port abstractions for the two external collaborator services

pub mod error;
pub mod identifiers;
pub mod money;
pub mod ports;
pub mod temporal;

pub use error::CoreError;
pub use identifiers::{
    ChargeId, CustomerId, InvoiceId, LineItemId, PaymentIntentId, PaymentMethodRecordId,
    PaymentRecordId, PolicyId, PolicyholderId, PriceId, ProcessorPaymentMethodId, ProductId,
    ScheduleId, SubscriptionId,
};
pub use money::{Currency, Money, MoneyError};
pub use ports::{DomainPort, PortError};
pub use temporal::{
    add_months, local_timestamp, months_between, next_occurrence, TemporalError,
};
