//! Collection domain: reconciles policy billing state with the payment
//! processor.
//!
//! The [`engine::ReconciliationEngine`] consumes events from both sides
//! of the integration and drives the processor objects (customers,
//! schedules, subscriptions, invoices) and the Policy Service's payment
//! records back into agreement. All I/O goes through the two port traits
//! in [`ports`]; the engine itself holds no connections.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod objects;
pub mod ports;

pub use config::{CollectionConfig, RetryPolicy};
pub use engine::{Outcome, ReconciliationEngine};
pub use error::ReconcileError;
pub use events::{AlterationHook, AlterationPackage, BillingField, PolicyEvent, ProcessorEvent};
pub use ports::{PaymentServicePort, PolicyServicePort};
