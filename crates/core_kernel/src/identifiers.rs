//! Strongly-typed identifiers for policy-side and processor-side entities
//!
//! Both external services hand out opaque string identifiers (`pol_…`,
//! `sub_…`, `in_…`, …). Newtype wrappers prevent accidental mixing of
//! identifier classes across the port boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(PolicyId, "Policy Service policy identifier");
define_id!(PolicyholderId, "Policy Service policyholder identifier");
define_id!(PaymentRecordId, "Policy Service payment record identifier");
define_id!(
    PaymentMethodRecordId,
    "Policy Service payment method identifier"
);
define_id!(CustomerId, "Payment Service customer identifier");
define_id!(SubscriptionId, "Payment Service subscription identifier");
define_id!(ScheduleId, "Payment Service subscription schedule identifier");
define_id!(PriceId, "Payment Service price identifier");
define_id!(ProductId, "Payment Service product identifier");
define_id!(InvoiceId, "Payment Service invoice identifier");
define_id!(LineItemId, "Payment Service invoice line item identifier");
define_id!(ChargeId, "Payment Service charge identifier");
define_id!(PaymentIntentId, "Payment Service payment intent identifier");
define_id!(
    ProcessorPaymentMethodId,
    "Payment Service payment method identifier"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        let id = SubscriptionId::new("sub_123");
        assert_eq!(id.to_string(), "sub_123");
        assert_eq!(id.as_str(), "sub_123");
    }

    #[test]
    fn test_serde_transparent() {
        let id = PolicyId::new("pol_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pol_abc\"");

        let back: PolicyId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_are_distinct_types() {
        // Compile-time property; equality only holds within a class
        let a = ChargeId::new("ch_1");
        let b = ChargeId::from("ch_1");
        assert_eq!(a, b);
    }
}
