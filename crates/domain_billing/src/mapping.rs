//! Invoice ↔ payment record mapping
//!
//! Persisted as processor-side invoice metadata under
//! [`ASSOCIATED_PAYMENTS_KEY`]: an ordered JSON array of
//! `{invoiceLineItemId, rootPaymentId}` entries. Written entry-by-entry as
//! payment records are created, so a failure partway leaves a shorter but
//! still valid mapping. Every later invoice-state event resolves its line
//! items through this map; a missing entry there is a hard error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use core_kernel::{LineItemId, PaymentRecordId};

use crate::error::BillingError;

/// Invoice metadata key holding the serialized mapping
pub const ASSOCIATED_PAYMENTS_KEY: &str = "associatedRootPaymentIds";

/// One line-item-to-payment correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub invoice_line_item_id: LineItemId,
    pub root_payment_id: PaymentRecordId,
}

/// The ordered mapping for one invoice
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoicePaymentMap {
    entries: Vec<MappingEntry>,
}

impl InvoicePaymentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the mapping out of invoice metadata
    ///
    /// `Ok(None)` when the key is absent (the mapping was never written, or
    /// the processor's asynchronous metadata write has not landed yet);
    /// `Err` when the key is present but unparseable.
    pub fn from_metadata(
        metadata: &HashMap<String, String>,
    ) -> Result<Option<Self>, BillingError> {
        let Some(raw) = metadata.get(ASSOCIATED_PAYMENTS_KEY) else {
            return Ok(None);
        };
        let entries: Vec<MappingEntry> = serde_json::from_str(raw)
            .map_err(|e| BillingError::MalformedMapping(e.to_string()))?;
        Ok(Some(Self { entries }))
    }

    /// Serializes the mapping for an invoice metadata write
    pub fn to_metadata_value(&self) -> Result<String, BillingError> {
        serde_json::to_string(&self.entries)
            .map_err(|e| BillingError::MalformedMapping(e.to_string()))
    }

    /// Appends an entry; ordering follows payment creation order
    pub fn push(&mut self, line_item_id: LineItemId, payment_id: PaymentRecordId) {
        self.entries.push(MappingEntry {
            invoice_line_item_id: line_item_id,
            root_payment_id: payment_id,
        });
    }

    /// The payment record mapped to a line item, if any
    pub fn payment_for(&self, line_item_id: &LineItemId) -> Option<&PaymentRecordId> {
        self.entries
            .iter()
            .find(|e| &e.invoice_line_item_id == line_item_id)
            .map(|e| &e.root_payment_id)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_order() {
        let mut map = InvoicePaymentMap::new();
        map.push(LineItemId::new("il_1"), PaymentRecordId::new("pay_1"));
        map.push(LineItemId::new("il_2"), PaymentRecordId::new("pay_2"));

        let mut metadata = HashMap::new();
        metadata.insert(
            ASSOCIATED_PAYMENTS_KEY.to_string(),
            map.to_metadata_value().unwrap(),
        );

        let parsed = InvoicePaymentMap::from_metadata(&metadata).unwrap().unwrap();
        assert_eq!(parsed, map);
        assert_eq!(parsed.entries()[0].invoice_line_item_id, LineItemId::new("il_1"));
        assert_eq!(parsed.entries()[1].root_payment_id, PaymentRecordId::new("pay_2"));
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let mut map = InvoicePaymentMap::new();
        map.push(LineItemId::new("il_1"), PaymentRecordId::new("pay_1"));
        let raw = map.to_metadata_value().unwrap();
        assert_eq!(
            raw,
            r#"[{"invoiceLineItemId":"il_1","rootPaymentId":"pay_1"}]"#
        );
    }

    #[test]
    fn test_absent_key_is_none() {
        let metadata = HashMap::new();
        assert_eq!(InvoicePaymentMap::from_metadata(&metadata).unwrap(), None);
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let mut metadata = HashMap::new();
        metadata.insert(ASSOCIATED_PAYMENTS_KEY.to_string(), "not json".to_string());
        assert!(matches!(
            InvoicePaymentMap::from_metadata(&metadata),
            Err(BillingError::MalformedMapping(_))
        ));
    }

    #[test]
    fn test_lookup_by_line_item() {
        let mut map = InvoicePaymentMap::new();
        map.push(LineItemId::new("il_1"), PaymentRecordId::new("pay_1"));

        assert_eq!(
            map.payment_for(&LineItemId::new("il_1")),
            Some(&PaymentRecordId::new("pay_1"))
        );
        assert_eq!(map.payment_for(&LineItemId::new("il_missing")), None);
    }
}
