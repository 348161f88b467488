use serde::{Deserialize, Serialize};

use crate::constants::{PROMISE_PAYLOAD_TYPE, SETTLEMENT_PAYLOAD_TYPE};

/// A bilateral credit grant carried inside a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromisePayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub promise_id: String,
    pub issuer: String,
    pub recipient: String,
    pub amount: u64,
    pub unit: String,
    pub expires_at: u64,
}

/// A partial or full repayment referencing exactly one promise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub settlement_id: String,
    pub promise_id: String,
    pub amount: u64,
}

/// Tagged classification of a message body, evaluated once per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    BearerToken { blob: String },
    Promise(PromisePayload),
    Settlement(SettlementPayload),
    PlainText,
}

impl MessageContent {
    pub fn is_payment(&self) -> bool {
        !matches!(self, MessageContent::PlainText)
    }
}

/// Classify a message body as a bearer token, a promise, a settlement, or
/// plain text. A body that fails to parse as any payment shape is plain text;
/// classification never errors.
pub fn classify(content: &str) -> MessageContent {
    let trimmed = content.trim();

    // Bearer tokens are self-describing serialized blobs ("cashuA...",
    // "cashuB..."). The opaque parser decides whether the blob is valid;
    // classification only routes it.
    if trimmed.starts_with("cashu") && trimmed.len() > 10 && !trimmed.contains(char::is_whitespace)
    {
        return MessageContent::BearerToken {
            blob: trimmed.to_string(),
        };
    }

    if trimmed.starts_with('{') {
        if let Ok(promise) = serde_json::from_str::<PromisePayload>(trimmed) {
            if promise.payload_type == PROMISE_PAYLOAD_TYPE {
                return MessageContent::Promise(promise);
            }
        }
        if let Ok(settlement) = serde_json::from_str::<SettlementPayload>(trimmed) {
            if settlement.payload_type == SETTLEMENT_PAYLOAD_TYPE {
                return MessageContent::Settlement(settlement);
            }
        }
    }

    MessageContent::PlainText
}
