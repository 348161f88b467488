use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    Settled,
    Failed(String),
}

/// One entry in the capped local payment history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub amount: u64,
    pub fee: u64,
    pub mint: Option<String>,
    pub direction: PaymentDirection,
    pub outcome: PaymentOutcome,
    pub at: u64,
}
