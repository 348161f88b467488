use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_IOU_CAP, DEFAULT_PAYMENT_HISTORY_CAP};

/// Configuration for the wallet core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Relay URLs the worker connects and broadcasts to.
    pub relays: Vec<String>,
    /// Mint tried first when selecting funding for an outgoing payment.
    pub preferred_mint: Option<String>,
    /// Hard cap on the sum of active, unexpired promises issued by the local
    /// identity. Issuance that would exceed it is refused.
    pub iou_outstanding_cap: u64,
    /// Most-recent-N bound on the local payment history log.
    pub payment_history_cap: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            preferred_mint: None,
            iou_outstanding_cap: DEFAULT_IOU_CAP,
            payment_history_cap: DEFAULT_PAYMENT_HISTORY_CAP,
        }
    }
}
