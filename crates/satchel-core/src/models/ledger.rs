use serde::{Deserialize, Serialize};

/// Whether a promise is credit the local identity granted or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseDirection {
    /// I owe the counterparty.
    Given,
    /// The counterparty owes me.
    Received,
}

/// A bilateral credit instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredoPromise {
    pub id: String,
    pub issuer: String,
    pub recipient: String,
    pub amount: u64,
    pub unit: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub settled_amount: Option<u64>,
    pub settled_at: Option<u64>,
    pub direction: PromiseDirection,
    pub counterparty: String,
}

/// A repayment applied to exactly one promise. Stored for idempotence; the
/// amount lives on the promise's `settled_amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredoSettlement {
    pub id: String,
    pub promise_id: String,
    pub amount: u64,
    pub settled_at: u64,
}

impl CredoPromise {
    /// Amount still owed, clamped at zero. Does not consider expiry; see
    /// [`CredoPromise::outstanding`] for balance arithmetic.
    pub fn remaining_amount(&self) -> u64 {
        self.amount.saturating_sub(self.settled_amount.unwrap_or(0))
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// What this promise contributes to an outstanding-balance sum: the
    /// remaining amount, or zero once expired regardless of the arithmetic.
    pub fn outstanding(&self, now: u64) -> u64 {
        if self.is_expired(now) {
            0
        } else {
            self.remaining_amount()
        }
    }

    /// Apply a settlement. Settlements only ever reduce the remaining
    /// amount; the applied portion is capped at what is left.
    pub fn apply_settlement(&mut self, amount: u64, settled_at: u64) {
        let applied = amount.min(self.remaining_amount());
        self.settled_amount = Some(self.settled_amount.unwrap_or(0) + applied);
        self.settled_at = Some(settled_at);
    }
}
