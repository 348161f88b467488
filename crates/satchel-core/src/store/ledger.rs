use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::models::{CredoPromise, PromiseDirection};

/// Bilateral promise/settlement bookkeeping.
///
/// Balances are read-side projections recomputed on every query; nothing
/// denormalized is cached or persisted.
#[derive(Default)]
pub struct LedgerStore {
    promises: HashMap<String, CredoPromise>,
    applied_settlements: HashSet<String>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_promise(&self, promise_id: &str) -> bool {
        self.promises.contains_key(promise_id)
    }

    pub fn get(&self, promise_id: &str) -> Option<&CredoPromise> {
        self.promises.get(promise_id)
    }

    pub fn promises(&self) -> impl Iterator<Item = &CredoPromise> {
        self.promises.values()
    }

    /// Insert a promise if its id is unknown. Returns whether it was new.
    pub fn insert_promise(&mut self, promise: CredoPromise) -> bool {
        if self.promises.contains_key(&promise.id) {
            return false;
        }
        self.promises.insert(promise.id.clone(), promise);
        true
    }

    /// Apply a settlement to its referenced promise. A settlement already
    /// applied (by its own identity) is a no-op; one referencing an unknown
    /// promise is a ledger conflict the caller ignores.
    pub fn apply_settlement(
        &mut self,
        settlement_id: &str,
        promise_id: &str,
        amount: u64,
        settled_at: u64,
    ) -> Result<u64, CoreError> {
        if self.applied_settlements.contains(settlement_id) {
            let remaining = self
                .promises
                .get(promise_id)
                .map(|p| p.remaining_amount())
                .unwrap_or(0);
            return Ok(remaining);
        }
        let promise = self
            .promises
            .get_mut(promise_id)
            .ok_or_else(|| CoreError::UnknownPromise(promise_id.to_string()))?;
        promise.apply_settlement(amount, settled_at);
        self.applied_settlements.insert(settlement_id.to_string());
        Ok(promise.remaining_amount())
    }

    /// Mark a settlement identity as already applied without touching any
    /// promise. Used for settlements generated locally, so their own echoes
    /// from the network are no-ops.
    pub fn register_applied(&mut self, settlement_id: &str) {
        self.applied_settlements.insert(settlement_id.to_string());
    }

    pub fn is_applied(&self, settlement_id: &str) -> bool {
        self.applied_settlements.contains(settlement_id)
    }

    /// Sum of remaining amounts on active, unexpired promises the local
    /// identity issued. Compared against the configured cap on issuance.
    pub fn outstanding_given(&self, now: u64) -> u64 {
        self.promises
            .values()
            .filter(|p| p.direction == PromiseDirection::Given)
            .map(|p| p.outstanding(now))
            .sum()
    }

    /// Credit a counterparty has extended to the local identity: remaining
    /// amounts on their unexpired promises to me.
    pub fn available_credit_from(&self, counterparty: &str, now: u64) -> u64 {
        self.promises
            .values()
            .filter(|p| p.direction == PromiseDirection::Received && p.counterparty == counterparty)
            .map(|p| p.outstanding(now))
            .sum()
    }

    /// Net position toward one counterparty: what they owe me minus what I
    /// owe them, unexpired entries only.
    pub fn net_position(&self, counterparty: &str, now: u64) -> i64 {
        let owed_to_me: u64 = self
            .promises
            .values()
            .filter(|p| p.direction == PromiseDirection::Received && p.counterparty == counterparty)
            .map(|p| p.outstanding(now))
            .sum();
        let owed_by_me: u64 = self
            .promises
            .values()
            .filter(|p| p.direction == PromiseDirection::Given && p.counterparty == counterparty)
            .map(|p| p.outstanding(now))
            .sum();
        owed_to_me as i64 - owed_by_me as i64
    }

    /// Consume credit the counterparty extended to us, oldest promises
    /// first, up to `amount`. Returns the per-promise amounts consumed, so
    /// the caller can notify the counterparty of each reduction.
    pub fn consume_credit_from(
        &mut self,
        counterparty: &str,
        amount: u64,
        now: u64,
    ) -> Vec<(String, u64)> {
        let mut ids: Vec<(u64, String)> = self
            .promises
            .values()
            .filter(|p| {
                p.direction == PromiseDirection::Received
                    && p.counterparty == counterparty
                    && p.outstanding(now) > 0
            })
            .map(|p| (p.created_at, p.id.clone()))
            .collect();
        ids.sort();

        let mut left = amount;
        let mut consumed = Vec::new();
        for (_, id) in ids {
            if left == 0 {
                break;
            }
            if let Some(promise) = self.promises.get_mut(&id) {
                let take = left.min(promise.remaining_amount());
                if take > 0 {
                    promise.apply_settlement(take, now);
                    consumed.push((id, take));
                    left -= take;
                }
            }
        }
        consumed
    }
}
