use std::collections::HashMap;

use crate::models::{token_identity, EcashToken};

/// Bearer token holdings, keyed by blob identity.
#[derive(Default)]
pub struct TokenStore {
    tokens: Vec<EcashToken>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this blob's identity is already known, in any state. Error
    /// and soft-deleted rows still block re-import.
    pub fn contains_blob(&self, blob: &str) -> bool {
        let identity = token_identity(blob);
        self.tokens.iter().any(|t| t.identity == identity)
    }

    /// Insert a token unless its identity is already known. Returns whether
    /// it was stored.
    pub fn insert(&mut self, token: EcashToken) -> bool {
        if self.tokens.iter().any(|t| t.identity == token.identity) {
            return false;
        }
        self.tokens.push(token);
        true
    }

    pub fn tokens(&self) -> &[EcashToken] {
        &self.tokens
    }

    /// Spendable total per mint. Tokens without a known mint are excluded
    /// from funding selection.
    pub fn spendable_by_mint(&self) -> HashMap<String, u64> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        for token in self.tokens.iter().filter(|t| t.is_spendable()) {
            if let (Some(mint), Some(amount)) = (&token.mint, token.amount) {
                *totals.entry(mint.clone()).or_insert(0) += amount;
            }
        }
        totals
    }

    pub fn spendable_total(&self) -> u64 {
        self.spendable_by_mint().values().sum()
    }

    /// Ids of the spendable holdings at one mint.
    pub fn holdings_at(&self, mint: &str) -> Vec<EcashToken> {
        self.tokens
            .iter()
            .filter(|t| t.is_spendable() && t.mint.as_deref() == Some(mint))
            .cloned()
            .collect()
    }

    /// Soft-delete the spent holdings and, when the melt left change,
    /// insert the single new holding that supersedes them.
    pub fn supersede(&mut self, spent_ids: &[String], change: Option<EcashToken>) {
        for token in self.tokens.iter_mut() {
            if spent_ids.iter().any(|id| *id == token.id) {
                token.is_deleted = true;
            }
        }
        if let Some(change) = change {
            self.insert(change);
        }
    }
}
