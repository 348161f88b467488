use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    Pending,
    Accepted,
    Error,
}

/// A bearer value holding.
///
/// A token is identified by its blob content, not by `id`; re-import of the
/// same blob is a duplicate, never a new holding. Only `Accepted` tokens
/// contribute to spendable balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcashToken {
    pub id: String,
    /// Opaque serialized token blob, valid by possession.
    pub blob: String,
    /// Content hash of the blob; the uniqueness key.
    pub identity: String,
    pub mint: Option<String>,
    pub unit: String,
    /// Positive amount, unknown until the blob has been parsed.
    pub amount: Option<u64>,
    pub state: TokenState,
    pub error: Option<String>,
    pub is_deleted: bool,
}

/// Content identity of a token blob.
pub fn token_identity(blob: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(blob.trim().as_bytes());
    hex::encode(hasher.finalize())
}

impl EcashToken {
    pub fn accepted(id: String, blob: String, mint: String, unit: String, amount: u64) -> Self {
        let identity = token_identity(&blob);
        Self {
            id,
            blob,
            identity,
            mint: Some(mint),
            unit,
            amount: Some(amount),
            state: TokenState::Accepted,
            error: None,
            is_deleted: false,
        }
    }

    /// A token the mint rejected stays visible to the user with the failure
    /// reason rather than being silently dropped.
    pub fn errored(id: String, blob: String, reason: String) -> Self {
        let identity = token_identity(&blob);
        Self {
            id,
            blob,
            identity,
            mint: None,
            unit: String::new(),
            amount: None,
            state: TokenState::Error,
            error: Some(reason),
            is_deleted: false,
        }
    }

    pub fn is_spendable(&self) -> bool {
        self.state == TokenState::Accepted && !self.is_deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_across_surrounding_whitespace() {
        assert_eq!(token_identity("cashuAabc"), token_identity("  cashuAabc\n"));
        assert_ne!(token_identity("cashuAabc"), token_identity("cashuAabd"));
    }

    #[test]
    fn error_tokens_never_count_as_spendable() {
        let tok = EcashToken::errored("t1".into(), "cashuAbad".into(), "already spent".into());
        assert!(!tok.is_spendable());
        assert_eq!(tok.error.as_deref(), Some("already spent"));
    }

    #[test]
    fn deleted_tokens_are_not_spendable() {
        let mut tok = EcashToken::accepted(
            "t1".into(),
            "cashuAok".into(),
            "https://mint.example".into(),
            "sat".into(),
            100,
        );
        assert!(tok.is_spendable());
        tok.is_deleted = true;
        assert!(!tok.is_spendable());
    }
}
