use futures::future::BoxFuture;

use crate::error::Result;
use crate::models::EcashToken;

/// Result of parsing and swapping a received token blob at its mint.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    pub mint: String,
    pub unit: String,
    pub amount: u64,
}

/// Proofs left over after a melt, already swapped into fresh denominations.
#[derive(Debug, Clone)]
pub struct MintChange {
    pub blob: String,
    pub amount: u64,
}

/// What a successful melt cost and returned.
#[derive(Debug, Clone)]
pub struct MeltOutcome {
    pub paid_amount: u64,
    pub fee: u64,
    pub change: Option<MintChange>,
}

/// Seam to the mint protocol.
///
/// The settlement core never talks HTTP; everything that touches a mint goes
/// through this trait so funding selection and fallback can be exercised
/// against scripted mints.
pub trait MintGateway: Send + Sync {
    /// Parse a token blob and swap its proofs into the local wallet. A blob
    /// the mint refuses (spent, malformed) comes back as
    /// [`crate::error::CoreError::TokenRejected`].
    fn receive_token<'a>(&'a self, blob: &'a str) -> BoxFuture<'a, Result<ParsedToken>>;

    /// Melt holdings at one mint to pay a lightning invoice for `amount`.
    /// The gateway spends from `holdings` and returns any change.
    fn melt<'a>(
        &'a self,
        mint: &'a str,
        holdings: &'a [EcashToken],
        invoice: &'a str,
        amount: u64,
    ) -> BoxFuture<'a, Result<MeltOutcome>>;

    /// Whether the mint advertises multi-path payment support. Used only as
    /// an ordering preference, never as a hard filter.
    fn supports_mpp<'a>(&'a self, mint: &'a str) -> BoxFuture<'a, bool>;
}
