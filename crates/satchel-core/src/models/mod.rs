pub mod contact;
pub mod content;
pub mod ledger;
pub mod message;
pub mod payment;
pub mod token;

pub use contact::{Contact, ContactBook};
pub use content::{classify, MessageContent, PromisePayload, SettlementPayload};
pub use ledger::{CredoPromise, CredoSettlement, PromiseDirection};
pub use message::{Direction, Message, MessageStatus};
pub use payment::{PaymentDirection, PaymentEvent, PaymentOutcome};
pub use token::{token_identity, EcashToken, TokenState};

/// Current unix time in seconds.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
