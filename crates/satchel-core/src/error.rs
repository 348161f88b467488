use thiserror::Error;

/// Error taxonomy for the wallet core.
///
/// Transport failures are recoverable and drive the retry/queue path; parse
/// and acceptance failures degrade a single item; ledger conflicts refuse the
/// action before anything is applied. Nothing here is fatal to the process.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no relay acknowledged the event before the confirmation window closed")]
    PublishTimedOut,

    #[error("relay rejected the event: {0}")]
    Rejected(String),

    #[error("mint rejected token: {0}")]
    TokenRejected(String),

    #[error("settlement references unknown promise {0}")]
    UnknownPromise(String),

    #[error("promise issuance refused: outstanding {outstanding} + {requested} exceeds cap {cap}")]
    IouCapExceeded {
        outstanding: u64,
        requested: u64,
        cap: u64,
    },

    #[error("no mint holds enough balance: {available} available of {required} required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("every candidate mint failed to settle the payment")]
    MintsExhausted,

    #[error("not connected to any relay")]
    NotConnected,

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
