pub mod inbox;
pub mod publish;
pub mod transport;
pub mod worker;

pub use publish::{publish_with_confirm, PublishOutcome};
pub use transport::{NostrTransport, OutgoingRumor, RelayAck, Transport, WrapReceipt};
pub use worker::{WalletCommand, WalletWorker};
