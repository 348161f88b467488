pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod reconcile;
pub mod relay;
pub mod store;
pub mod wallet;

// Re-export the embedding surface at the crate root for convenience
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use events::CoreEvent;
pub use relay::{WalletCommand, WalletWorker};
pub use wallet::{MintGateway, SettlementCore};
