pub mod mint;
pub mod settlement;

pub use mint::{MeltOutcome, MintChange, MintGateway, ParsedToken};
pub use settlement::{PaymentReceipt, SettlementCore};
