pub mod conversation;
pub mod dedup;
pub mod history;
pub mod ledger;
pub mod persistence;
pub mod tokens;

pub use conversation::Conversation;
pub use dedup::DedupIndex;
pub use history::PaymentHistory;
pub use ledger::LedgerStore;
pub use persistence::{MemoryStore, Persistence};
pub use tokens::TokenStore;
