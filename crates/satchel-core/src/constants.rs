//! Application-wide constants
//!
//! Centralized location for magic values that are used across
//! multiple modules.

use std::time::Duration;

/// Tag name carrying the locally generated correlation token that lets a
/// sender recognise its own echo before the wrap id is known.
pub const CLIENT_TOKEN_TAG: &str = "client-token";

/// How long to wait for relay acknowledgements on a single broadcast round.
pub const PUBLISH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed backoff between the first broadcast round and the single retry.
pub const PUBLISH_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Bounded window in which a lost-ack publish may still be confirmed by
/// observing the wrap id echoed back from the network.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(10);

/// Poll interval while watching for an echo during the confirmation window.
pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout for the history backfill query issued when a conversation opens.
pub const BACKFILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the process-lifetime dedup index. Older duplicates are
/// still caught by content-based matching in the reconciler.
pub const GLOBAL_DEDUP_CAP: usize = 512;

/// How many persisted wrap ids seed the global dedup index at startup.
pub const GLOBAL_DEDUP_SEED: usize = 256;

/// Default cap on the payment history log (most-recent-N).
pub const DEFAULT_PAYMENT_HISTORY_CAP: usize = 200;

/// Default cap on total outstanding given IOU, in the ledger's base unit.
pub const DEFAULT_IOU_CAP: u64 = 10_000;

/// Payload type discriminators for IOU messages.
pub const PROMISE_PAYLOAD_TYPE: &str = "credo/promise";
pub const SETTLEMENT_PAYLOAD_TYPE: &str = "credo/settlement";
