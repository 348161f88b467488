//! Publish-retry-confirm protocol for outbound wraps.
//!
//! One broadcast round, at most one retry, and only when every relay went
//! silent. A hard rejection is final: resending a wrap a relay refused just
//! burns the rejection again. After a silent retry the rumor may still have
//! landed (acks get lost, not just events), so a bounded confirmation window
//! watches for the wrap echoing back before the send is declared unresolved.

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::constants::{
    CONFIRM_POLL_INTERVAL, CONFIRM_WINDOW, PUBLISH_ACK_TIMEOUT, PUBLISH_RETRY_BACKOFF,
};
use crate::error::{CoreError, Result};

use super::transport::{OutgoingRumor, Transport, WrapReceipt};

/// Terminal state of one publish attempt.
#[derive(Debug)]
pub enum PublishOutcome {
    /// At least one relay acknowledged the wrap, or its echo was observed.
    Acknowledged { rumor_id: String, wrap_id: String },
    /// Both rounds went silent and no echo arrived inside the window. The
    /// message stays pending and is eligible for a later flush.
    TimedOutPendingConfirmation { rumor_id: String, wrap_id: String },
    /// Hard rejection or transport failure. Never retried here.
    Failed(CoreError),
}

/// Broadcast a rumor and drive it to a terminal outcome.
///
/// `confirmed` checks whether a wrap id has been folded into local state by
/// the subscription stream, which confirms delivery even when every ack was
/// lost.
pub async fn publish_with_confirm<F>(
    transport: &dyn Transport,
    rumor: OutgoingRumor,
    confirmed: F,
) -> PublishOutcome
where
    F: Fn(&str) -> bool,
{
    let first = match broadcast_round(transport, rumor.clone()).await {
        Ok(receipt) => receipt,
        Err(e) => return PublishOutcome::Failed(e),
    };
    if first.any_acked() {
        return PublishOutcome::Acknowledged {
            rumor_id: first.rumor_id,
            wrap_id: first.wrap_id,
        };
    }
    if !first.all_timed_out() {
        let reason = first.first_rejection().unwrap_or("no relays in pool");
        warn!(rumor_id = %first.rumor_id, %reason, "publish rejected");
        return PublishOutcome::Failed(CoreError::Rejected(reason.to_string()));
    }

    debug!(rumor_id = %first.rumor_id, "all relays silent, retrying once");
    sleep(PUBLISH_RETRY_BACKOFF).await;

    let second = match broadcast_round(transport, rumor).await {
        Ok(receipt) => receipt,
        Err(e) => return PublishOutcome::Failed(e),
    };
    if second.any_acked() {
        return PublishOutcome::Acknowledged {
            rumor_id: second.rumor_id,
            wrap_id: second.wrap_id,
        };
    }
    if !second.all_timed_out() {
        let reason = second.first_rejection().unwrap_or("no relays in pool");
        warn!(rumor_id = %second.rumor_id, %reason, "publish rejected on retry");
        return PublishOutcome::Failed(CoreError::Rejected(reason.to_string()));
    }

    // Either attempt may have landed without an ack. Watch for the echo.
    let deadline = Instant::now() + CONFIRM_WINDOW;
    while Instant::now() < deadline {
        if confirmed(&first.wrap_id) {
            return PublishOutcome::Acknowledged {
                rumor_id: first.rumor_id,
                wrap_id: first.wrap_id,
            };
        }
        if confirmed(&second.wrap_id) {
            return PublishOutcome::Acknowledged {
                rumor_id: second.rumor_id,
                wrap_id: second.wrap_id,
            };
        }
        sleep(CONFIRM_POLL_INTERVAL).await;
    }

    PublishOutcome::TimedOutPendingConfirmation {
        rumor_id: second.rumor_id,
        wrap_id: second.wrap_id,
    }
}

/// One seal-and-broadcast round, bounded so a hung relay pool cannot pin the
/// publish task forever.
async fn broadcast_round(transport: &dyn Transport, rumor: OutgoingRumor) -> Result<WrapReceipt> {
    match timeout(PUBLISH_ACK_TIMEOUT, transport.send_wrapped(rumor)).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::PublishTimedOut),
    }
}
