use serde::{Deserialize, Serialize};

use super::content::{classify, MessageContent};
use super::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// `Pending` only ever moves to `Sent`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Sent,
}

/// One entry in a conversation.
///
/// Created optimistically on user send (pending, no wrap id) or on first
/// observation of a transport event (sent, wrap id set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Local, stable id. A `pending-` nanosecond id until the rumor id is
    /// known, then the rumor id hex.
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub content: String,
    /// Network-observable gift-wrap id, once published or observed.
    pub wrap_id: Option<String>,
    /// Correlation token embedded in the outbound payload before sealing,
    /// used to match an outbound message to its own echo.
    pub client_token: Option<String>,
    /// Sender public key (npub).
    pub sender: String,
    /// Seconds since the unix epoch.
    pub created_at: u64,
    pub status: MessageStatus,
    /// True for messages queued while offline that still await a publish.
    pub local_only: bool,
    /// Payment classification, evaluated once at creation and cached here so
    /// it is never re-parsed on a read path.
    pub classification: MessageContent,
}

impl Message {
    /// Create the optimistic local copy of an outbound message.
    pub fn new_outbound_pending(
        conversation_id: &str,
        sender: &str,
        content: String,
        client_token: String,
    ) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let classification = classify(&content);
        Self {
            id: format!("pending-{nanos}"),
            conversation_id: conversation_id.to_string(),
            direction: Direction::Outbound,
            content,
            wrap_id: None,
            client_token: Some(client_token),
            sender: sender.to_string(),
            created_at: now_secs(),
            status: MessageStatus::Pending,
            local_only: true,
            classification,
        }
    }

    /// Create a message from a transport event observed on the network.
    pub fn from_observed(
        conversation_id: &str,
        direction: Direction,
        sender: &str,
        rumor_id: &str,
        wrap_id: &str,
        client_token: Option<String>,
        content: String,
        created_at: u64,
    ) -> Self {
        let classification = classify(&content);
        Self {
            id: rumor_id.to_string(),
            conversation_id: conversation_id.to_string(),
            direction,
            content,
            wrap_id: Some(wrap_id.to_string()),
            client_token,
            sender: sender.to_string(),
            created_at,
            status: MessageStatus::Sent,
            local_only: false,
            classification,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Pending -> sent transition once an echo or publish confirmation
    /// attaches the network identity. The reverse never happens.
    pub fn mark_sent(&mut self, rumor_id: &str, wrap_id: &str) {
        self.id = rumor_id.to_string();
        self.wrap_id = Some(wrap_id.to_string());
        self.status = MessageStatus::Sent;
        self.local_only = false;
    }
}
