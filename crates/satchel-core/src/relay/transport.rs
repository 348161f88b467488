use futures::future::BoxFuture;
use nostr_sdk::prelude::*;

use crate::constants::CLIENT_TOKEN_TAG;
use crate::error::{CoreError, Result};

/// What one relay did with a broadcast before the ack window closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAck {
    Acked,
    TimedOut,
    /// Explicit refusal with the relay's reason. Never retried.
    Rejected(String),
}

/// Result of sealing and broadcasting one rumor.
#[derive(Debug, Clone)]
pub struct WrapReceipt {
    /// Id of the gift wrap produced by this broadcast. A new wrap id is
    /// minted on every attempt, including retries of the same rumor.
    pub wrap_id: String,
    /// Id of the inner rumor, stable across attempts.
    pub rumor_id: String,
    /// Per-relay outcome, one entry per relay the pool broadcast to.
    pub relays: Vec<(String, RelayAck)>,
}

impl WrapReceipt {
    /// At least one relay holds the wrap; delivery is assured.
    pub fn any_acked(&self) -> bool {
        self.relays.iter().any(|(_, ack)| *ack == RelayAck::Acked)
    }

    /// Every relay went silent. The only situation that warrants a retry.
    pub fn all_timed_out(&self) -> bool {
        !self.relays.is_empty() && self.relays.iter().all(|(_, ack)| *ack == RelayAck::TimedOut)
    }

    pub fn first_rejection(&self) -> Option<&str> {
        self.relays.iter().find_map(|(_, ack)| match ack {
            RelayAck::Rejected(reason) => Some(reason.as_str()),
            _ => None,
        })
    }
}

/// An outbound direct message before sealing.
#[derive(Debug, Clone)]
pub struct OutgoingRumor {
    /// Recipient npub.
    pub recipient: String,
    pub content: String,
    /// Correlation token embedded as a tag inside the sealed rumor so the
    /// sender recognises its own echo.
    pub client_token: String,
}

/// Seam between the publish protocol and the relay pool.
pub trait Transport: Send + Sync {
    /// Seal the rumor for its recipient and broadcast the wrap to every
    /// relay in the pool.
    fn send_wrapped(&self, rumor: OutgoingRumor) -> BoxFuture<'_, Result<WrapReceipt>>;

    /// Seal a copy of the rumor to the local identity so other devices (and
    /// a future restore) can recover the sent side of the conversation.
    fn send_self_copy(&self, rumor: OutgoingRumor) -> BoxFuture<'_, Result<()>>;
}

/// Production transport over a relay pool.
pub struct NostrTransport {
    client: Client,
    sender: PublicKey,
}

impl NostrTransport {
    pub fn new(client: Client, sender: PublicKey) -> Self {
        Self { client, sender }
    }

    fn build_rumor(&self, recipient: PublicKey, rumor: &OutgoingRumor) -> Result<UnsignedEvent> {
        let unsigned = EventBuilder::private_msg_rumor(recipient, rumor.content.clone())
            .tag(Tag::custom(
                TagKind::Custom(CLIENT_TOKEN_TAG.into()),
                [rumor.client_token.clone()],
            ))
            .build(self.sender);
        Ok(unsigned)
    }

    fn recipient_key(rumor: &OutgoingRumor) -> Result<PublicKey> {
        PublicKey::parse(&rumor.recipient)
            .map_err(|e| CoreError::Transport(format!("invalid recipient key: {e}")))
    }
}

/// The relay pool reports failures as strings; silence-until-deadline reads
/// as a timeout, anything else is an explicit refusal.
fn classify_failure(reason: &str) -> RelayAck {
    if reason.to_ascii_lowercase().contains("timeout") {
        RelayAck::TimedOut
    } else {
        RelayAck::Rejected(reason.to_string())
    }
}

impl Transport for NostrTransport {
    fn send_wrapped(&self, rumor: OutgoingRumor) -> BoxFuture<'_, Result<WrapReceipt>> {
        Box::pin(async move {
            let recipient = Self::recipient_key(&rumor)?;
            let unsigned = self.build_rumor(recipient, &rumor)?;
            let rumor_id = unsigned
                .id
                .ok_or_else(|| CoreError::Transport("rumor id missing after build".into()))?
                .to_hex();

            let output = self
                .client
                .gift_wrap(&recipient, unsigned, [])
                .await
                .map_err(|e| CoreError::Transport(e.to_string()))?;

            let wrap_id = output.id().to_hex();
            let mut relays: Vec<(String, RelayAck)> = output
                .success
                .iter()
                .map(|url| (url.to_string(), RelayAck::Acked))
                .collect();
            for (url, reason) in &output.failed {
                relays.push((url.to_string(), classify_failure(reason)));
            }

            Ok(WrapReceipt {
                wrap_id,
                rumor_id,
                relays,
            })
        })
    }

    fn send_self_copy(&self, rumor: OutgoingRumor) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let recipient = Self::recipient_key(&rumor)?;
            let unsigned = self.build_rumor(recipient, &rumor)?;
            self.client
                .gift_wrap(&self.sender, unsigned, [])
                .await
                .map_err(|e| CoreError::Transport(e.to_string()))?;
            Ok(())
        })
    }
}
