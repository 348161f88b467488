//! Folds observed transport events into the authoritative local message
//! lists.
//!
//! Every gift-wrapped event, whether it arrives from a live subscription, a
//! history backfill, or the inbox scanner, goes through [`Reconciler::apply`]
//! exactly once per observation. The reconciler decides whether the event is
//! a duplicate, confirms a pending outbound message, or creates a new entry.
//! All mutation happens behind one lock held by the worker, so concurrent
//! arrivals of the same event collapse to a single state change.

use std::collections::HashMap;

use tracing::debug;

use crate::constants::GLOBAL_DEDUP_CAP;
use crate::models::{Direction, Message};
use crate::store::{Conversation, DedupIndex};

/// A decrypted transport event, normalized before reconciliation.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Outer gift-wrap event id, unique per observation on the network.
    pub wrap_id: String,
    /// Inner rumor id, stable across wraps of the same message.
    pub rumor_id: String,
    /// Conversation key: the counterparty's npub.
    pub conversation_id: String,
    /// Author of the inner rumor.
    pub sender: String,
    /// True when the local identity authored the rumor (an echo of our own
    /// send, possibly from another device).
    pub outbound: bool,
    /// Correlation token embedded by the sending device, if present.
    pub client_token: Option<String>,
    pub content: String,
    pub created_at: u64,
}

/// What applying one observation did to the conversation.
#[derive(Debug)]
pub enum Applied {
    /// Already folded in; nothing changed.
    Duplicate,
    /// A pending outbound message was matched and promoted to sent.
    Confirmed { old_id: String, message: Message },
    /// A brand new entry was created.
    Created(Message),
}

/// Conversation-scoped message state plus the process-lifetime dedup index.
pub struct Reconciler {
    conversations: HashMap<String, Conversation>,
    /// Bounded index shared across conversations; catches re-observations
    /// from the inbox scanner for conversations that are not open.
    global_wraps: DedupIndex,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
            global_wraps: DedupIndex::bounded(GLOBAL_DEDUP_CAP),
        }
    }

    /// Seed the global dedup index from persisted history so a restart does
    /// not re-create messages for wraps already folded in.
    pub fn seed_global<I: IntoIterator<Item = String>>(&mut self, wrap_ids: I) {
        self.global_wraps.seed(wrap_ids);
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.get_mut(id)
    }

    pub fn ensure_conversation(&mut self, id: &str) -> &mut Conversation {
        self.conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id))
    }

    /// Hydrate a conversation from persisted messages, seeding its dedup
    /// index from their wrap ids.
    pub fn open_conversation(&mut self, id: &str, messages: Vec<Message>) {
        let convo = self.ensure_conversation(id);
        for message in messages {
            if let Some(wrap) = &message.wrap_id {
                convo.seen_wraps.record(wrap);
            }
            if !convo.contains_rumor(&message.id) {
                convo.insert_sorted(message);
            }
        }
    }

    /// Insert the optimistic local copy of an outbound send.
    pub fn insert_pending(&mut self, message: Message) {
        let id = message.conversation_id.clone();
        self.ensure_conversation(&id).insert_sorted(message);
    }

    /// Attach the network identity to a pending message after a relay
    /// acknowledged its publish. Returns the updated message, or `None` when
    /// an echo already confirmed it (the ack lost the race).
    pub fn confirm_publish(
        &mut self,
        conversation_id: &str,
        local_id: &str,
        rumor_id: &str,
        wrap_id: &str,
    ) -> Option<Message> {
        let convo = self.conversations.get_mut(conversation_id)?;
        convo.seen_wraps.record(wrap_id);
        self.global_wraps.record(wrap_id);
        let message = convo.get_mut(local_id)?;
        if !message.is_pending() {
            return None;
        }
        message.mark_sent(rumor_id, wrap_id);
        Some(message.clone())
    }

    /// Cheap pre-unwrap check against the global index only. Re-deliveries
    /// caught here skip decryption entirely.
    pub fn seen_wrap(&self, wrap_id: &str) -> bool {
        self.global_wraps.seen(wrap_id)
    }

    /// Whether this wrap id has been folded into the conversation, used to
    /// decide if a lost-ack publish was confirmed by its own echo.
    pub fn wrap_confirmed(&self, conversation_id: &str, wrap_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .map(|c| c.seen_wraps.seen(wrap_id))
            .unwrap_or(false)
            || self.global_wraps.seen(wrap_id)
    }

    /// Fold one observed event into its conversation.
    pub fn apply(&mut self, incoming: IncomingMessage) -> Applied {
        if self.global_wraps.seen(&incoming.wrap_id) {
            return Applied::Duplicate;
        }
        let convo = self
            .conversations
            .entry(incoming.conversation_id.clone())
            .or_insert_with(|| Conversation::new(&incoming.conversation_id));
        if convo.seen_wraps.seen(&incoming.wrap_id) {
            return Applied::Duplicate;
        }

        // Same rumor under a different wrap (multi-relay re-delivery).
        if convo.contains_rumor(&incoming.rumor_id) {
            convo.seen_wraps.record(&incoming.wrap_id);
            self.global_wraps.record(&incoming.wrap_id);
            return Applied::Duplicate;
        }

        convo.seen_wraps.record(&incoming.wrap_id);
        self.global_wraps.record(&incoming.wrap_id);

        if incoming.outbound {
            // An echo of our own send. The correlation token is authoritative;
            // content matching is the fallback for wraps sealed without one.
            let matched_id = incoming
                .client_token
                .as_deref()
                .and_then(|token| convo.find_outbound_by_token(token).map(|m| m.id.clone()))
                .or_else(|| {
                    convo
                        .find_outbound_by_content(&incoming.content)
                        .map(|m| m.id.clone())
                });
            if let Some(old_id) = matched_id {
                if let Some(message) = convo.get_mut(&old_id) {
                    if !message.is_pending() {
                        debug!(wrap_id = %incoming.wrap_id, "echo for already-sent message");
                        return Applied::Duplicate;
                    }
                    message.mark_sent(&incoming.rumor_id, &incoming.wrap_id);
                    return Applied::Confirmed {
                        old_id,
                        message: message.clone(),
                    };
                }
            }

            // Sent from another device under the same identity.
            let message = Message::from_observed(
                &incoming.conversation_id,
                Direction::Outbound,
                &incoming.sender,
                &incoming.rumor_id,
                &incoming.wrap_id,
                incoming.client_token,
                incoming.content,
                incoming.created_at,
            );
            convo.insert_sorted(message.clone());
            return Applied::Created(message);
        }

        let message = Message::from_observed(
            &incoming.conversation_id,
            Direction::Inbound,
            &incoming.sender,
            &incoming.rumor_id,
            &incoming.wrap_id,
            incoming.client_token,
            incoming.content,
            incoming.created_at,
        );
        convo.insert_sorted(message.clone());
        Applied::Created(message)
    }
}
