use crate::models::{Direction, Message};

use super::dedup::DedupIndex;

/// The authoritative local message list for one conversation, plus the
/// conversation-scoped dedup index seeded from persisted history.
pub struct Conversation {
    pub id: String,
    messages: Vec<Message>,
    pub seen_wraps: DedupIndex,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            seen_wraps: DedupIndex::unbounded(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn contains_rumor(&self, rumor_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == rumor_id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Pending outbound message carrying this correlation token, if any. At
    /// most one pending outbound message exists per token.
    pub fn find_outbound_by_token(&mut self, token: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| {
            m.direction == Direction::Outbound && m.client_token.as_deref() == Some(token)
        })
    }

    /// Fallback match for senders without correlation tokens: an outbound
    /// message with identical content that has not yet been attached to a
    /// network identity.
    pub fn find_outbound_by_content(&mut self, content: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| {
            m.direction == Direction::Outbound && m.wrap_id.is_none() && m.content == content
        })
    }

    pub fn pending_outbound(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(|m| m.direction == Direction::Outbound && m.is_pending())
    }

    /// Insert keeping `created_at` order. Fast paths for the common
    /// append/prepend cases, binary search for the middle.
    pub fn insert_sorted(&mut self, message: Message) {
        if self.messages.is_empty()
            || message.created_at >= self.messages[self.messages.len() - 1].created_at
        {
            self.messages.push(message);
        } else if message.created_at <= self.messages[0].created_at {
            self.messages.insert(0, message);
        } else {
            let idx = self
                .messages
                .partition_point(|m| m.created_at <= message.created_at);
            self.messages.insert(idx, message);
        }
    }
}
