//! Routing of reconciled inbox traffic to the presentation layer.
//!
//! The subscription stream covers every conversation at once; this module
//! decides which events a reconciliation result produces, and raises
//! attention and notifications for conversations the user is not looking at.

use crate::events::CoreEvent;
use crate::models::{ContactBook, Direction, MessageContent};
use crate::reconcile::Applied;

/// Short preview for a notification body. Payment payloads never leak their
/// JSON into a notification.
fn preview(content: &str, classification: &MessageContent) -> String {
    match classification {
        MessageContent::BearerToken { .. } => "sent you ecash".to_string(),
        MessageContent::Promise(p) => format!("promised you {} {}", p.amount, p.unit),
        MessageContent::Settlement(_) => "settled a promise".to_string(),
        MessageContent::PlainText => {
            let mut body: String = content.chars().take(80).collect();
            if content.chars().count() > 80 {
                body.push('\u{2026}');
            }
            body
        }
    }
}

/// Display name for a sender: contact name when known, shortened key
/// otherwise.
fn display_name(contacts: &ContactBook, pubkey: &str) -> String {
    contacts
        .resolve(pubkey)
        .and_then(|c| c.name)
        .unwrap_or_else(|| pubkey.chars().take(12).collect())
}

/// Turn one reconciliation result into the events the worker forwards.
pub fn events_for_applied(
    applied: Applied,
    open_conversation: Option<&str>,
    contacts: &ContactBook,
) -> Vec<CoreEvent> {
    match applied {
        Applied::Duplicate => Vec::new(),
        Applied::Confirmed { old_id, message } => vec![CoreEvent::MessageUpdated {
            conversation_id: message.conversation_id.clone(),
            old_id,
            message,
        }],
        Applied::Created(message) => {
            let mut events = Vec::new();
            let is_open = open_conversation == Some(message.conversation_id.as_str());
            if message.direction == Direction::Inbound && !is_open {
                events.push(CoreEvent::ConversationAttention {
                    conversation_id: message.conversation_id.clone(),
                });
                events.push(CoreEvent::Notification {
                    title: display_name(contacts, &message.sender),
                    body: preview(&message.content, &message.classification),
                });
            }
            events.push(CoreEvent::MessageAdded {
                conversation_id: message.conversation_id.clone(),
                message,
            });
            events
        }
    }
}
