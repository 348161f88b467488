use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{CredoPromise, CredoSettlement, EcashToken, Message, PaymentEvent};

/// Durable storage seam for the stores.
///
/// Everything in memory is authoritative while the process runs; persistence
/// exists for seeding at startup and for surviving restarts with pending
/// outbound messages intact.
pub trait Persistence: Send + Sync {
    fn save_message<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>>;
    fn load_messages<'a>(&'a self, conversation_id: &'a str)
        -> BoxFuture<'a, Result<Vec<Message>>>;
    /// Wrap ids of recently persisted messages, newest last. Seeds the
    /// bounded global dedup index at startup.
    fn recent_wrap_ids(&self, limit: usize) -> BoxFuture<'_, Result<Vec<String>>>;
    /// Outbound messages still awaiting a publish, across all conversations.
    /// Feeds the automatic re-drain after a reconnect.
    fn load_pending_messages(&self) -> BoxFuture<'_, Result<Vec<Message>>>;
    fn save_token<'a>(&'a self, token: &'a EcashToken) -> BoxFuture<'a, Result<()>>;
    fn load_tokens(&self) -> BoxFuture<'_, Result<Vec<EcashToken>>>;
    fn save_promise<'a>(&'a self, promise: &'a CredoPromise) -> BoxFuture<'a, Result<()>>;
    fn load_promises(&self) -> BoxFuture<'_, Result<Vec<CredoPromise>>>;
    /// Applied settlement identities. Loaded at startup so re-deliveries of
    /// an already-applied settlement stay no-ops across restarts.
    fn save_settlement<'a>(&'a self, settlement: &'a CredoSettlement) -> BoxFuture<'a, Result<()>>;
    fn load_settlements(&self) -> BoxFuture<'_, Result<Vec<CredoSettlement>>>;
    fn save_payment<'a>(&'a self, payment: &'a PaymentEvent) -> BoxFuture<'a, Result<()>>;
    fn load_payments(&self) -> BoxFuture<'_, Result<Vec<PaymentEvent>>>;
}

/// In-memory persistence, used by tests and as the default until a disk
/// backend is wired in by the embedding application.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    messages: HashMap<String, Vec<Message>>,
    tokens: Vec<EcashToken>,
    promises: Vec<CredoPromise>,
    settlements: Vec<CredoSettlement>,
    payments: Vec<PaymentEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryStore {
    fn save_message<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            let list = inner
                .messages
                .entry(message.conversation_id.clone())
                .or_default();
            // Saving a message that changed id (pending -> sent) replaces the
            // pending row rather than duplicating it.
            if let Some(existing) = list.iter_mut().find(|m| {
                m.id == message.id
                    || (m.is_pending()
                        && m.client_token.is_some()
                        && m.client_token == message.client_token)
            }) {
                *existing = message.clone();
            } else {
                list.push(message.clone());
            }
            Ok(())
        })
    }

    fn load_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Message>>> {
        Box::pin(async move {
            let inner = self.inner.lock();
            let mut list = inner
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_default();
            list.sort_by_key(|m| m.created_at);
            Ok(list)
        })
    }

    fn recent_wrap_ids(&self, limit: usize) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let inner = self.inner.lock();
            let mut rows: Vec<(u64, String)> = inner
                .messages
                .values()
                .flatten()
                .filter_map(|m| m.wrap_id.clone().map(|w| (m.created_at, w)))
                .collect();
            rows.sort();
            let skip = rows.len().saturating_sub(limit);
            Ok(rows.into_iter().skip(skip).map(|(_, w)| w).collect())
        })
    }

    fn load_pending_messages(&self) -> BoxFuture<'_, Result<Vec<Message>>> {
        Box::pin(async move {
            let inner = self.inner.lock();
            Ok(inner
                .messages
                .values()
                .flatten()
                .filter(|m| m.is_pending())
                .cloned()
                .collect())
        })
    }

    fn save_token<'a>(&'a self, token: &'a EcashToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.tokens.iter_mut().find(|t| t.id == token.id) {
                *existing = token.clone();
            } else {
                inner.tokens.push(token.clone());
            }
            Ok(())
        })
    }

    fn load_tokens(&self) -> BoxFuture<'_, Result<Vec<EcashToken>>> {
        Box::pin(async move { Ok(self.inner.lock().tokens.clone()) })
    }

    fn save_promise<'a>(&'a self, promise: &'a CredoPromise) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.promises.iter_mut().find(|p| p.id == promise.id) {
                *existing = promise.clone();
            } else {
                inner.promises.push(promise.clone());
            }
            Ok(())
        })
    }

    fn load_promises(&self) -> BoxFuture<'_, Result<Vec<CredoPromise>>> {
        Box::pin(async move { Ok(self.inner.lock().promises.clone()) })
    }

    fn save_settlement<'a>(&'a self, settlement: &'a CredoSettlement) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock();
            if !inner.settlements.iter().any(|s| s.id == settlement.id) {
                inner.settlements.push(settlement.clone());
            }
            Ok(())
        })
    }

    fn load_settlements(&self) -> BoxFuture<'_, Result<Vec<CredoSettlement>>> {
        Box::pin(async move { Ok(self.inner.lock().settlements.clone()) })
    }

    fn save_payment<'a>(&'a self, payment: &'a PaymentEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.lock().payments.push(payment.clone());
            Ok(())
        })
    }

    fn load_payments(&self) -> BoxFuture<'_, Result<Vec<PaymentEvent>>> {
        Box::pin(async move { Ok(self.inner.lock().payments.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    #[tokio::test]
    async fn saving_a_confirmed_message_replaces_its_pending_row() {
        let store = MemoryStore::new();
        let mut msg =
            Message::new_outbound_pending("npub1bob", "npub1alice", "hi".into(), "tok-1".into());
        store.save_message(&msg).await.unwrap();

        msg.mark_sent("rumor-1", "wrap-1");
        store.save_message(&msg).await.unwrap();

        let loaded = store.load_messages("npub1bob").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "rumor-1");
    }

    #[tokio::test]
    async fn recent_wrap_ids_returns_newest_last_up_to_limit() {
        let store = MemoryStore::new();
        for i in 0..4u64 {
            let msg = Message::from_observed(
                "npub1bob",
                Direction::Inbound,
                "npub1bob",
                &format!("rumor-{i}"),
                &format!("wrap-{i}"),
                None,
                "hi".into(),
                1_700_000_000 + i,
            );
            store.save_message(&msg).await.unwrap();
        }
        let wraps = store.recent_wrap_ids(2).await.unwrap();
        assert_eq!(wraps, vec!["wrap-2", "wrap-3"]);
    }
}
