//! Dedicated worker thread owning the relay client and all wallet state.
//!
//! The embedding application talks to the worker over a command channel and
//! listens on an event channel; nothing else touches the client, the
//! reconciler or the settlement core. The worker thread owns its own tokio
//! runtime and drives each command to completion with `block_on`, while
//! long-lived work (the subscription stream, publish confirmation) runs as
//! spawned tasks on the same runtime.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use anyhow::Result;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::constants::{BACKFILL_TIMEOUT, CLIENT_TOKEN_TAG, GLOBAL_DEDUP_SEED};
use crate::error::CoreError;
use crate::events::CoreEvent;
use crate::models::{Contact, ContactBook, Message};
use crate::reconcile::{Applied, IncomingMessage, Reconciler};
use crate::store::Persistence;
use crate::wallet::{MintGateway, SettlementCore};

use super::inbox::events_for_applied;
use super::publish::{publish_with_confirm, PublishOutcome};
use super::transport::{NostrTransport, OutgoingRumor, Transport};

/// Commands accepted by the worker thread.
pub enum WalletCommand {
    Connect {
        keys: Keys,
        response_tx: Option<Sender<std::result::Result<(), String>>>,
    },
    RegisterContact(Contact),
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation,
    SendText {
        recipient: String,
        content: String,
    },
    /// Re-publish every pending outbound message in a conversation.
    FlushPending {
        conversation_id: String,
    },
    ImportToken {
        blob: String,
    },
    Pay {
        recipient: String,
        invoice: String,
        amount: u64,
    },
    IssuePromise {
        recipient: String,
        amount: u64,
        expires_at: u64,
    },
    SettlePromise {
        recipient: String,
        promise_id: String,
        amount: u64,
    },
    Disconnect,
    Shutdown,
}

/// State shared between the command loop and spawned tasks.
struct Shared {
    reconciler: Mutex<Reconciler>,
    contacts: ContactBook,
    open_conversation: Mutex<Option<String>>,
    event_tx: Sender<CoreEvent>,
    store: Arc<dyn Persistence>,
}

pub struct WalletWorker {
    config: CoreConfig,
    shared: Arc<Shared>,
    gateway: Arc<dyn MintGateway>,
    client: Option<Client>,
    keys: Option<Keys>,
    local_npub: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    settlement: Option<Arc<SettlementCore>>,
    command_rx: Receiver<WalletCommand>,
    rt_handle: Option<tokio::runtime::Handle>,
    cancel_tx: Option<watch::Sender<bool>>,
}

impl WalletWorker {
    pub fn new(
        config: CoreConfig,
        gateway: Arc<dyn MintGateway>,
        store: Arc<dyn Persistence>,
        event_tx: Sender<CoreEvent>,
        command_rx: Receiver<WalletCommand>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                reconciler: Mutex::new(Reconciler::new()),
                contacts: ContactBook::new(),
                open_conversation: Mutex::new(None),
                event_tx,
                store,
            }),
            gateway,
            client: None,
            keys: None,
            local_npub: None,
            transport: None,
            settlement: None,
            command_rx,
            rt_handle: None,
            cancel_tx: None,
        }
    }

    /// Command loop. Runs until `Shutdown` or until every command sender is
    /// dropped. Call on a dedicated thread.
    pub fn run(mut self) {
        let rt = Runtime::new().expect("failed to create tokio runtime");
        self.rt_handle = Some(rt.handle().clone());
        info!("wallet worker started");

        while let Ok(cmd) = self.command_rx.recv() {
            match cmd {
                WalletCommand::Connect { keys, response_tx } => {
                    let result = rt.block_on(self.handle_connect(keys));
                    if let Some(tx) = response_tx {
                        let _ = tx.send(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
                    }
                    if let Err(e) = result {
                        error!(error = %e, "connect failed");
                    }
                }
                WalletCommand::RegisterContact(contact) => {
                    self.shared.contacts.upsert(contact);
                }
                WalletCommand::OpenConversation { conversation_id } => {
                    if let Err(e) = rt.block_on(self.handle_open_conversation(conversation_id)) {
                        warn!(error = %e, "open conversation failed");
                    }
                }
                WalletCommand::CloseConversation => {
                    *self.shared.open_conversation.lock() = None;
                }
                WalletCommand::SendText { recipient, content } => {
                    if let Err(e) = rt.block_on(self.send_message(recipient, content)) {
                        warn!(error = %e, "send failed");
                    }
                }
                WalletCommand::FlushPending { conversation_id } => {
                    self.handle_flush_pending(&conversation_id);
                }
                WalletCommand::ImportToken { blob } => {
                    if let Err(e) = rt.block_on(self.handle_import_token(blob)) {
                        warn!(error = %e, "token import failed");
                    }
                }
                WalletCommand::Pay {
                    recipient,
                    invoice,
                    amount,
                } => {
                    if let Err(e) = rt.block_on(self.handle_pay(recipient, invoice, amount)) {
                        warn!(error = %e, "payment failed");
                    }
                }
                WalletCommand::IssuePromise {
                    recipient,
                    amount,
                    expires_at,
                } => {
                    if let Err(e) =
                        rt.block_on(self.handle_issue_promise(recipient, amount, expires_at))
                    {
                        warn!(error = %e, "promise issuance failed");
                    }
                }
                WalletCommand::SettlePromise {
                    recipient,
                    promise_id,
                    amount,
                } => {
                    if let Err(e) =
                        rt.block_on(self.handle_settle_promise(recipient, promise_id, amount))
                    {
                        warn!(error = %e, "settlement failed");
                    }
                }
                WalletCommand::Disconnect => {
                    rt.block_on(self.handle_disconnect());
                }
                WalletCommand::Shutdown => {
                    rt.block_on(self.handle_disconnect());
                    break;
                }
            }
        }
        info!("wallet worker stopped");
    }

    async fn handle_connect(&mut self, keys: Keys) -> Result<()> {
        let pk = keys.public_key();
        let npub = pk.to_bech32()?;

        let client = Client::new(keys.clone());
        for url in &self.config.relays {
            if let Err(e) = client.add_relay(url).await {
                warn!(%url, error = %e, "failed to add relay");
            }
        }
        client.connect().await;

        let filter = Filter::new().pubkey(pk).kind(Kind::GiftWrap);
        if let Err(e) = client.subscribe(filter, None).await {
            warn!(error = %e, "gift wrap subscription failed");
        }

        let settlement = Arc::new(SettlementCore::new(
            self.config.clone(),
            self.gateway.clone(),
            self.shared.store.clone(),
            npub.clone(),
        ));
        settlement.hydrate().await?;

        // Restart safety: wraps already folded in before the last shutdown
        // must not re-create messages.
        let seed = self.shared.store.recent_wrap_ids(GLOBAL_DEDUP_SEED).await?;
        self.shared.reconciler.lock().seed_global(seed);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.spawn_notification_handler(client.clone(), pk, settlement.clone(), cancel_rx);

        self.transport = Some(Arc::new(NostrTransport::new(client.clone(), pk)));
        self.client = Some(client);
        self.keys = Some(keys);
        self.local_npub = Some(npub);
        self.settlement = Some(settlement);
        self.cancel_tx = Some(cancel_tx);

        // Sends queued while offline go back through the publish path,
        // oldest first.
        let mut queued = self.shared.store.load_pending_messages().await?;
        queued.sort_by_key(|m| m.created_at);
        if !queued.is_empty() {
            info!(count = queued.len(), "re-draining queued sends");
        }
        for message in queued {
            let Some(client_token) = message.client_token.clone() else {
                continue;
            };
            {
                let mut reconciler = self.shared.reconciler.lock();
                let convo = reconciler.ensure_conversation(&message.conversation_id);
                if !convo.contains_rumor(&message.id) {
                    convo.insert_sorted(message.clone());
                }
            }
            self.spawn_publish(
                message.conversation_id.clone(),
                message.id.clone(),
                OutgoingRumor {
                    recipient: message.conversation_id.clone(),
                    content: message.content.clone(),
                    client_token,
                },
            );
        }

        info!("connected");
        Ok(())
    }

    async fn handle_disconnect(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        if let Some(client) = self.client.take() {
            client.disconnect().await;
        }
        self.transport = None;
    }

    fn spawn_notification_handler(
        &self,
        client: Client,
        my_pk: PublicKey,
        settlement: Arc<SettlementCore>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let shared = self.shared.clone();
        let rt_handle = self
            .rt_handle
            .as_ref()
            .expect("notification handler spawned before runtime init")
            .clone();
        rt_handle.spawn(async move {
            let mut notifications = client.notifications();
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            debug!("notification handler cancelled");
                            break;
                        }
                    }
                    result = notifications.recv() => {
                        match result {
                            Ok(RelayPoolNotification::Event { event, .. }) => {
                                if event.kind != Kind::GiftWrap {
                                    continue;
                                }
                                if let Err(e) =
                                    process_wrap(&shared, &settlement, &client, my_pk, &event).await
                                {
                                    debug!(error = %e, "failed to process wrap");
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!(error = %e, "notification stream closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    async fn handle_open_conversation(&self, conversation_id: String) -> Result<()> {
        let messages = self.shared.store.load_messages(&conversation_id).await?;
        *self.shared.open_conversation.lock() = Some(conversation_id.clone());
        self.shared
            .reconciler
            .lock()
            .open_conversation(&conversation_id, messages.clone());
        for message in messages {
            let _ = self.shared.event_tx.send(CoreEvent::MessageAdded {
                conversation_id: conversation_id.clone(),
                message,
            });
        }

        // History backfill: anything relays still hold that local state
        // missed goes through the same reconciliation as live traffic.
        if let (Some(client), Some(keys), Some(settlement)) =
            (&self.client, &self.keys, &self.settlement)
        {
            let filter = Filter::new().pubkey(keys.public_key()).kind(Kind::GiftWrap);
            match client.fetch_events(filter, BACKFILL_TIMEOUT).await {
                Ok(events) => {
                    for event in events {
                        if let Err(e) = process_wrap(
                            &self.shared,
                            settlement,
                            client,
                            keys.public_key(),
                            &event,
                        )
                        .await
                        {
                            debug!(error = %e, "failed to backfill wrap");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "history backfill failed"),
            }
        }
        Ok(())
    }

    /// Optimistic send: the pending message is inserted, persisted and
    /// announced before any network work, then a background task drives the
    /// publish to a terminal outcome.
    async fn send_message(&self, recipient: String, content: String) -> Result<()> {
        let local_npub = self
            .local_npub
            .clone()
            .ok_or(CoreError::NotConnected)?;
        let client_token = Uuid::new_v4().to_string();
        let message =
            Message::new_outbound_pending(&recipient, &local_npub, content.clone(), client_token.clone());

        self.shared.reconciler.lock().insert_pending(message.clone());
        self.shared.store.save_message(&message).await?;
        let _ = self.shared.event_tx.send(CoreEvent::MessageAdded {
            conversation_id: recipient.clone(),
            message: message.clone(),
        });

        self.spawn_publish(
            recipient.clone(),
            message.id,
            OutgoingRumor {
                recipient,
                content,
                client_token,
            },
        );
        Ok(())
    }

    fn spawn_publish(&self, conversation_id: String, local_id: String, rumor: OutgoingRumor) {
        let Some(transport) = self.transport.clone() else {
            debug!(%conversation_id, "no transport, message queued for flush");
            return;
        };
        let Some(rt_handle) = self.rt_handle.clone() else {
            return;
        };
        let shared = self.shared.clone();
        rt_handle.spawn(async move {
            let confirm_shared = shared.clone();
            let confirm_conversation = conversation_id.clone();
            let outcome = publish_with_confirm(transport.as_ref(), rumor.clone(), |wrap_id| {
                confirm_shared
                    .reconciler
                    .lock()
                    .wrap_confirmed(&confirm_conversation, wrap_id)
            })
            .await;

            match outcome {
                PublishOutcome::Acknowledged { rumor_id, wrap_id } => {
                    let updated = shared.reconciler.lock().confirm_publish(
                        &conversation_id,
                        &local_id,
                        &rumor_id,
                        &wrap_id,
                    );
                    if let Some(message) = updated {
                        if let Err(e) = shared.store.save_message(&message).await {
                            warn!(error = %e, "failed to persist confirmed message");
                        }
                        let _ = shared.event_tx.send(CoreEvent::MessageUpdated {
                            conversation_id: conversation_id.clone(),
                            old_id: local_id,
                            message,
                        });
                    }
                    // Mirror to our own inbox so other devices see the sent
                    // side. Best effort.
                    if let Err(e) = transport.send_self_copy(rumor).await {
                        debug!(error = %e, "self copy failed");
                    }
                }
                PublishOutcome::TimedOutPendingConfirmation { .. } => {
                    warn!(%conversation_id, "publish unresolved, message stays pending");
                }
                PublishOutcome::Failed(e) => {
                    warn!(%conversation_id, error = %e, "publish failed, message stays pending");
                }
            }
        });
    }

    fn handle_flush_pending(&self, conversation_id: &str) {
        let pending: Vec<Message> = self
            .shared
            .reconciler
            .lock()
            .conversation(conversation_id)
            .map(|c| c.pending_outbound().cloned().collect())
            .unwrap_or_default();
        info!(%conversation_id, count = pending.len(), "flushing pending messages");
        for message in pending {
            let Some(client_token) = message.client_token.clone() else {
                continue;
            };
            self.spawn_publish(
                conversation_id.to_string(),
                message.id.clone(),
                OutgoingRumor {
                    recipient: conversation_id.to_string(),
                    content: message.content.clone(),
                    client_token,
                },
            );
        }
    }

    async fn handle_import_token(&self, blob: String) -> Result<()> {
        let settlement = self.settlement.clone().ok_or(CoreError::NotConnected)?;
        if let Some(token) = settlement.import_token(&blob).await? {
            let _ = self
                .shared
                .event_tx
                .send(CoreEvent::TokenStored { token });
        }
        Ok(())
    }

    async fn handle_pay(&self, recipient: String, invoice: String, amount: u64) -> Result<()> {
        let settlement = self.settlement.clone().ok_or(CoreError::NotConnected)?;
        match settlement.pay(&recipient, &invoice, amount).await {
            Ok(receipt) => {
                let _ = self.shared.event_tx.send(CoreEvent::PaymentRecorded {
                    payment: receipt.event,
                });
                // Tell the counterparty which of their promises this payment
                // consumed.
                for payload in receipt.settlements {
                    let json = serde_json::to_string(&payload)?;
                    self.send_message(recipient.clone(), json).await?;
                }
                Ok(())
            }
            Err(e) => {
                let _ = self.shared.event_tx.send(CoreEvent::Notification {
                    title: "Payment failed".into(),
                    body: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    async fn handle_issue_promise(
        &self,
        recipient: String,
        amount: u64,
        expires_at: u64,
    ) -> Result<()> {
        let settlement = self.settlement.clone().ok_or(CoreError::NotConnected)?;
        match settlement
            .issue_promise(&recipient, amount, "sat", expires_at)
            .await
        {
            Ok((promise, payload)) => {
                let _ = self
                    .shared
                    .event_tx
                    .send(CoreEvent::PromiseRecorded { promise });
                let json = serde_json::to_string(&payload)?;
                self.send_message(recipient, json).await
            }
            Err(e) => {
                let _ = self.shared.event_tx.send(CoreEvent::Notification {
                    title: "Promise refused".into(),
                    body: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    async fn handle_settle_promise(
        &self,
        recipient: String,
        promise_id: String,
        amount: u64,
    ) -> Result<()> {
        let settlement = self.settlement.clone().ok_or(CoreError::NotConnected)?;
        let (payload, remaining) = settlement.settle_promise(&promise_id, amount).await?;
        let _ = self.shared.event_tx.send(CoreEvent::PromiseSettled {
            promise_id,
            remaining,
        });
        let json = serde_json::to_string(&payload)?;
        self.send_message(recipient, json).await
    }
}

/// Fold one gift wrap from the subscription stream or a backfill into local
/// state, emitting whatever events it produces.
async fn process_wrap(
    shared: &Arc<Shared>,
    settlement: &Arc<SettlementCore>,
    client: &Client,
    my_pk: PublicKey,
    event: &Event,
) -> Result<()> {
    let wrap_id = event.id.to_hex();
    // Re-deliveries caught here skip decryption entirely.
    if shared.reconciler.lock().seen_wrap(&wrap_id) {
        return Ok(());
    }

    let UnwrappedGift { rumor, sender } = client.unwrap_gift_wrap(event).await?;
    if rumor.kind != Kind::PrivateDirectMessage {
        return Ok(());
    }

    let is_mine = sender == my_pk;
    let sender_npub = sender.to_bech32()?;

    // For our own echoes the conversation is the recipient in the p tag; for
    // inbound traffic it is the sender.
    let conversation_id = if is_mine {
        rumor
            .tags
            .public_keys()
            .next()
            .map(|pk| pk.to_bech32())
            .transpose()?
            .unwrap_or_else(|| sender_npub.clone())
    } else {
        sender_npub.clone()
    };

    // Inbound traffic must be attributable to a known contact.
    if !is_mine && !shared.contacts.contains(&sender_npub) {
        debug!(sender = %sender_npub, "dropping wrap from unknown sender");
        return Ok(());
    }

    let rumor_id = rumor
        .id
        .ok_or_else(|| anyhow::anyhow!("unwrapped rumor missing id"))?
        .to_hex();
    let client_token = rumor
        .tags
        .find(TagKind::Custom(CLIENT_TOKEN_TAG.into()))
        .and_then(|t| t.content().map(str::to_string));

    let incoming = IncomingMessage {
        wrap_id,
        rumor_id,
        conversation_id,
        sender: sender_npub,
        outbound: is_mine,
        client_token,
        content: rumor.content.clone(),
        created_at: rumor.created_at.as_u64(),
    };

    let applied = shared.reconciler.lock().apply(incoming);
    let message = match &applied {
        Applied::Duplicate => return Ok(()),
        Applied::Confirmed { message, .. } => message.clone(),
        Applied::Created(message) => message.clone(),
    };

    shared.store.save_message(&message).await?;
    for event in settlement.observe(&message).await? {
        let _ = shared.event_tx.send(event);
    }

    let open = shared.open_conversation.lock().clone();
    for event in events_for_applied(applied, open.as_deref(), &shared.contacts) {
        let _ = shared.event_tx.send(event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use futures::future::BoxFuture;

    use super::*;
    use crate::error::Result as CoreResult;
    use crate::models::{EcashToken, MessageStatus};
    use crate::store::MemoryStore;
    use crate::wallet::mint::{MeltOutcome, ParsedToken};

    struct NoopMint;

    impl MintGateway for NoopMint {
        fn receive_token<'a>(&'a self, _blob: &'a str) -> BoxFuture<'a, CoreResult<ParsedToken>> {
            Box::pin(async { Err(CoreError::TokenRejected("no mint configured".into())) })
        }

        fn melt<'a>(
            &'a self,
            _mint: &'a str,
            _holdings: &'a [EcashToken],
            _invoice: &'a str,
            _amount: u64,
        ) -> BoxFuture<'a, CoreResult<MeltOutcome>> {
            Box::pin(async { Err(CoreError::MintsExhausted) })
        }

        fn supports_mpp<'a>(&'a self, _mint: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async { false })
        }
    }

    #[test]
    fn send_without_relays_queues_a_pending_message() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let worker = WalletWorker::new(
            CoreConfig::default(),
            Arc::new(NoopMint),
            Arc::new(MemoryStore::new()),
            event_tx,
            cmd_rx,
        );
        let handle = std::thread::spawn(move || worker.run());

        let keys = Keys::generate();
        let recipient = Keys::generate().public_key().to_bech32().unwrap();
        cmd_tx
            .send(WalletCommand::Connect {
                keys,
                response_tx: None,
            })
            .unwrap();
        cmd_tx
            .send(WalletCommand::SendText {
                recipient: recipient.clone(),
                content: "queued while offline".into(),
            })
            .unwrap();

        let added = event_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("expected a MessageAdded event");
        match added {
            CoreEvent::MessageAdded {
                conversation_id,
                message,
            } => {
                assert_eq!(conversation_id, recipient);
                assert_eq!(message.status, MessageStatus::Pending);
                assert!(message.local_only);
            }
            other => panic!("expected MessageAdded, got {other:?}"),
        }

        cmd_tx.send(WalletCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn send_before_connect_is_refused() {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let worker = WalletWorker::new(
            CoreConfig::default(),
            Arc::new(NoopMint),
            Arc::new(MemoryStore::new()),
            event_tx,
            cmd_rx,
        );
        let handle = std::thread::spawn(move || worker.run());

        cmd_tx
            .send(WalletCommand::SendText {
                recipient: "npub1bob".into(),
                content: "hi".into(),
            })
            .unwrap();
        cmd_tx.send(WalletCommand::Shutdown).unwrap();
        handle.join().unwrap();

        // No identity yet, so nothing was created or announced.
        assert!(event_rx.try_recv().is_err());
    }
}
