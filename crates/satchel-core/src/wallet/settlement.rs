//! Payment settlement: bearer token custody, mint funding selection, and the
//! bilateral IOU ledger.
//!
//! Everything money-shaped that arrives in a conversation flows through
//! [`SettlementCore::observe`]; everything money-shaped that leaves starts at
//! [`SettlementCore::pay`], [`SettlementCore::issue_promise`] or
//! [`SettlementCore::settle_promise`]. The core owns the token, ledger and
//! history stores and serializes spends per mint, so two concurrent payments
//! can never double-spend the same holdings.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::constants::{PROMISE_PAYLOAD_TYPE, SETTLEMENT_PAYLOAD_TYPE};
use crate::error::{CoreError, Result};
use crate::events::CoreEvent;
use crate::models::{
    now_secs, CredoPromise, CredoSettlement, Direction, EcashToken, Message, MessageContent,
    PaymentDirection, PaymentEvent, PaymentOutcome, PromiseDirection, PromisePayload,
    SettlementPayload,
};
use crate::store::{LedgerStore, PaymentHistory, Persistence, TokenStore};

use super::mint::MintGateway;

/// What an outgoing payment did, for the caller to relay to the counterparty.
#[derive(Debug)]
pub struct PaymentReceipt {
    pub event: PaymentEvent,
    /// Settlements to send to the recipient for the credit-covered portion.
    pub settlements: Vec<SettlementPayload>,
}

pub struct SettlementCore {
    config: CoreConfig,
    gateway: Arc<dyn MintGateway>,
    store: Arc<dyn Persistence>,
    tokens: Mutex<TokenStore>,
    ledger: Mutex<LedgerStore>,
    history: Mutex<PaymentHistory>,
    /// One lock per mint; a spend snapshots holdings, melts without holding
    /// the token store, and only then commits.
    mint_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Lazily filled multi-path capability per mint. A mint's capability is
    /// stable for the process lifetime, so the gateway is asked once.
    mpp_cache: RwLock<HashMap<String, bool>>,
    /// Local identity npub, the issuer on promises we create.
    local_pubkey: String,
}

impl SettlementCore {
    pub fn new(
        config: CoreConfig,
        gateway: Arc<dyn MintGateway>,
        store: Arc<dyn Persistence>,
        local_pubkey: String,
    ) -> Self {
        let history_cap = config.payment_history_cap;
        Self {
            config,
            gateway,
            store,
            tokens: Mutex::new(TokenStore::new()),
            ledger: Mutex::new(LedgerStore::new()),
            history: Mutex::new(PaymentHistory::new(history_cap)),
            mint_locks: Mutex::new(HashMap::new()),
            mpp_cache: RwLock::new(HashMap::new()),
            local_pubkey,
        }
    }

    /// Load persisted tokens, promises and payments into the in-memory
    /// stores. Called once after connect.
    pub async fn hydrate(&self) -> Result<()> {
        let tokens = self.store.load_tokens().await?;
        let promises = self.store.load_promises().await?;
        let settlements = self.store.load_settlements().await?;
        let payments = self.store.load_payments().await?;
        {
            let mut token_store = self.tokens.lock();
            for token in tokens {
                token_store.insert(token);
            }
        }
        {
            let mut ledger = self.ledger.lock();
            for promise in promises {
                ledger.insert_promise(promise);
            }
            // Applied settlement identities survive restarts; without them a
            // late echo would reduce its promise a second time.
            for settlement in settlements {
                ledger.register_applied(&settlement.id);
            }
        }
        {
            let mut history = self.history.lock();
            for payment in payments {
                history.push(payment);
            }
        }
        Ok(())
    }

    /// Spendable balance per mint.
    pub fn balances(&self) -> HashMap<String, u64> {
        self.tokens.lock().spendable_by_mint()
    }

    pub fn spendable_total(&self) -> u64 {
        self.tokens.lock().spendable_total()
    }

    /// Net IOU position toward one counterparty, positive when they owe us.
    pub fn net_position(&self, counterparty: &str) -> i64 {
        self.ledger.lock().net_position(counterparty, now_secs())
    }

    /// Most recent payments, newest first.
    pub fn recent_payments(&self) -> Vec<PaymentEvent> {
        self.history.lock().recent()
    }

    /// Import a bearer token blob. Returns `None` when the blob's identity
    /// is already known (re-delivery, forwarded duplicate, re-paste).
    pub async fn import_token(&self, blob: &str) -> Result<Option<EcashToken>> {
        if self.tokens.lock().contains_blob(blob) {
            debug!("token blob already known, skipping import");
            return Ok(None);
        }
        let token = match self.gateway.receive_token(blob).await {
            Ok(parsed) => EcashToken::accepted(
                Uuid::new_v4().to_string(),
                blob.to_string(),
                parsed.mint,
                parsed.unit,
                parsed.amount,
            ),
            Err(CoreError::TokenRejected(reason)) => {
                warn!(%reason, "mint rejected token");
                EcashToken::errored(Uuid::new_v4().to_string(), blob.to_string(), reason)
            }
            Err(e) => return Err(e),
        };
        // A concurrent import of the same blob may have won the race while
        // the gateway call was in flight.
        if !self.tokens.lock().insert(token.clone()) {
            return Ok(None);
        }
        self.store.save_token(&token).await?;
        Ok(Some(token))
    }

    fn mint_lock(&self, mint: &str) -> Arc<AsyncMutex<()>> {
        self.mint_locks
            .lock()
            .entry(mint.to_string())
            .or_default()
            .clone()
    }

    /// Candidate mints able to fund `need` on their own, in try order:
    /// the preferred mint first, then multi-path capable mints, then by
    /// balance descending.
    async fn funding_candidates(&self, need: u64) -> Vec<(String, u64)> {
        let by_mint = self.tokens.lock().spendable_by_mint();
        let mut candidates: Vec<(String, u64, bool)> = Vec::new();
        for (mint, total) in by_mint {
            if total < need {
                continue;
            }
            let cached = self.mpp_cache.read().get(&mint).copied();
            let mpp = match cached {
                Some(mpp) => mpp,
                None => {
                    let mpp = self.gateway.supports_mpp(&mint).await;
                    self.mpp_cache.write().insert(mint.clone(), mpp);
                    mpp
                }
            };
            candidates.push((mint, total, mpp));
        }
        let preferred = self.config.preferred_mint.as_deref();
        candidates.sort_by(|a, b| {
            let a_pref = Some(a.0.as_str()) == preferred;
            let b_pref = Some(b.0.as_str()) == preferred;
            b_pref
                .cmp(&a_pref)
                .then(b.2.cmp(&a.2))
                .then(b.1.cmp(&a.1))
        });
        candidates
            .into_iter()
            .map(|(mint, total, _)| (mint, total))
            .collect()
    }

    /// Pay `amount` to a counterparty's invoice.
    ///
    /// Credit they extended to us covers the front of the payment as ledger
    /// settlements; only the remainder moves real money through a mint.
    /// Candidate mints are tried in order, falling through on melt failure.
    pub async fn pay(&self, recipient: &str, invoice: &str, amount: u64) -> Result<PaymentReceipt> {
        let now = now_secs();
        let credit = self.ledger.lock().available_credit_from(recipient, now);
        let covered = credit.min(amount);
        let need = amount - covered;

        let mut used_mint = None;
        let mut fee = 0;
        if need > 0 {
            let candidates = self.funding_candidates(need).await;
            if candidates.is_empty() {
                let available = self.spendable_total();
                return Err(CoreError::InsufficientFunds {
                    available,
                    required: need,
                });
            }

            for (mint, total) in candidates {
                let lock = self.mint_lock(&mint);
                let _guard = lock.lock().await;

                let holdings = self.tokens.lock().holdings_at(&mint);
                // Balance may have moved while we waited on the mint lock.
                let snapshot_total: u64 = holdings.iter().filter_map(|t| t.amount).sum();
                if snapshot_total < need {
                    continue;
                }

                debug!(%mint, total, need, "attempting melt");
                match self.gateway.melt(&mint, &holdings, invoice, need).await {
                    Ok(outcome) => {
                        let spent_ids: Vec<String> =
                            holdings.iter().map(|t| t.id.clone()).collect();
                        let change = outcome.change.as_ref().map(|c| {
                            EcashToken::accepted(
                                Uuid::new_v4().to_string(),
                                c.blob.clone(),
                                mint.clone(),
                                "sat".into(),
                                c.amount,
                            )
                        });
                        let spent_rows: Vec<EcashToken> = {
                            let mut token_store = self.tokens.lock();
                            token_store.supersede(&spent_ids, change.clone());
                            token_store
                                .tokens()
                                .iter()
                                .filter(|t| spent_ids.contains(&t.id))
                                .cloned()
                                .collect()
                        };
                        for token in spent_rows {
                            self.store.save_token(&token).await?;
                        }
                        if let Some(change) = change {
                            self.store.save_token(&change).await?;
                        }
                        fee = outcome.fee;
                        used_mint = Some(mint);
                        break;
                    }
                    Err(e) => {
                        warn!(%mint, error = %e, "melt failed, trying next mint");
                        continue;
                    }
                }
            }

            if used_mint.is_none() {
                let event = PaymentEvent {
                    id: Uuid::new_v4().to_string(),
                    amount,
                    fee: 0,
                    mint: None,
                    direction: PaymentDirection::Sent,
                    outcome: PaymentOutcome::Failed("every candidate mint failed".into()),
                    at: now,
                };
                self.history.lock().push(event.clone());
                self.store.save_payment(&event).await?;
                return Err(CoreError::MintsExhausted);
            }
        }

        // Settle the credit-covered portion. The settlement ids are marked
        // applied up front so their own echoes are no-ops.
        let mut settlements = Vec::new();
        if covered > 0 {
            let mut ledger = self.ledger.lock();
            for (promise_id, portion) in ledger.consume_credit_from(recipient, covered, now) {
                let settlement_id = Uuid::new_v4().to_string();
                ledger.register_applied(&settlement_id);
                settlements.push(SettlementPayload {
                    payload_type: SETTLEMENT_PAYLOAD_TYPE.to_string(),
                    settlement_id,
                    promise_id,
                    amount: portion,
                });
            }
        }
        for payload in &settlements {
            self.store
                .save_settlement(&CredoSettlement {
                    id: payload.settlement_id.clone(),
                    promise_id: payload.promise_id.clone(),
                    amount: payload.amount,
                    settled_at: now,
                })
                .await?;
            let promise = self.ledger.lock().get(&payload.promise_id).cloned();
            if let Some(promise) = promise {
                self.store.save_promise(&promise).await?;
            }
        }

        let event = PaymentEvent {
            id: Uuid::new_v4().to_string(),
            amount,
            fee,
            mint: used_mint,
            direction: PaymentDirection::Sent,
            outcome: PaymentOutcome::Settled,
            at: now,
        };
        self.history.lock().push(event.clone());
        self.store.save_payment(&event).await?;
        info!(amount, covered, "payment settled");

        Ok(PaymentReceipt { event, settlements })
    }

    /// Issue a promise to a counterparty, refusing issuance that would push
    /// total outstanding given credit past the configured cap.
    pub async fn issue_promise(
        &self,
        recipient: &str,
        amount: u64,
        unit: &str,
        expires_at: u64,
    ) -> Result<(CredoPromise, PromisePayload)> {
        let now = now_secs();
        let promise = {
            let mut ledger = self.ledger.lock();
            let outstanding = ledger.outstanding_given(now);
            if outstanding + amount > self.config.iou_outstanding_cap {
                return Err(CoreError::IouCapExceeded {
                    outstanding,
                    requested: amount,
                    cap: self.config.iou_outstanding_cap,
                });
            }
            let promise = CredoPromise {
                id: Uuid::new_v4().to_string(),
                issuer: self.local_pubkey.clone(),
                recipient: recipient.to_string(),
                amount,
                unit: unit.to_string(),
                created_at: now,
                expires_at,
                settled_amount: None,
                settled_at: None,
                direction: PromiseDirection::Given,
                counterparty: recipient.to_string(),
            };
            ledger.insert_promise(promise.clone());
            promise
        };
        self.store.save_promise(&promise).await?;

        let payload = PromisePayload {
            payload_type: PROMISE_PAYLOAD_TYPE.to_string(),
            promise_id: promise.id.clone(),
            issuer: promise.issuer.clone(),
            recipient: promise.recipient.clone(),
            amount,
            unit: unit.to_string(),
            expires_at,
        };
        Ok((promise, payload))
    }

    /// Settle part of a promise we issued. Returns the payload to send and
    /// the remaining amount after application.
    pub async fn settle_promise(
        &self,
        promise_id: &str,
        amount: u64,
    ) -> Result<(SettlementPayload, u64)> {
        let now = now_secs();
        let settlement_id = Uuid::new_v4().to_string();
        let remaining = self
            .ledger
            .lock()
            .apply_settlement(&settlement_id, promise_id, amount, now)?;
        self.store
            .save_settlement(&CredoSettlement {
                id: settlement_id.clone(),
                promise_id: promise_id.to_string(),
                amount,
                settled_at: now,
            })
            .await?;
        let promise = self.ledger.lock().get(promise_id).cloned();
        if let Some(promise) = promise {
            self.store.save_promise(&promise).await?;
        }
        let payload = SettlementPayload {
            payload_type: SETTLEMENT_PAYLOAD_TYPE.to_string(),
            settlement_id,
            promise_id: promise_id.to_string(),
            amount,
        };
        Ok((payload, remaining))
    }

    /// Apply the payment side effects of a newly reconciled message.
    ///
    /// Only called for messages the reconciler actually created or
    /// confirmed; duplicates never reach this point. Returns the events the
    /// worker forwards to the presentation layer.
    pub async fn observe(&self, message: &Message) -> Result<Vec<CoreEvent>> {
        let mut events = Vec::new();
        match &message.classification {
            MessageContent::BearerToken { blob } => {
                // Tokens we sent were spent from our own holdings; only
                // received blobs are imported.
                if message.direction == Direction::Inbound {
                    if let Some(token) = self.import_token(blob).await? {
                        events.push(CoreEvent::TokenStored { token });
                    }
                }
            }
            MessageContent::Promise(payload) => {
                let direction = if message.direction == Direction::Inbound {
                    PromiseDirection::Received
                } else {
                    PromiseDirection::Given
                };
                let promise = CredoPromise {
                    id: payload.promise_id.clone(),
                    issuer: payload.issuer.clone(),
                    recipient: payload.recipient.clone(),
                    amount: payload.amount,
                    unit: payload.unit.clone(),
                    created_at: message.created_at,
                    expires_at: payload.expires_at,
                    settled_amount: None,
                    settled_at: None,
                    direction,
                    counterparty: message.conversation_id.clone(),
                };
                if self.ledger.lock().insert_promise(promise.clone()) {
                    self.store.save_promise(&promise).await?;
                    events.push(CoreEvent::PromiseRecorded { promise });
                }
            }
            MessageContent::Settlement(payload) => {
                {
                    let ledger = self.ledger.lock();
                    // Our own settlements are registered before sending; their
                    // echoes (and relay re-deliveries) change nothing.
                    if ledger.is_applied(&payload.settlement_id) {
                        return Ok(events);
                    }
                    // Only the promise's own counterparty can settle it; a
                    // settlement sent by anyone else names someone else's debt.
                    if message.direction == Direction::Inbound {
                        if let Some(promise) = ledger.get(&payload.promise_id) {
                            if promise.counterparty != message.sender {
                                debug!(
                                    promise_id = %payload.promise_id,
                                    sender = %message.sender,
                                    "settlement from non-counterparty ignored"
                                );
                                return Ok(events);
                            }
                        }
                    }
                }
                let applied = self.ledger.lock().apply_settlement(
                    &payload.settlement_id,
                    &payload.promise_id,
                    payload.amount,
                    message.created_at,
                );
                match applied {
                    Ok(remaining) => {
                        self.store
                            .save_settlement(&CredoSettlement {
                                id: payload.settlement_id.clone(),
                                promise_id: payload.promise_id.clone(),
                                amount: payload.amount,
                                settled_at: message.created_at,
                            })
                            .await?;
                        let promise = self.ledger.lock().get(&payload.promise_id).cloned();
                        if let Some(promise) = promise {
                            self.store.save_promise(&promise).await?;
                        }
                        events.push(CoreEvent::PromiseSettled {
                            promise_id: payload.promise_id.clone(),
                            remaining,
                        });
                    }
                    Err(CoreError::UnknownPromise(id)) => {
                        // Ledger conflict: the counterparty referenced a
                        // promise we never recorded. Dropped, not fatal.
                        debug!(promise_id = %id, "settlement for unknown promise ignored");
                    }
                    Err(e) => return Err(e),
                }
            }
            MessageContent::PlainText => {}
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::models::Direction;
    use crate::store::MemoryStore;
    use crate::wallet::mint::{MeltOutcome, MintChange, ParsedToken};

    /// Scripted gateway: accepts any blob prefixed `cashuA`, melts succeed
    /// except at mints listed in `failing`, and MPP support is per-mint.
    struct FakeMint {
        failing: Vec<String>,
        mpp: Vec<String>,
        mpp_queries: AtomicUsize,
    }

    impl FakeMint {
        fn new() -> Self {
            Self {
                failing: Vec::new(),
                mpp: Vec::new(),
                mpp_queries: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, mint: &str) -> Self {
            self.failing.push(mint.to_string());
            self
        }

        fn with_mpp(mut self, mint: &str) -> Self {
            self.mpp.push(mint.to_string());
            self
        }
    }

    impl MintGateway for FakeMint {
        fn receive_token<'a>(&'a self, blob: &'a str) -> BoxFuture<'a, Result<ParsedToken>> {
            Box::pin(async move {
                if blob.starts_with("cashuA") {
                    Ok(ParsedToken {
                        mint: "https://a.mint".into(),
                        unit: "sat".into(),
                        amount: 100,
                    })
                } else {
                    Err(CoreError::TokenRejected("unparseable".into()))
                }
            })
        }

        fn melt<'a>(
            &'a self,
            mint: &'a str,
            holdings: &'a [EcashToken],
            _invoice: &'a str,
            amount: u64,
        ) -> BoxFuture<'a, Result<MeltOutcome>> {
            let total: u64 = holdings.iter().filter_map(|t| t.amount).sum();
            let failing = self.failing.contains(&mint.to_string());
            Box::pin(async move {
                if failing {
                    return Err(CoreError::Transport("mint unreachable".into()));
                }
                Ok(MeltOutcome {
                    paid_amount: amount,
                    fee: 2,
                    change: (total > amount).then(|| MintChange {
                        blob: format!("cashuAchange{amount}"),
                        amount: total - amount,
                    }),
                })
            })
        }

        fn supports_mpp<'a>(&'a self, mint: &'a str) -> BoxFuture<'a, bool> {
            self.mpp_queries.fetch_add(1, Ordering::SeqCst);
            let supported = self.mpp.contains(&mint.to_string());
            Box::pin(async move { supported })
        }
    }

    fn core_with(gateway: FakeMint, config: CoreConfig) -> SettlementCore {
        SettlementCore::new(
            config,
            Arc::new(gateway),
            Arc::new(MemoryStore::new()),
            "npub1alice".into(),
        )
    }

    fn seed_token(core: &SettlementCore, blob: &str, mint: &str, amount: u64) {
        core.tokens.lock().insert(EcashToken::accepted(
            Uuid::new_v4().to_string(),
            blob.into(),
            mint.into(),
            "sat".into(),
            amount,
        ));
    }

    fn seed_received_promise(core: &SettlementCore, id: &str, from: &str, amount: u64) {
        core.ledger.lock().insert_promise(CredoPromise {
            id: id.into(),
            issuer: from.into(),
            recipient: "npub1alice".into(),
            amount,
            unit: "sat".into(),
            created_at: now_secs().saturating_sub(60),
            expires_at: now_secs() + 3600,
            settled_amount: None,
            settled_at: None,
            direction: PromiseDirection::Received,
            counterparty: from.into(),
        });
    }

    #[tokio::test]
    async fn receiving_the_same_token_twice_stores_it_once() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        let first = core.import_token("cashuAtokenblob1").await.unwrap();
        assert!(first.is_some());
        let second = core.import_token("cashuAtokenblob1").await.unwrap();
        assert!(second.is_none());
        assert_eq!(core.spendable_total(), 100);
    }

    #[tokio::test]
    async fn rejected_token_is_kept_as_error_and_blocks_reimport() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        let stored = core.import_token("cashuBbadblob").await.unwrap().unwrap();
        assert_eq!(stored.state, crate::models::TokenState::Error);
        assert!(core.import_token("cashuBbadblob").await.unwrap().is_none());
        assert_eq!(core.spendable_total(), 0);
    }

    #[tokio::test]
    async fn underfunded_preferred_mint_is_skipped_for_a_covering_one() {
        let config = CoreConfig {
            preferred_mint: Some("https://a.mint".into()),
            ..CoreConfig::default()
        };
        let core = core_with(FakeMint::new(), config);
        seed_token(&core, "cashuAsmall", "https://a.mint", 300);
        seed_token(&core, "cashuAbig", "https://b.mint", 1000);

        let receipt = core.pay("npub1bob", "lnbc500...", 500).await.unwrap();
        assert_eq!(receipt.event.mint.as_deref(), Some("https://b.mint"));
        assert_eq!(receipt.event.outcome, PaymentOutcome::Settled);
        // Change for the 500 spent out of 1000 is a single new holding.
        assert_eq!(
            core.balances().get("https://b.mint").copied(),
            Some(500)
        );
        // The preferred mint's balance is untouched.
        assert_eq!(
            core.balances().get("https://a.mint").copied(),
            Some(300)
        );
    }

    #[tokio::test]
    async fn multi_path_capable_mint_outranks_a_larger_plain_one() {
        let core = core_with(
            FakeMint::new().with_mpp("https://b.mint"),
            CoreConfig::default(),
        );
        seed_token(&core, "cashuAmpp", "https://b.mint", 600);
        seed_token(&core, "cashuAbig", "https://c.mint", 900);

        let receipt = core.pay("npub1bob", "lnbc500...", 500).await.unwrap();
        assert_eq!(receipt.event.mint.as_deref(), Some("https://b.mint"));
    }

    #[tokio::test]
    async fn melt_failure_falls_through_to_the_next_mint() {
        let config = CoreConfig {
            preferred_mint: Some("https://a.mint".into()),
            ..CoreConfig::default()
        };
        let core = core_with(FakeMint::new().failing("https://a.mint"), config);
        seed_token(&core, "cashuAone", "https://a.mint", 800);
        seed_token(&core, "cashuAtwo", "https://b.mint", 800);

        let receipt = core.pay("npub1bob", "lnbc500...", 500).await.unwrap();
        assert_eq!(receipt.event.mint.as_deref(), Some("https://b.mint"));
    }

    #[tokio::test]
    async fn no_covering_mint_is_refused_before_any_melt() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        seed_token(&core, "cashuAone", "https://a.mint", 200);
        seed_token(&core, "cashuAtwo", "https://b.mint", 200);

        let err = core.pay("npub1bob", "lnbc500...", 500).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientFunds {
                available: 400,
                required: 500
            }
        ));
    }

    #[tokio::test]
    async fn every_mint_failing_exhausts_the_payment() {
        let core = core_with(
            FakeMint::new()
                .failing("https://a.mint")
                .failing("https://b.mint"),
            CoreConfig::default(),
        );
        seed_token(&core, "cashuAone", "https://a.mint", 800);
        seed_token(&core, "cashuAtwo", "https://b.mint", 800);

        let err = core.pay("npub1bob", "lnbc500...", 500).await.unwrap_err();
        assert!(matches!(err, CoreError::MintsExhausted));
        // The failure lands in history.
        let recent = core.recent_payments();
        assert_eq!(recent.len(), 1);
        assert!(matches!(recent[0].outcome, PaymentOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn credit_from_recipient_shrinks_the_funded_portion() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        seed_token(&core, "cashuAone", "https://a.mint", 400);
        seed_received_promise(&core, "p1", "npub1bob", 200);

        // 500 requested, 200 covered by credit: a 400-sat mint must suffice
        // for the remaining 300.
        let receipt = core.pay("npub1bob", "lnbc500...", 500).await.unwrap();
        assert_eq!(receipt.settlements.len(), 1);
        assert_eq!(receipt.settlements[0].promise_id, "p1");
        assert_eq!(receipt.settlements[0].amount, 200);
        assert_eq!(core.balances().get("https://a.mint").copied(), Some(100));
        // Bob's credit is fully consumed.
        assert_eq!(core.net_position("npub1bob"), 0);
    }

    #[tokio::test]
    async fn fully_credit_covered_payment_touches_no_mint() {
        let gateway = FakeMint::new();
        let core = core_with(gateway, CoreConfig::default());
        seed_received_promise(&core, "p1", "npub1bob", 1000);

        let receipt = core.pay("npub1bob", "lnbc300...", 300).await.unwrap();
        assert!(receipt.event.mint.is_none());
        assert_eq!(receipt.settlements.len(), 1);
        assert_eq!(core.net_position("npub1bob"), 700);
    }

    #[tokio::test]
    async fn issuance_past_the_cap_is_refused() {
        let config = CoreConfig {
            iou_outstanding_cap: 2000,
            ..CoreConfig::default()
        };
        let core = core_with(FakeMint::new(), config);
        let expires = now_secs() + 3600;
        core.issue_promise("npub1bob", 1800, "sat", expires)
            .await
            .unwrap();

        let err = core
            .issue_promise("npub1carol", 300, "sat", expires)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::IouCapExceeded {
                outstanding: 1800,
                requested: 300,
                cap: 2000
            }
        ));

        // A smaller issuance inside the cap still goes through.
        core.issue_promise("npub1carol", 150, "sat", expires)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn observed_settlement_echo_of_own_payment_is_a_noop() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        seed_received_promise(&core, "p1", "npub1bob", 500);

        let receipt = core.pay("npub1bob", "lnbc200...", 200).await.unwrap();
        assert_eq!(core.net_position("npub1bob"), 300);

        // The settlement we sent comes back as our own echo.
        let payload = &receipt.settlements[0];
        let message = Message::from_observed(
            "npub1bob",
            Direction::Outbound,
            "npub1alice",
            "rumor-1",
            "wrap-1",
            None,
            serde_json::to_string(payload).unwrap(),
            now_secs(),
        );
        let events = core.observe(&message).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(core.net_position("npub1bob"), 300);
    }

    #[tokio::test]
    async fn settlement_echo_after_restart_stays_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let core = SettlementCore::new(
            CoreConfig::default(),
            Arc::new(FakeMint::new()),
            store.clone(),
            "npub1alice".into(),
        );
        let promise_json = serde_json::json!({
            "type": PROMISE_PAYLOAD_TYPE,
            "promise_id": "p1",
            "issuer": "npub1bob",
            "recipient": "npub1alice",
            "amount": 500u64,
            "unit": "sat",
            "expires_at": now_secs() + 3600,
        })
        .to_string();
        let message = Message::from_observed(
            "npub1bob",
            Direction::Inbound,
            "npub1bob",
            "rumor-1",
            "wrap-1",
            None,
            promise_json,
            now_secs(),
        );
        core.observe(&message).await.unwrap();

        let receipt = core.pay("npub1bob", "lnbc200...", 200).await.unwrap();
        assert_eq!(core.net_position("npub1bob"), 300);

        // Fresh core over the same store, as after a process restart.
        let core = SettlementCore::new(
            CoreConfig::default(),
            Arc::new(FakeMint::new()),
            store,
            "npub1alice".into(),
        );
        core.hydrate().await.unwrap();
        assert_eq!(core.net_position("npub1bob"), 300);

        // The payment's own settlement echoes back after the restart.
        let echo = Message::from_observed(
            "npub1bob",
            Direction::Outbound,
            "npub1alice",
            "rumor-2",
            "wrap-2",
            None,
            serde_json::to_string(&receipt.settlements[0]).unwrap(),
            now_secs(),
        );
        let events = core.observe(&echo).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(core.net_position("npub1bob"), 300);
    }

    #[tokio::test]
    async fn mint_capability_is_queried_once_per_mint() {
        let gateway = Arc::new(FakeMint::new().with_mpp("https://b.mint"));
        let core = SettlementCore::new(
            CoreConfig::default(),
            gateway.clone(),
            Arc::new(MemoryStore::new()),
            "npub1alice".into(),
        );
        seed_token(&core, "cashuAone", "https://a.mint", 800);
        seed_token(&core, "cashuAtwo", "https://b.mint", 800);

        core.pay("npub1bob", "lnbc100...", 100).await.unwrap();
        core.pay("npub1bob", "lnbc100x...", 100).await.unwrap();
        assert_eq!(gateway.mpp_queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn settlement_from_a_different_counterparty_is_ignored() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        seed_received_promise(&core, "p1", "npub1bob", 500);

        let settlement_json = serde_json::json!({
            "type": SETTLEMENT_PAYLOAD_TYPE,
            "settlement_id": "s1",
            "promise_id": "p1",
            "amount": 400u64,
        })
        .to_string();
        let message = Message::from_observed(
            "npub1carol",
            Direction::Inbound,
            "npub1carol",
            "rumor-1",
            "wrap-1",
            None,
            settlement_json,
            now_secs(),
        );
        let events = core.observe(&message).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(core.net_position("npub1bob"), 500);
    }

    #[tokio::test]
    async fn observed_inbound_promise_and_settlement_update_the_ledger() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        let promise_json = serde_json::json!({
            "type": PROMISE_PAYLOAD_TYPE,
            "promise_id": "p1",
            "issuer": "npub1bob",
            "recipient": "npub1alice",
            "amount": 1000u64,
            "unit": "sat",
            "expires_at": now_secs() + 3600,
        })
        .to_string();
        let message = Message::from_observed(
            "npub1bob",
            Direction::Inbound,
            "npub1bob",
            "rumor-1",
            "wrap-1",
            None,
            promise_json,
            now_secs(),
        );
        let events = core.observe(&message).await.unwrap();
        assert!(matches!(events[0], CoreEvent::PromiseRecorded { .. }));
        assert_eq!(core.net_position("npub1bob"), 1000);

        let settlement_json = serde_json::json!({
            "type": SETTLEMENT_PAYLOAD_TYPE,
            "settlement_id": "s1",
            "promise_id": "p1",
            "amount": 400u64,
        })
        .to_string();
        let message = Message::from_observed(
            "npub1bob",
            Direction::Inbound,
            "npub1bob",
            "rumor-2",
            "wrap-2",
            None,
            settlement_json,
            now_secs(),
        );
        let events = core.observe(&message).await.unwrap();
        assert!(matches!(
            events[0],
            CoreEvent::PromiseSettled { remaining: 600, .. }
        ));
        assert_eq!(core.net_position("npub1bob"), 600);
    }

    #[tokio::test]
    async fn settlement_for_unknown_promise_is_ignored() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        let settlement_json = serde_json::json!({
            "type": SETTLEMENT_PAYLOAD_TYPE,
            "settlement_id": "s1",
            "promise_id": "ghost",
            "amount": 400u64,
        })
        .to_string();
        let message = Message::from_observed(
            "npub1bob",
            Direction::Inbound,
            "npub1bob",
            "rumor-1",
            "wrap-1",
            None,
            settlement_json,
            now_secs(),
        );
        let events = core.observe(&message).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn inbound_token_message_is_imported_but_own_echo_is_not() {
        let core = core_with(FakeMint::new(), CoreConfig::default());
        let inbound = Message::from_observed(
            "npub1bob",
            Direction::Inbound,
            "npub1bob",
            "rumor-1",
            "wrap-1",
            None,
            "cashuAfromfriend".into(),
            now_secs(),
        );
        let events = core.observe(&inbound).await.unwrap();
        assert!(matches!(events[0], CoreEvent::TokenStored { .. }));

        let echo = Message::from_observed(
            "npub1bob",
            Direction::Outbound,
            "npub1alice",
            "rumor-2",
            "wrap-2",
            None,
            "cashuAtobob".into(),
            now_secs(),
        );
        let events = core.observe(&echo).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(core.spendable_total(), 100);
    }
}
