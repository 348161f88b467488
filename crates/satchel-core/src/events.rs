use crate::models::{CredoPromise, EcashToken, Message, PaymentEvent};

/// Events emitted by the worker toward the presentation layer.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A new message was folded into a conversation (optimistic send, echo
    /// from another device, or inbound).
    MessageAdded {
        conversation_id: String,
        message: Message,
    },
    /// An existing message changed identity or status (pending -> sent).
    MessageUpdated {
        conversation_id: String,
        old_id: String,
        message: Message,
    },
    /// A conversation other than the open one received an inbound message.
    ConversationAttention { conversation_id: String },
    /// Best-effort user notification raised by the inbox scanner.
    Notification { title: String, body: String },
    /// A bearer token was stored (accepted or error state).
    TokenStored { token: EcashToken },
    /// A new promise entered the IOU ledger.
    PromiseRecorded { promise: CredoPromise },
    /// A settlement reduced a promise's remaining amount.
    PromiseSettled { promise_id: String, remaining: u64 },
    /// An outgoing payment completed (or failed) and was appended to history.
    PaymentRecorded { payment: PaymentEvent },
}
