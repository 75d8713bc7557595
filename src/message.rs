//! The outgoing message model carried through the send pipeline.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single outbound business message, filled in by the caller and handed to
/// [`MessagingClient::send_and_continue`](crate::client::MessagingClient::send_and_continue).
///
/// The pipeline only borrows the message; it is never mutated and stays with
/// the caller whether the send succeeds or is rejected.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    /// HerId of the receiving organization. Must be positive.
    pub to_her_id: i32,
    /// Collaboration protocol agreement governing the exchange, when one is
    /// registered for the two parties.
    pub cpa_id: Option<Uuid>,
    /// Caller-assigned identifier, unique per logical message. Used for
    /// idempotency and tracing downstream.
    pub message_id: String,
    /// Name of the business operation, e.g. a dialog or acknowledgment type.
    pub message_function: String,
    /// When set, this message acknowledges a prior message of the named
    /// function and the function gate validates the referenced function
    /// instead of `message_function`.
    pub receipt_for_message_function: Option<String>,
    /// End-user/patient correlation. Passed through untouched.
    pub personal_id: Option<String>,
    /// Earliest time the transport should release the message. Passed
    /// through to the transport envelope.
    pub scheduled_send_time_utc: Option<DateTime<Utc>>,
    /// The business document bytes. Opaque to the pipeline; protected
    /// (signed and encrypted) before leaving the node.
    pub payload: Option<Vec<u8>>,
}

impl OutgoingMessage {
    /// The function name the registry gate must resolve: the referenced
    /// function for receipts, the message's own function otherwise.
    ///
    /// An empty `receipt_for_message_function` counts as absent.
    pub fn gated_function(&self) -> &str {
        match self.receipt_for_message_function.as_deref() {
            Some(referenced) if !referenced.is_empty() => referenced,
            _ => &self.message_function,
        }
    }

    /// Whether this message is a receipt for a prior message.
    pub fn is_receipt(&self) -> bool {
        self.receipt_for_message_function
            .as_deref()
            .is_some_and(|f| !f.is_empty())
    }
}
