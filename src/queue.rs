//! Outbound queue abstraction.
//!
//! The send pipeline produces [`QueueEnvelope`] values and hands them to a
//! [`QueueSender`]. A successful enqueue means the transport accepted the
//! envelope, not that the counterparty has received it.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Report;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryQueue;

/// Error raised when the transport refuses an envelope.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Custom(#[from] Report),
}

/// A fully prepared outbound message, ready for the wire. Bus
/// implementations serialize the envelope as their transport dictates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    /// End-to-end identifier, echoed by receipts.
    pub message_id: String,
    /// Profile of the payload, e.g. `DIALOG_INNBYGGER_EKONTAKT`.
    pub message_function: String,
    /// HER-id of the sender.
    pub from_her_id: i32,
    /// HER-id of the recipient.
    pub to_her_id: i32,
    /// Collaboration protocol agreement, when one was resolved.
    pub cpa_id: Option<Uuid>,
    /// National identity number of the person the message concerns.
    pub personal_id: Option<String>,
    /// MIME type of `payload`.
    pub content_type: String,
    /// When the sending application produced the message.
    pub application_timestamp: DateTime<Utc>,
    /// Earliest time the counterparty should see the message.
    pub scheduled_send_time_utc: Option<DateTime<Utc>>,
    /// The protected payload bytes.
    pub payload: Vec<u8>,
    /// Destination queue.
    pub queue_name: String,
}

/// Interface to the outbound transport.
#[async_trait]
pub trait QueueSender: Send + Sync {
    /// Hand one envelope to the transport.
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), TransportError>;
}
