//! The messaging client and its send pipeline.
//!
//! [`MessagingClient::send_and_continue`] runs one message through precondition
//! validation, the function registry gate, certificate trust evaluation, and
//! payload protection, then hands the result to the outbound queue. The first
//! fault stops the pipeline; the transport is never touched on failure.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::certificates::{CertificateFault, CertificateUsage, CertificateValidator, FaultOrigin};
use crate::config::MessagingSettings;
use crate::errors::SendError;
use crate::message::OutgoingMessage;
use crate::protection::{CmsMessageProtection, MessageProtection, SigningCredentials};
use crate::queue::{QueueEnvelope, QueueSender};
use crate::registry::{AddressRegistry, CommunicationParty, FunctionRegistry};

/// The outbound half of the messaging client.
///
/// Collaborators sit behind `Arc`, so cloning is cheap and clones share the
/// registry caches. One instance serves any number of concurrent sends.
#[derive(Clone)]
pub struct MessagingClient {
    settings: MessagingSettings,
    credentials: SigningCredentials,
    addresses: Arc<dyn AddressRegistry>,
    functions: Arc<dyn FunctionRegistry>,
    validator: Arc<dyn CertificateValidator>,
    protection: Arc<dyn MessageProtection>,
    queue: Arc<dyn QueueSender>,
}

impl MessagingClient {
    /// Creates a client with the default sign-then-encrypt CMS protection.
    pub fn new(
        settings: MessagingSettings,
        credentials: SigningCredentials,
        addresses: impl AddressRegistry + 'static,
        functions: impl FunctionRegistry + 'static,
        validator: impl CertificateValidator + 'static,
        queue: impl QueueSender + 'static,
    ) -> Self {
        Self {
            settings,
            credentials,
            addresses: Arc::new(addresses),
            functions: Arc::new(functions),
            validator: Arc::new(validator),
            protection: Arc::new(CmsMessageProtection::new()),
            queue: Arc::new(queue),
        }
    }

    /// Replaces the payload protection implementation.
    pub fn with_protection(mut self, protection: impl MessageProtection + 'static) -> Self {
        self.protection = Arc::new(protection);
        self
    }

    /// Validates, protects, and enqueues one message.
    ///
    /// `Ok(())` means the transport accepted the envelope; delivery to the
    /// counterparty happens later, out of band. `Err` identifies exactly one
    /// fault, and the message itself is left untouched with the caller.
    #[instrument(skip(self, message))]
    pub async fn send_and_continue(&self, message: &OutgoingMessage) -> Result<(), SendError> {
        let payload = ensure_preconditions(message)?;
        self.ensure_known_function(message).await?;

        let party = self.communication_party(message.to_her_id).await?;
        self.check_certificate(
            &party.encryption_certificate,
            CertificateUsage::Encryption,
            FaultOrigin::Remote,
            message.to_her_id,
        )
        .await?;
        self.check_certificate(
            self.credentials.certificate_der(),
            CertificateUsage::Signing,
            FaultOrigin::Local,
            message.to_her_id,
        )
        .await?;

        let protected = self
            .protection
            .protect(payload, &party.encryption_certificate, &self.credentials)
            .await?;

        let envelope = QueueEnvelope {
            message_id: message.message_id.clone(),
            message_function: message.message_function.clone(),
            from_her_id: self.settings.my_her_id,
            to_her_id: message.to_her_id,
            cpa_id: message.cpa_id,
            personal_id: message.personal_id.clone(),
            content_type: self.protection.content_type().to_string(),
            application_timestamp: Utc::now(),
            scheduled_send_time_utc: message.scheduled_send_time_utc,
            payload: protected,
            queue_name: self.queue_name_for(&party),
        };
        self.queue.enqueue(envelope).await?;

        debug!(
            message_id = %message.message_id,
            to_her_id = message.to_her_id,
            "message accepted by transport"
        );
        Ok(())
    }

    /// The function registry gate: receipts must reference a registered
    /// receipt target, ordinary messages must name a dispatchable function.
    async fn ensure_known_function(&self, message: &OutgoingMessage) -> Result<(), SendError> {
        let name = message.gated_function();
        let acceptable = match self.functions.find_function(name).await? {
            Some(function) if message.is_receipt() => function.receipt_target,
            Some(function) => function.dispatchable,
            None => false,
        };
        if acceptable {
            Ok(())
        } else {
            Err(SendError::InvalidMessageFunction {
                function: name.to_string(),
            })
        }
    }

    /// Resolves the counterparty. An unknown HerId has no certificate and no
    /// queue address, so it surfaces as a missing remote certificate
    /// regardless of the ignore flag.
    async fn communication_party(&self, her_id: i32) -> Result<CommunicationParty, SendError> {
        match self.addresses.communication_party(her_id).await? {
            Some(party) => Ok(party),
            None => Err(SendError::RemoteCertificate {
                her_id,
                fault: CertificateFault::Missing,
            }),
        }
    }

    async fn check_certificate(
        &self,
        der: &[u8],
        usage: CertificateUsage,
        origin: FaultOrigin,
        her_id: i32,
    ) -> Result<(), SendError> {
        let Some(fault) = self.validator.validate(der, usage).await else {
            return Ok(());
        };
        if self.settings.ignore_certificate_error_on_send {
            warn!(%usage, %fault, "ignoring certificate fault on send");
            return Ok(());
        }
        Err(SendError::certificate(origin, her_id, fault))
    }

    fn queue_name_for(&self, party: &CommunicationParty) -> String {
        if party.asynchronous_queue_name.is_empty() {
            format!("{}{}", self.settings.queue_name_prefix, party.her_id)
        } else {
            party.asynchronous_queue_name.clone()
        }
    }
}

/// Fixed-order precondition checks. Non-suspending, run before any
/// collaborator is consulted; the first failure alone is reported. Returns
/// the payload bytes so later stages need no second presence check.
fn ensure_preconditions(message: &OutgoingMessage) -> Result<&[u8], SendError> {
    if message.to_her_id <= 0 {
        return Err(SendError::ArgumentOutOfRange { field: "to_her_id" });
    }
    if message.message_id.is_empty() {
        return Err(SendError::InvalidArgument { field: "message_id" });
    }
    if message.message_function.is_empty() {
        return Err(SendError::InvalidArgument {
            field: "message_function",
        });
    }
    match message.payload.as_deref() {
        Some(payload) => Ok(payload),
        None => Err(SendError::InvalidArgument { field: "payload" }),
    }
}
