use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use hermod_messaging::certificates::test_certs::{
    CertificateRequest, IssuedCertificate, TestCertificateAuthority,
};
use hermod_messaging::certificates::{CertificateFault, CertificateUsage, CertificateValidator};
use hermod_messaging::client::MessagingClient;
use hermod_messaging::config::MessagingSettings;
use hermod_messaging::message::OutgoingMessage;
use hermod_messaging::protection::SigningCredentials;
use hermod_messaging::queue::MemoryQueue;
use hermod_messaging::registry::{CommunicationParty, MemoryRegistry, MessageFunction};
use uuid::Uuid;

pub const MY_HER_ID: i32 = 91462;
pub const OTHER_HER_ID: i32 = 93252;
pub const OTHER_PARTY_QUEUE: &str = "93252_async";
pub const DIALOG_FUNCTION: &str = "DIALOG_INNBYGGER_EKONTAKT";
pub const RECEIPT_FUNCTION: &str = "APPREC";

/// A validator that counts its calls and can be told to reject one usage,
/// the way a misconfigured counterparty certificate would surface.
#[derive(Clone)]
pub struct RecordingValidator {
    calls: Arc<AtomicUsize>,
    fault_on: Option<(CertificateUsage, CertificateFault)>,
}

impl RecordingValidator {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fault_on: None,
        }
    }

    pub fn faulting(usage: CertificateUsage, fault: CertificateFault) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fault_on: Some((usage, fault)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CertificateValidator for RecordingValidator {
    async fn validate(&self, _der: &[u8], usage: CertificateUsage) -> Option<CertificateFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fault_on {
            Some((faulty_usage, fault)) if faulty_usage == usage => Some(fault),
            _ => None,
        }
    }
}

/// One fully wired client against in-memory collaborators, with handles to
/// everything a test wants to inspect afterwards.
pub struct TestHarness {
    pub client: MessagingClient,
    pub queue: MemoryQueue,
    pub registry: MemoryRegistry,
    pub validator: RecordingValidator,
    pub recipient: IssuedCertificate,
    pub authority_pem: Vec<u8>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with(RecordingValidator::accepting(), false)
    }

    pub fn with(validator: RecordingValidator, ignore_certificate_error_on_send: bool) -> Self {
        let authority = TestCertificateAuthority::new();
        let recipient = authority.issue(CertificateRequest::encryption("Other Party"));
        let sender = authority.issue(CertificateRequest::signing("My Party"));
        let credentials =
            SigningCredentials::from_pem(&sender.certificate_pem, &sender.private_key_pem).unwrap();

        let registry = MemoryRegistry::new();
        registry.register_party(CommunicationParty {
            her_id: OTHER_HER_ID,
            name: "Other Party".to_string(),
            encryption_certificate: recipient.certificate_der.clone(),
            asynchronous_queue_name: OTHER_PARTY_QUEUE.to_string(),
        });
        // The receipt function itself is deliberately not registered: receipts
        // are gated on the function they acknowledge
        registry.register_function(MessageFunction::new(DIALOG_FUNCTION));

        let settings = MessagingSettings {
            my_her_id: MY_HER_ID,
            ignore_certificate_error_on_send,
            queue_name_prefix: String::new(),
        };

        let queue = MemoryQueue::new();
        let client = MessagingClient::new(
            settings,
            credentials,
            registry.clone(),
            registry.clone(),
            validator.clone(),
            queue.clone(),
        );

        Self {
            client,
            queue,
            registry,
            validator,
            recipient,
            authority_pem: authority.certificate_pem(),
        }
    }
}

/// A complete, sendable message addressed to the other party.
pub fn create_message() -> OutgoingMessage {
    OutgoingMessage {
        to_her_id: OTHER_HER_ID,
        cpa_id: None,
        message_id: Uuid::new_v4().to_string(),
        message_function: DIALOG_FUNCTION.to_string(),
        receipt_for_message_function: None,
        personal_id: Some("12345".to_string()),
        scheduled_send_time_utc: Some(Utc::now()),
        payload: Some(b"<MsgHead>ekontakt</MsgHead>".to_vec()),
    }
}
