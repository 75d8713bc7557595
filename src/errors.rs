use thiserror::Error;

use crate::certificates::{CertificateFault, FaultOrigin};
use crate::protection::ProtectionError;
use crate::queue::TransportError;
use crate::registry::RegistryError;

// Stable identifiers callers can branch on without parsing message text.
mod codes {
    pub const INVALID_ARGUMENT: &str = "send#invalidArgument";
    pub const ARGUMENT_OUT_OF_RANGE: &str = "send#argumentOutOfRange";
    pub const INVALID_MESSAGE_FUNCTION: &str = "send#invalidMessageFunction";
    pub const REMOTE_CERTIFICATE: &str = "send#remoteCertificate";
    pub const LOCAL_CERTIFICATE: &str = "send#localCertificate";
    pub const REGISTRY_UNAVAILABLE: &str = "send#registryUnavailable";
    pub const MESSAGE_PROTECTION: &str = "send#messageProtection";
    pub const TRANSPORT_REJECTED: &str = "send#transportRejected";
}

/// Error type for the send pipeline.
///
/// Every rejected send carries exactly one variant, raised by the first
/// stage that failed. Later stages are not reached.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("required argument '{field}' is missing or empty")]
    InvalidArgument { field: &'static str },

    #[error("argument '{field}' is out of its valid range")]
    ArgumentOutOfRange { field: &'static str },

    #[error("message function '{function}' is not registered for this use")]
    InvalidMessageFunction { function: String },

    #[error("encryption certificate of counterparty {her_id} was rejected: {fault}")]
    RemoteCertificate {
        her_id: i32,
        fault: CertificateFault,
    },

    #[error("own signing certificate was rejected: {fault}")]
    LocalCertificate { fault: CertificateFault },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Protection(#[from] ProtectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SendError {
    /// Build the certificate rejection matching the evaluated side.
    pub(crate) fn certificate(origin: FaultOrigin, her_id: i32, fault: CertificateFault) -> Self {
        match origin {
            FaultOrigin::Remote => SendError::RemoteCertificate { her_id, fault },
            FaultOrigin::Local => SendError::LocalCertificate { fault },
        }
    }

    /// Convert this error to a stable error code.
    pub fn error_code(&self) -> &'static str {
        use SendError::*;

        match self {
            InvalidArgument { .. } => codes::INVALID_ARGUMENT,
            ArgumentOutOfRange { .. } => codes::ARGUMENT_OUT_OF_RANGE,
            InvalidMessageFunction { .. } => codes::INVALID_MESSAGE_FUNCTION,
            RemoteCertificate { .. } => codes::REMOTE_CERTIFICATE,
            LocalCertificate { .. } => codes::LOCAL_CERTIFICATE,
            Registry(_) => codes::REGISTRY_UNAVAILABLE,
            Protection(_) => codes::MESSAGE_PROTECTION,
            Transport(_) => codes::TRANSPORT_REJECTED,
        }
    }

    /// Whether retrying the same call later could succeed without caller-side
    /// changes. A counterparty certificate may be renewed and registries may
    /// come back; the caller's own arguments and certificate will not fix
    /// themselves.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SendError::RemoteCertificate { .. } | SendError::Registry(_) | SendError::Transport(_)
        )
    }
}
