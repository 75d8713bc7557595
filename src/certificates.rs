use std::fmt;

use async_trait::async_trait;

pub mod test_certs;
pub mod validator;

pub use validator::{
    CertificateError, RevocationCheck, ValidatorConfig, X509CertificateValidator,
    load_trust_anchors,
};

/// The purpose a certificate is evaluated for.
///
/// Profiles in this network bind encryption to the data-encipherment key
/// usage and signing to the non-repudiation key usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    Encryption,
    Signing,
}

impl fmt::Display for CertificateUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateUsage::Encryption => write!(f, "encryption"),
            CertificateUsage::Signing => write!(f, "signing"),
        }
    }
}

/// Why a certificate was rejected.
///
/// One fault per evaluation; the checks run in a fixed order and the first
/// failure wins. An acceptable certificate is reported as `Option::None`
/// by [`CertificateValidator::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateFault {
    /// No certificate was available, or the bytes do not parse as X.509.
    Missing,
    /// The validity period has not started yet.
    NotYetValid,
    /// The validity period is over.
    Expired,
    /// The key-usage extension does not allow the requested purpose.
    UsageMismatch,
    /// No path from the certificate to a configured trust anchor.
    UntrustedChain,
    /// The certificate is listed on a revocation list.
    Revoked,
    /// Revocation status was required but could not be determined.
    RevocationUnknown,
}

impl fmt::Display for CertificateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CertificateFault::Missing => "no parseable certificate available",
            CertificateFault::NotYetValid => "not yet valid",
            CertificateFault::Expired => "expired",
            CertificateFault::UsageMismatch => "key usage does not permit this purpose",
            CertificateFault::UntrustedChain => "does not chain to a trusted root",
            CertificateFault::Revoked => "revoked by its issuer",
            CertificateFault::RevocationUnknown => "revocation status could not be determined",
        };
        f.write_str(reason)
    }
}

/// Which side of the exchange a certificate belongs to.
///
/// Selects between the remote and local rejection identifiers; the
/// evaluation itself is the same for both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOrigin {
    /// The counterparty's encryption certificate.
    Remote,
    /// Our own signing certificate.
    Local,
}

/// Abstract interface for certificate trust evaluation.
#[async_trait]
pub trait CertificateValidator: Send + Sync {
    /// Evaluate a DER encoded certificate for the given usage.
    ///
    /// Returns `None` when the certificate is acceptable, otherwise the
    /// first fault found. Implementations may perform network lookups
    /// (revocation lists), so the check is async.
    async fn validate(&self, der: &[u8], usage: CertificateUsage) -> Option<CertificateFault>;
}
