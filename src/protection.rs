use std::fmt;

use async_trait::async_trait;
use openssl::error::ErrorStack;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;
use thiserror::Error;

/// MIME type of a CMS protected payload.
pub const CMS_CONTENT_TYPE: &str = "application/pkcs7-mime";

/// Error type for payload protection.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("cryptographic operation failed: {0}")]
    OpenSsl(#[from] ErrorStack),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("untrusted signer")]
    UntrustedSigner,

    #[error("tampered or invalid signature")]
    BadSignature,
}

/// The sender's signing certificate and private key.
///
/// Parsed once at construction so per-message protection does not re-read
/// key material; the raw DER stays available for trust evaluation.
#[derive(Clone)]
pub struct SigningCredentials {
    certificate: X509,
    certificate_der: Vec<u8>,
    key: PKey<Private>,
}

impl SigningCredentials {
    /// Build from a PEM certificate and a PEM private key.
    pub fn from_pem(certificate_pem: &[u8], key_pem: &[u8]) -> Result<Self, ProtectionError> {
        let certificate = X509::from_pem(certificate_pem)?;
        Self::new(certificate, PKey::private_key_from_pem(key_pem)?)
    }

    /// Build from a DER certificate and a PEM private key.
    pub fn from_der(certificate_der: &[u8], key_pem: &[u8]) -> Result<Self, ProtectionError> {
        let certificate = X509::from_der(certificate_der)?;
        Self::new(certificate, PKey::private_key_from_pem(key_pem)?)
    }

    fn new(certificate: X509, key: PKey<Private>) -> Result<Self, ProtectionError> {
        let certificate_der = certificate.to_der()?;
        Ok(Self {
            certificate,
            certificate_der,
            key,
        })
    }

    /// DER encoding of the signing certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }
}

// Key material must not leak through logs
impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials").finish_non_exhaustive()
    }
}

/// Abstract interface for payload protection.
#[async_trait]
pub trait MessageProtection: Send + Sync {
    /// MIME type of the protected bytes.
    fn content_type(&self) -> &'static str;

    /// Protect a payload for the recipient identified by its DER encoded
    /// encryption certificate.
    async fn protect(
        &self,
        payload: &[u8],
        recipient_certificate_der: &[u8],
        credentials: &SigningCredentials,
    ) -> Result<Vec<u8>, ProtectionError>;
}

/// Sign-then-encrypt CMS (PKCS#7) protection.
///
/// The payload is signed with the sender's non-repudiation key, and the
/// signed structure is encrypted under the recipient's encryption
/// certificate with AES-256-CBC.
#[derive(Debug, Default, Clone)]
pub struct CmsMessageProtection;

impl CmsMessageProtection {
    pub fn new() -> Self {
        Self
    }

    /// Reverse [`MessageProtection::protect`]: decrypt with the recipient's
    /// key, verify the signature against the trust anchors, and return the
    /// original payload bytes.
    pub fn unprotect(
        &self,
        protected: &[u8],
        certificate_pem: &[u8],
        key_pem: &[u8],
        trust_anchors_pem: &[&[u8]],
    ) -> Result<Vec<u8>, ProtectionError> {
        let certificate = X509::from_pem(certificate_pem)?;
        let key = PKey::private_key_from_pem(key_pem)?;

        let enveloped = Pkcs7::from_der(protected)
            .map_err(|e| ProtectionError::Invalid(format!("not a PKCS#7 structure: {e}")))?;
        let signed_der = enveloped.decrypt(&key, &certificate, Pkcs7Flags::empty())?;

        let signed = Pkcs7::from_der(&signed_der).map_err(|e| {
            ProtectionError::Invalid(format!("decrypted content is not a PKCS#7 structure: {e}"))
        })?;

        let mut store_builder = X509StoreBuilder::new()?;
        for anchor_pem in trust_anchors_pem {
            store_builder.add_cert(X509::from_pem(anchor_pem)?)?;
        }
        let store = store_builder.build();

        let extra_certs = Stack::new()?;
        let mut payload = Vec::new();
        if signed
            .verify(
                &extra_certs,
                &store,
                None,
                Some(&mut payload),
                Pkcs7Flags::empty(),
            )
            .is_ok()
        {
            return Ok(payload);
        }

        // Differentiate between trust failure and bad signature: try
        // signature-only verification
        let mut unverified = Vec::new();
        match signed.verify(
            &extra_certs,
            &store,
            None,
            Some(&mut unverified),
            Pkcs7Flags::NOVERIFY,
        ) {
            Ok(()) => Err(ProtectionError::UntrustedSigner),
            Err(_) => Err(ProtectionError::BadSignature),
        }
    }
}

#[async_trait]
impl MessageProtection for CmsMessageProtection {
    fn content_type(&self) -> &'static str {
        CMS_CONTENT_TYPE
    }

    async fn protect(
        &self,
        payload: &[u8],
        recipient_certificate_der: &[u8],
        credentials: &SigningCredentials,
    ) -> Result<Vec<u8>, ProtectionError> {
        let recipient = X509::from_der(recipient_certificate_der).map_err(|e| {
            ProtectionError::Invalid(format!("recipient certificate does not parse: {e}"))
        })?;

        let extra_certs = Stack::new()?;
        let signed = Pkcs7::sign(
            &credentials.certificate,
            &credentials.key,
            &extra_certs,
            payload,
            Pkcs7Flags::BINARY,
        )?;
        let signed_der = signed.to_der()?;

        let mut recipients = Stack::new()?;
        recipients.push(recipient)?;
        let enveloped = Pkcs7::encrypt(
            &recipients,
            &signed_der,
            Cipher::aes_256_cbc(),
            Pkcs7Flags::BINARY,
        )?;

        Ok(enveloped.to_der()?)
    }
}
