use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;
use x509_parser::prelude::*;

use crate::certificates::{CertificateFault, CertificateUsage, CertificateValidator};

const MAX_CHAIN_LENGTH: usize = 10;

/// Error type for validator construction and trust anchor loading.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("trust anchor {index} does not parse as X.509: {reason}")]
    InvalidAnchor { index: usize, reason: String },

    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<walkdir::Error> for CertificateError {
    fn from(e: walkdir::Error) -> Self {
        CertificateError::Io(e.into())
    }
}

/// How hard to try to establish revocation status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationCheck {
    /// Never consult revocation lists.
    Disabled,
    /// Consult revocation lists, but treat an unobtainable or unverifiable
    /// answer as acceptable.
    #[default]
    BestEffort,
    /// A certificate without a verifiable revocation answer is rejected.
    Required,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// DER encoded trust anchors. Self-signed entries terminate chains;
    /// other entries serve as intermediates during path building. Empty
    /// disables the chain check.
    pub trust_anchors: Vec<Vec<u8>>,
    pub revocation: RevocationCheck,
    /// Timeout applied to each revocation list download.
    pub crl_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            trust_anchors: Vec::new(),
            revocation: RevocationCheck::default(),
            crl_timeout: Duration::from_secs(30),
        }
    }
}

/// Certificate trust evaluator backed by a configured anchor set.
///
/// Checks run in a fixed order: parseability, validity window, key usage,
/// chain of trust, revocation. The first failed check decides the fault.
/// Fetched revocation lists are cached per distribution point until their
/// own `next_update` passes.
#[derive(Debug)]
pub struct X509CertificateValidator {
    anchors: Vec<Vec<u8>>,
    revocation: RevocationCheck,
    client: Client,
    request_timeout: Duration,
    crl_cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl X509CertificateValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self, CertificateError> {
        for (index, raw) in config.trust_anchors.iter().enumerate() {
            match X509Certificate::from_der(raw) {
                Ok((_, cert)) => debug!("registered trust anchor: {}", cert.subject()),
                Err(e) => {
                    return Err(CertificateError::InvalidAnchor {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            anchors: config.trust_anchors,
            revocation: config.revocation,
            client: Client::builder().timeout(config.crl_timeout).build()?,
            request_timeout: config.crl_timeout,
            crl_cache: RwLock::new(HashMap::new()),
        })
    }

    // Try to find an issuer for the given certificate among the anchors
    fn find_issuer(&self, cert: &X509Certificate<'_>) -> Option<Vec<u8>> {
        for anchor in &self.anchors {
            if let Ok((_, candidate)) = X509Certificate::from_der(anchor)
                && candidate.subject() == cert.issuer()
                && cert.verify_signature(Some(candidate.public_key())).is_ok()
            {
                return Some(anchor.clone());
            }
        }
        None
    }

    // Check if a certificate is itself a configured self-signed anchor
    fn is_trusted_root(&self, cert: &X509Certificate<'_>) -> bool {
        self.anchors.iter().any(|anchor| {
            if let Ok((_, trusted)) = X509Certificate::from_der(anchor) {
                trusted.subject() == cert.subject()
                    && trusted.public_key().raw == cert.public_key().raw
                    && trusted.verify_signature(None).is_ok()
            } else {
                false
            }
        })
    }

    // Walk issuer by issuer from the leaf towards a trusted root
    fn chains_to_anchor(&self, leaf_der: &[u8]) -> bool {
        let mut current = leaf_der.to_vec();
        let mut seen_serials: HashSet<Vec<u8>> = HashSet::new();

        for _ in 0..MAX_CHAIN_LENGTH {
            let Ok((_, cert)) = X509Certificate::from_der(&current) else {
                return false;
            };

            if !seen_serials.insert(cert.raw_serial().to_vec()) {
                warn!("certificate chain contains a cycle: {}", cert.subject());
                return false;
            }
            if !cert.validity().is_valid() {
                warn!("chain member outside its validity window: {}", cert.subject());
                return false;
            }
            if self.is_trusted_root(&cert) {
                return true;
            }
            if cert.subject() == cert.issuer() {
                // Self-signed, but not one of our anchors
                return false;
            }

            match self.find_issuer(&cert) {
                Some(issuer) => current = issuer,
                None => {
                    debug!("no issuer found for {}", cert.subject());
                    return false;
                }
            }
        }

        warn!("certificate chain exceeds {MAX_CHAIN_LENGTH} certificates");
        false
    }

    async fn cached_or_fetched_crl(&self, url: &str) -> Option<Vec<u8>> {
        {
            let cache = self.crl_cache.read().await;
            if let Some(der) = cache.get(url)
                && crl_is_current(der)
            {
                debug!("using cached CRL for {url}");
                return Some(der.clone());
            }
        }

        let der = self.fetch_crl(url).await?;
        if CertificateRevocationList::from_der(&der).is_err() {
            warn!("response from {url} does not parse as a CRL");
            return None;
        }

        self.crl_cache
            .write()
            .await
            .insert(url.to_string(), der.clone());
        Some(der)
    }

    async fn fetch_crl(&self, url: &str) -> Option<Vec<u8>> {
        debug!("fetching CRL from {url}");

        let response = match timeout(self.request_timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("CRL fetch from {url} failed: {e}");
                return None;
            }
            Err(_) => {
                warn!("CRL fetch from {url} timed out");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("CRL fetch from {url} returned HTTP {}", response.status());
            return None;
        }

        match response.bytes().await {
            Ok(body) => Some(body.to_vec()),
            Err(e) => {
                warn!("reading CRL body from {url} failed: {e}");
                None
            }
        }
    }

    async fn revocation_fault(&self, cert: &X509Certificate<'_>) -> Option<CertificateFault> {
        let distribution_points = crl_distribution_points(cert);
        if distribution_points.is_empty() {
            debug!("certificate carries no CRL distribution points");
            return match self.revocation {
                RevocationCheck::Required => Some(CertificateFault::RevocationUnknown),
                _ => None,
            };
        }

        let issuer = self.find_issuer(cert);
        let mut answered = false;

        for url in &distribution_points {
            let Some(crl_der) = self.cached_or_fetched_crl(url).await else {
                continue;
            };
            let Ok((_, crl)) = CertificateRevocationList::from_der(&crl_der) else {
                warn!("discarding unparsable CRL from {url}");
                continue;
            };

            // A list we cannot tie back to the issuer is no answer at all
            match &issuer {
                Some(issuer_der) => {
                    let Ok((_, issuer_cert)) = X509Certificate::from_der(issuer_der) else {
                        continue;
                    };
                    if !crl_signature_is_valid(&crl, &issuer_cert) {
                        warn!("discarding CRL from {url}: signature does not verify");
                        continue;
                    }
                }
                None => {
                    warn!("cannot verify CRL from {url}: issuer is not among the trust anchors");
                    continue;
                }
            }

            if crl
                .tbs_cert_list
                .revoked_certificates
                .iter()
                .any(|revoked| revoked.user_certificate == cert.tbs_certificate.serial)
            {
                info!(
                    "certificate with serial {} is revoked",
                    hex::encode(cert.raw_serial())
                );
                return Some(CertificateFault::Revoked);
            }
            answered = true;
        }

        if !answered {
            return match self.revocation {
                RevocationCheck::Required => Some(CertificateFault::RevocationUnknown),
                _ => {
                    warn!("no verifiable revocation answer, accepting certificate");
                    None
                }
            };
        }
        None
    }
}

#[async_trait]
impl CertificateValidator for X509CertificateValidator {
    async fn validate(&self, der: &[u8], usage: CertificateUsage) -> Option<CertificateFault> {
        let Ok((_, cert)) = X509Certificate::from_der(der) else {
            return Some(CertificateFault::Missing);
        };

        let now = Utc::now().timestamp();
        if cert.validity().not_before.timestamp() > now {
            return Some(CertificateFault::NotYetValid);
        }
        if cert.validity().not_after.timestamp() < now {
            return Some(CertificateFault::Expired);
        }

        match cert.tbs_certificate.key_usage() {
            Ok(Some(key_usage)) => {
                let permitted = match usage {
                    CertificateUsage::Encryption => key_usage.value.data_encipherment(),
                    CertificateUsage::Signing => key_usage.value.non_repudiation(),
                };
                if !permitted {
                    debug!("{} lacks the {usage} key usage", cert.subject());
                    return Some(CertificateFault::UsageMismatch);
                }
            }
            // No declared restriction
            Ok(None) => {}
            // A duplicated or malformed extension counts as a mismatch
            Err(_) => return Some(CertificateFault::UsageMismatch),
        }

        if !self.anchors.is_empty() && !self.chains_to_anchor(der) {
            return Some(CertificateFault::UntrustedChain);
        }

        if self.revocation != RevocationCheck::Disabled
            && let Some(fault) = self.revocation_fault(&cert).await
        {
            return Some(fault);
        }

        None
    }
}

/// Load DER encoded trust anchors from a directory tree.
///
/// Files with a .der, .cer, or .crt extension are read; anything that does
/// not parse as X.509 is skipped.
pub async fn load_trust_anchors<P: Into<PathBuf>>(
    dir: P,
) -> Result<Vec<Vec<u8>>, CertificateError> {
    let dir = dir.into();
    let mut anchors = Vec::new();

    for entry in WalkDir::new(&dir) {
        let entry = entry?;
        let path = entry.path();

        if path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("der")
                    || ext.eq_ignore_ascii_case("cer")
                    || ext.eq_ignore_ascii_case("crt")
            })
            && let Ok(der) = fs::read(path).await
            && X509Certificate::from_der(&der).is_ok()
        {
            anchors.push(der);
        }
    }

    info!("loaded {} trust anchors from {}", anchors.len(), dir.display());
    Ok(anchors)
}

fn crl_distribution_points(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut urls = Vec::new();

    for ext in cert.tbs_certificate.extensions() {
        if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
            for point in &points.points {
                if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                    for name in names {
                        if let GeneralName::URI(uri) = name
                            && is_supported_crl_url(uri)
                        {
                            urls.push((*uri).to_string());
                        }
                    }
                }
            }
        }
    }
    urls
}

fn is_supported_crl_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

fn crl_is_current(der: &[u8]) -> bool {
    let Ok((_, crl)) = CertificateRevocationList::from_der(der) else {
        return false;
    };
    match crl.tbs_cert_list.next_update {
        Some(next_update) => next_update.timestamp() >= Utc::now().timestamp(),
        None => true,
    }
}

fn crl_signature_is_valid(
    crl: &CertificateRevocationList<'_>,
    issuer: &X509Certificate<'_>,
) -> bool {
    if issuer.tbs_certificate.subject != crl.tbs_cert_list.issuer {
        return false;
    }
    x509_parser::verify::verify_signature(
        &issuer.tbs_certificate.subject_pki,
        &crl.signature_algorithm,
        &crl.signature_value,
        crl.tbs_cert_list.as_ref(),
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::test_certs::{CertificateRequest, TestCertificateAuthority};
    use chrono::{Duration as ChronoDuration, Utc};

    fn validator(anchors: Vec<Vec<u8>>, revocation: RevocationCheck) -> X509CertificateValidator {
        X509CertificateValidator::new(ValidatorConfig {
            trust_anchors: anchors,
            revocation,
            crl_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_valid_certificate_for_its_usage() {
        let ca = TestCertificateAuthority::new();
        let encryption = ca.issue(CertificateRequest::encryption("Clinic A"));
        let signing = ca.issue(CertificateRequest::signing("Clinic A"));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&encryption.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, None);

        let fault = validator
            .validate(&signing.certificate_der, CertificateUsage::Signing)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_rejects_unparsable_bytes() {
        let validator = validator(Vec::new(), RevocationCheck::Disabled);

        let fault = validator
            .validate(b"not a certificate", CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::Missing));
    }

    #[tokio::test]
    async fn test_rejects_certificate_not_yet_valid() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(
            CertificateRequest::encryption("Clinic A").with_validity(
                Utc::now() + ChronoDuration::days(1),
                Utc::now() + ChronoDuration::days(30),
            ),
        );
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::NotYetValid));
    }

    #[tokio::test]
    async fn test_rejects_expired_certificate() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(
            CertificateRequest::encryption("Clinic A").with_validity(
                Utc::now() - ChronoDuration::days(30),
                Utc::now() - ChronoDuration::days(1),
            ),
        );
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::Expired));
    }

    #[tokio::test]
    async fn test_rejects_certificate_without_required_usage_bit() {
        let ca = TestCertificateAuthority::new();
        let signing = ca.issue(CertificateRequest::signing("Clinic A"));
        let encryption = ca.issue(CertificateRequest::encryption("Clinic A"));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&signing.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::UsageMismatch));

        let fault = validator
            .validate(&encryption.certificate_der, CertificateUsage::Signing)
            .await;
        assert_eq!(fault, Some(CertificateFault::UsageMismatch));
    }

    #[tokio::test]
    async fn test_accepts_certificate_without_key_usage_extension() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(CertificateRequest::unrestricted("Clinic A"));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Signing)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_rejects_leaf_from_unknown_authority() {
        let trusted_ca = TestCertificateAuthority::new();
        let other_ca = TestCertificateAuthority::new();
        let issued = other_ca.issue(CertificateRequest::encryption("Clinic A"));
        let validator = validator(vec![trusted_ca.certificate_der()], RevocationCheck::Disabled);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::UntrustedChain));
    }

    #[tokio::test]
    async fn test_accepts_chain_through_intermediate() {
        let root = TestCertificateAuthority::new();
        let intermediate = root.issue_intermediate("Sector CA");
        let issued = intermediate.issue(CertificateRequest::encryption("Clinic A"));
        let validator = validator(
            vec![root.certificate_der(), intermediate.certificate_der()],
            RevocationCheck::Disabled,
        );

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_empty_anchor_set_disables_chain_check() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(CertificateRequest::encryption("Clinic A"));
        let validator = validator(Vec::new(), RevocationCheck::Disabled);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_required_revocation_without_sources_is_unknown() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(CertificateRequest::encryption("Clinic A"));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Required);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::RevocationUnknown));
    }

    #[tokio::test]
    async fn test_best_effort_tolerates_unreachable_distribution_point() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(
            CertificateRequest::encryption("Clinic A")
                .with_crl_distribution_point("http://127.0.0.1:9/unreachable.crl"),
        );
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::BestEffort);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_required_revocation_with_unreachable_source_is_unknown() {
        let ca = TestCertificateAuthority::new();
        let issued = ca.issue(
            CertificateRequest::encryption("Clinic A")
                .with_crl_distribution_point("http://127.0.0.1:9/unreachable.crl"),
        );
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Required);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::RevocationUnknown));
    }

    // One-URL HTTP endpoint for revocation lists, bound before the
    // certificate is issued so the distribution point can carry the port
    async fn bind_crl_endpoint() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/network.crl", listener.local_addr().unwrap());
        (listener, url)
    }

    fn serve_crl(listener: tokio::net::TcpListener, crl_der: Vec<u8>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut request = [0u8; 1024];
                let _ = stream.read(&mut request).await;
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/pkix-crl\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    crl_der.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&crl_der).await;
                let _ = stream.shutdown().await;
            }
        });
    }

    #[tokio::test]
    async fn test_rejects_certificate_listed_on_a_crl() {
        let ca = TestCertificateAuthority::new();
        let (listener, url) = bind_crl_endpoint().await;
        let issued =
            ca.issue(CertificateRequest::encryption("Clinic A").with_crl_distribution_point(&url));
        serve_crl(listener, ca.issue_crl(&[&issued], Utc::now() + ChronoDuration::days(7)));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::BestEffort);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::Revoked));
    }

    #[tokio::test]
    async fn test_verified_crl_not_listing_the_serial_satisfies_required_revocation() {
        let ca = TestCertificateAuthority::new();
        let other = ca.issue(CertificateRequest::encryption("Clinic B"));
        let (listener, url) = bind_crl_endpoint().await;
        let issued =
            ca.issue(CertificateRequest::encryption("Clinic A").with_crl_distribution_point(&url));
        serve_crl(listener, ca.issue_crl(&[&other], Utc::now() + ChronoDuration::days(7)));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Required);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, None);
    }

    #[tokio::test]
    async fn test_discards_crl_whose_signature_does_not_verify() {
        let ca = TestCertificateAuthority::new();
        let rogue = TestCertificateAuthority::new();
        let (listener, url) = bind_crl_endpoint().await;
        let issued =
            ca.issue(CertificateRequest::encryption("Clinic A").with_crl_distribution_point(&url));
        // Same issuer name, wrong key: the list must not count as an answer
        serve_crl(listener, rogue.issue_crl(&[&issued], Utc::now() + ChronoDuration::days(7)));
        let validator = validator(vec![ca.certificate_der()], RevocationCheck::Required);

        let fault = validator
            .validate(&issued.certificate_der, CertificateUsage::Encryption)
            .await;
        assert_eq!(fault, Some(CertificateFault::RevocationUnknown));
    }

    #[tokio::test]
    async fn test_rejects_invalid_trust_anchor() {
        let result = X509CertificateValidator::new(ValidatorConfig {
            trust_anchors: vec![vec![0u8; 10]],
            ..ValidatorConfig::default()
        });
        assert!(matches!(
            result,
            Err(CertificateError::InvalidAnchor { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_trust_anchors_skips_non_certificates() {
        let dir = tempfile::TempDir::new().unwrap();
        let ca = TestCertificateAuthority::new();

        std::fs::write(dir.path().join("ca.der"), ca.certificate_der()).unwrap();
        std::fs::write(dir.path().join("junk.der"), b"junk").unwrap();
        std::fs::write(dir.path().join("note.txt"), b"not a certificate").unwrap();

        let anchors = load_trust_anchors(dir.path()).await.unwrap();
        assert_eq!(anchors, vec![ca.certificate_der()]);
    }
}
