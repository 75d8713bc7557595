//! Certificate material for tests and local development.
//!
//! Production deployments receive their counterparty certificates from the
//! address registry; this factory builds a throwaway CA hierarchy with
//! controllable key usage, validity windows, and revocation pointers.

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509, X509Builder, X509Extension, X509Name, X509NameBuilder};

/// Key usage bits stamped on an issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuedKeyUsage {
    /// Data and key encipherment, the profile of an encryption certificate.
    Encryption,
    /// Non-repudiation and digital signature, the profile of a signing
    /// certificate.
    Signing,
    /// No key-usage extension at all.
    Unrestricted,
}

/// What to put in a certificate issued by [`TestCertificateAuthority`].
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub common_name: String,
    pub key_usage: IssuedKeyUsage,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub crl_distribution_point: Option<String>,
}

impl CertificateRequest {
    fn new(common_name: &str, key_usage: IssuedKeyUsage) -> Self {
        Self {
            common_name: common_name.to_string(),
            key_usage,
            // Backdated slightly so a freshly issued certificate is valid
            // even on hosts with small clock offsets
            not_before: Utc::now() - Duration::hours(1),
            not_after: Utc::now() + Duration::days(365),
            crl_distribution_point: None,
        }
    }

    /// An encryption certificate request valid for one year.
    pub fn encryption(common_name: &str) -> Self {
        Self::new(common_name, IssuedKeyUsage::Encryption)
    }

    /// A signing certificate request valid for one year.
    pub fn signing(common_name: &str) -> Self {
        Self::new(common_name, IssuedKeyUsage::Signing)
    }

    /// A request without a key-usage extension.
    pub fn unrestricted(common_name: &str) -> Self {
        Self::new(common_name, IssuedKeyUsage::Unrestricted)
    }

    /// Overrides the validity window.
    pub fn with_validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Adds a CRL distribution point extension with the given URL.
    pub fn with_crl_distribution_point(mut self, url: &str) -> Self {
        self.crl_distribution_point = Some(url.to_string());
        self
    }
}

/// A certificate issued by a [`TestCertificateAuthority`].
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_der: Vec<u8>,
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
}

/// A self-contained certificate authority for tests.
pub struct TestCertificateAuthority {
    certificate: X509,
    key: PKey<Private>,
}

impl TestCertificateAuthority {
    /// Create a new self-signed root authority.
    pub fn new() -> Self {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&generate_serial_number()).unwrap();

        let name = create_x509_name(&[("O", "Test Health Network"), ("CN", "Test Root CA")]);
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();

        let not_before = Asn1Time::days_from_now(0).unwrap();
        let not_after = Asn1Time::days_from_now(3650).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();

        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            certificate: builder.build(),
            key,
        }
    }

    /// Create a subordinate authority whose certificate is signed by `self`.
    pub fn issue_intermediate(&self, common_name: &str) -> TestCertificateAuthority {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&generate_serial_number()).unwrap();

        let name = create_x509_name(&[("O", "Test Health Network"), ("CN", common_name)]);
        builder.set_subject_name(&name).unwrap();
        builder
            .set_issuer_name(self.certificate.subject_name())
            .unwrap();
        builder.set_pubkey(&key).unwrap();

        let not_before = Asn1Time::days_from_now(0).unwrap();
        let not_after = Asn1Time::days_from_now(1825).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();

        builder.sign(&self.key, MessageDigest::sha256()).unwrap();

        TestCertificateAuthority {
            certificate: builder.build(),
            key,
        }
    }

    /// Issue an end-entity certificate described by the request.
    pub fn issue(&self, request: CertificateRequest) -> IssuedCertificate {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&generate_serial_number()).unwrap();

        let name = create_x509_name(&[
            ("O", "Test Health Network"),
            ("CN", &request.common_name),
        ]);
        builder.set_subject_name(&name).unwrap();
        builder
            .set_issuer_name(self.certificate.subject_name())
            .unwrap();
        builder.set_pubkey(&key).unwrap();

        let not_before = Asn1Time::from_unix(request.not_before.timestamp()).unwrap();
        let not_after = Asn1Time::from_unix(request.not_after.timestamp()).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();

        match request.key_usage {
            IssuedKeyUsage::Encryption => builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .data_encipherment()
                        .key_encipherment()
                        .build()
                        .unwrap(),
                )
                .unwrap(),
            IssuedKeyUsage::Signing => builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .non_repudiation()
                        .digital_signature()
                        .build()
                        .unwrap(),
                )
                .unwrap(),
            IssuedKeyUsage::Unrestricted => {}
        }

        if let Some(url) = &request.crl_distribution_point {
            // No dedicated builder exists for this extension
            #[allow(deprecated)]
            let extension = X509Extension::new_nid(
                None,
                Some(&builder.x509v3_context(Some(&self.certificate), None)),
                Nid::CRL_DISTRIBUTION_POINTS,
                &format!("URI:{url}"),
            )
            .unwrap();
            builder.append_extension(extension).unwrap();
        }

        builder.sign(&self.key, MessageDigest::sha256()).unwrap();
        let certificate = builder.build();

        IssuedCertificate {
            certificate_der: certificate.to_der().unwrap(),
            certificate_pem: certificate.to_pem().unwrap(),
            private_key_pem: key.private_key_to_pem_pkcs8().unwrap(),
        }
    }

    /// Sign a revocation list naming the given certificates, current until
    /// `next_update`.
    ///
    /// No builder exists for CRLs, so the version 2 structure is assembled
    /// directly and signed with the authority key.
    pub fn issue_crl(&self, revoked: &[&IssuedCertificate], next_update: DateTime<Utc>) -> Vec<u8> {
        let revocation_date = Utc::now() - Duration::hours(1);
        let mut entries = Vec::new();
        for cert in revoked {
            let serial = X509::from_der(&cert.certificate_der)
                .unwrap()
                .serial_number()
                .to_bn()
                .unwrap()
                .to_vec();
            let entry = [der_integer(&serial), der_utc_time(revocation_date)].concat();
            entries.extend(der_wrap(0x30, &entry));
        }

        let mut tbs = Vec::new();
        tbs.extend(der_integer(&[1]));
        tbs.extend(SHA256_WITH_RSA);
        tbs.extend(self.certificate.subject_name().to_der().unwrap());
        tbs.extend(der_utc_time(revocation_date));
        tbs.extend(der_utc_time(next_update));
        if !entries.is_empty() {
            tbs.extend(der_wrap(0x30, &entries));
        }
        let tbs = der_wrap(0x30, &tbs);

        let mut signer = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
        signer.update(&tbs).unwrap();
        let signature = signer.sign_to_vec().unwrap();
        // BIT STRING content starts with the unused-bits count
        let mut signature_bits = vec![0x00];
        signature_bits.extend(signature);

        let body = [tbs, SHA256_WITH_RSA.to_vec(), der_wrap(0x03, &signature_bits)].concat();
        der_wrap(0x30, &body)
    }

    pub fn certificate_der(&self) -> Vec<u8> {
        self.certificate.to_der().unwrap()
    }

    pub fn certificate_pem(&self) -> Vec<u8> {
        self.certificate.to_pem().unwrap()
    }
}

impl Default for TestCertificateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

// AlgorithmIdentifier for sha256WithRSAEncryption
const SHA256_WITH_RSA: [u8; 15] = [
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b, 0x05, 0x00,
];

fn der_wrap(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if content.len() < 128 {
        out.push(content.len() as u8);
    } else {
        let length = content.len().to_be_bytes();
        let first = length.iter().position(|b| *b != 0).unwrap_or(length.len() - 1);
        out.push(0x80 | (length.len() - first) as u8);
        out.extend(&length[first..]);
    }
    out.extend(content);
    out
}

fn der_integer(big_endian: &[u8]) -> Vec<u8> {
    let mut content = big_endian.to_vec();
    if content.is_empty() {
        content.push(0);
    }
    if content[0] & 0x80 != 0 {
        content.insert(0, 0);
    }
    der_wrap(0x02, &content)
}

fn der_utc_time(time: DateTime<Utc>) -> Vec<u8> {
    der_wrap(0x17, time.format("%y%m%d%H%M%SZ").to_string().as_bytes())
}

fn generate_serial_number() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn create_x509_name(entries: &[(&str, &str)]) -> X509Name {
    let mut name_builder = X509NameBuilder::new().unwrap();
    for (key, value) in entries {
        name_builder.append_entry_by_text(key, value).unwrap();
    }
    name_builder.build()
}
