use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose};
use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::certificates::RevocationCheck;
use crate::protection::{ProtectionError, SigningCredentials};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub messaging: MessagingSettings,
    #[serde(default)]
    pub bus: Option<BusSettings>,
    #[serde(default)]
    pub certificates: CertificateSettings,
    #[serde(default)]
    pub signing: Option<SigningSettings>,
}

/// Behavior of the send pipeline itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingSettings {
    /// HerId of the organization this client sends on behalf of.
    pub my_her_id: i32,
    /// Log certificate faults as warnings instead of failing the send.
    pub ignore_certificate_error_on_send: bool,
    /// Prefix for conventional queue names when the address registry does not
    /// carry an explicit queue for the counterparty.
    pub queue_name_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    /// Connection string for the message bus.
    pub connection: SecretString,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateSettings {
    /// Directory holding DER encoded trust anchors.
    #[serde(default)]
    pub trust_anchor_dir: Option<String>,
    #[serde(default)]
    pub revocation: RevocationCheck,
}

/// The sender's signing key material, as deployments ship it: a base64
/// encoded DER certificate and a PEM private key kept secret.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningSettings {
    pub certificate: String,
    pub private_key: SecretString,
}

impl SigningSettings {
    pub fn credentials(&self) -> Result<SigningCredentials, ProtectionError> {
        let certificate_der = general_purpose::STANDARD
            .decode(&self.certificate)
            .map_err(|e| {
                ProtectionError::Invalid(format!("signing certificate is not valid base64: {e}"))
            })?;
        SigningCredentials::from_der(&certificate_der, self.private_key.expose_secret().as_bytes())
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("messaging.my_her_id", 0)?
            .set_default("messaging.ignore_certificate_error_on_send", false)?
            .set_default("messaging.queue_name_prefix", "")?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // Should be in the format HERMOD_MESSAGING__MY_HER_ID or
            // HERMOD_BUS__CONNECTION
            builder = builder.add_source(
                Environment::with_prefix("HERMOD")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
