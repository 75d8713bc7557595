use async_trait::async_trait;
use color_eyre::Report;
use thiserror::Error;

pub mod cache;
pub mod memory;

pub use cache::CachingAddressRegistry;
pub use memory::MemoryRegistry;

/// Error type for registry lookups.
///
/// Covers transport-level failures only. A directory that answers but does
/// not know the party or function reports a regular `Ok(None)`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Custom(#[from] Report),
}

/// A party registered in the network directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationParty {
    pub her_id: i32,
    pub name: String,
    /// DER encoded encryption certificate as published in the directory.
    /// Empty when the party has not published one.
    pub encryption_certificate: Vec<u8>,
    /// Queue the party receives asynchronous messages on. Empty when the
    /// party relies on conventional queue addressing.
    pub asynchronous_queue_name: String,
}

/// A message function known to the function registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFunction {
    pub name: String,
    /// Whether ordinary messages of this function may be dispatched.
    pub dispatchable: bool,
    /// Whether receipts may reference messages of this function.
    pub receipt_target: bool,
}

impl MessageFunction {
    /// A function that is dispatchable and a valid receipt target.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dispatchable: true,
            receipt_target: true,
        }
    }

    pub fn with_dispatchable(mut self, dispatchable: bool) -> Self {
        self.dispatchable = dispatchable;
        self
    }

    pub fn with_receipt_target(mut self, receipt_target: bool) -> Self {
        self.receipt_target = receipt_target;
        self
    }
}

/// Abstract interface for the address half of the network directory.
#[async_trait]
pub trait AddressRegistry: Send + Sync {
    /// Look up a party by HerId.
    ///
    /// `Ok(None)` means the directory answered and knows no such party.
    async fn communication_party(
        &self,
        her_id: i32,
    ) -> Result<Option<CommunicationParty>, RegistryError>;
}

/// Abstract interface for the message-function half of the network directory.
#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    /// Look up a message function by name.
    async fn find_function(&self, name: &str) -> Result<Option<MessageFunction>, RegistryError>;
}
