use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::registry::{
    AddressRegistry, CommunicationParty, FunctionRegistry, MessageFunction, RegistryError,
};

/// An in-memory directory serving both registry interfaces.
///
/// Useful for testing and development.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    parties: Arc<DashMap<i32, CommunicationParty>>,
    functions: Arc<DashMap<String, MessageFunction>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a party record.
    pub fn register_party(&self, party: CommunicationParty) {
        self.parties.insert(party.her_id, party);
    }

    /// Register or replace a message function.
    pub fn register_function(&self, function: MessageFunction) {
        self.functions.insert(function.name.clone(), function);
    }
}

#[async_trait]
impl AddressRegistry for MemoryRegistry {
    async fn communication_party(
        &self,
        her_id: i32,
    ) -> Result<Option<CommunicationParty>, RegistryError> {
        Ok(self.parties.get(&her_id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl FunctionRegistry for MemoryRegistry {
    async fn find_function(&self, name: &str) -> Result<Option<MessageFunction>, RegistryError> {
        Ok(self.functions.get(name).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_registry_flow() {
        let registry = MemoryRegistry::new();
        registry.register_party(CommunicationParty {
            her_id: 91462,
            name: "Clinic A".to_string(),
            encryption_certificate: vec![0x30],
            asynchronous_queue_name: "91462_async".to_string(),
        });
        registry.register_function(MessageFunction::new("DIALOG_INNBYGGER_EKONTAKT"));

        let party = registry.communication_party(91462).await.unwrap().unwrap();
        assert_eq!(party.name, "Clinic A");
        assert!(registry.communication_party(1).await.unwrap().is_none());

        let function = registry
            .find_function("DIALOG_INNBYGGER_EKONTAKT")
            .await
            .unwrap()
            .unwrap();
        assert!(function.dispatchable);
        assert!(registry.find_function("BOB").await.unwrap().is_none());
    }
}
