use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use crate::registry::{AddressRegistry, CommunicationParty, RegistryError};

const CACHE_CAPACITY: usize = 1000;

struct CachedParty {
    party: CommunicationParty,
    fetched_at: Instant,
}

/// Caching decorator over an [`AddressRegistry`].
///
/// Party records change rarely, so hot counterparties are served from a
/// bounded per-HerId cache until the entry outlives `ttl`. Negative lookups
/// are not cached; a party registered after a failed send becomes visible
/// on the next call.
pub struct CachingAddressRegistry<R> {
    inner: R,
    cache: RwLock<LruCache<i32, CachedParty>>,
    ttl: Duration,
}

impl<R> CachingAddressRegistry<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("cache capacity is non-zero"),
            )),
            ttl,
        }
    }
}

#[async_trait]
impl<R: AddressRegistry> AddressRegistry for CachingAddressRegistry<R> {
    async fn communication_party(
        &self,
        her_id: i32,
    ) -> Result<Option<CommunicationParty>, RegistryError> {
        {
            // The lookup promotes recency, so even reads need the write lock
            let mut cache = self.cache.write().await;
            if let Some(cached) = cache.get(&her_id) {
                if cached.fetched_at.elapsed() < self.ttl {
                    debug!("address cache hit for HerId {her_id}");
                    return Ok(Some(cached.party.clone()));
                }
                cache.pop(&her_id);
            }
        }

        let party = self.inner.communication_party(her_id).await?;
        if let Some(party) = &party {
            self.cache.write().await.put(
                her_id,
                CachedParty {
                    party: party.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(party)
    }
}
