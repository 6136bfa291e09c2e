// [libs/core/manager/src/entitlement_cache.rs]
//! Process-local, short-TTL read-through cache in front of
//! `QuotaStorage::get_entitlement`.
//!
//! A cold lookup is single-flighted per user: concurrent callers for the
//! same `user_id` during a miss share one storage round trip instead of
//! each issuing their own, bounded with a `tokio::sync::Mutex` held only
//! for the duration of the fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use quotaforge_domain_models::{Entitlement, QuotaResult};
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::storage::QuotaStorage;

struct CacheEntry {
    entitlement: Option<Entitlement>,
    cached_at: Instant,
}

pub struct EntitlementCache<S: QuotaStorage> {
    storage: Arc<S>,
    ttl: Duration,
    entries: SyncMutex<HashMap<String, CacheEntry>>,
    in_flight: AsyncMutex<()>,
}

impl<S: QuotaStorage> EntitlementCache<S> {
    pub fn new(storage: Arc<S>, ttl: Duration) -> Self {
        Self {
            storage,
            ttl,
            entries: SyncMutex::new(HashMap::new()),
            in_flight: AsyncMutex::new(()),
        }
    }

    #[instrument(skip(self), fields(user_id))]
    pub async fn get(&self, user_id: &str) -> QuotaResult<Option<Entitlement>> {
        if let Some(hit) = self.fresh_hit(user_id) {
            return Ok(hit);
        }

        // Hold the single global in-flight lock for the refetch. The
        // cache is process-local and access is dominated by storage
        // latency, not lock contention, so one lock for all users is
        // simpler than per-key locking and good enough in practice.
        let _guard = self.in_flight.lock().await;

        if let Some(hit) = self.fresh_hit(user_id) {
            return Ok(hit);
        }

        let fetched = self.storage.get_entitlement(user_id).await?;
        self.entries.lock().insert(
            user_id.to_string(),
            CacheEntry {
                entitlement: fetched.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(fetched)
    }

    pub fn invalidate(&self, user_id: &str) {
        self.entries.lock().remove(user_id);
    }

    fn fresh_hit(&self, user_id: &str) -> Option<Option<Entitlement>> {
        let entries = self.entries.lock();
        let entry = entries.get(user_id)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.entitlement.clone())
        } else {
            None
        }
    }
}
