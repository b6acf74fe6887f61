use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use growable_bloom_filter::GrowableBloom;
use tokio_util::sync::CancellationToken;

use super::RetrievalCache;
use crate::storage::{timed, Database};

/// Target false-positive rate of each user's filter.
const FALSE_POSITIVE_RATE: f64 = 0.01;

/// Expected insertions before a filter grows another layer.
const EXPECTED_ITEMS: usize = 10_000;

fn empty_filter() -> GrowableBloom {
    GrowableBloom::new(FALSE_POSITIVE_RATE, EXPECTED_ITEMS)
}

fn encode(filter: &GrowableBloom) -> Result<String> {
    let bytes = serde_json::to_vec(filter)?;
    Ok(STANDARD.encode(bytes))
}

fn decode(blob: &str) -> Result<GrowableBloom> {
    let bytes = STANDARD.decode(blob)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Scalable bloom filters, one per user, persisted to the `retrieval_cache`
/// table.
///
/// A single mutex guards the whole map. Before [`BloomCache::load`] has
/// completed, lookups return `false` and inserts are dropped.
pub struct BloomCache {
    filters: Mutex<HashMap<String, GrowableBloom>>,
    ready: AtomicBool,
}

impl Default for BloomCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomCache {
    /// An empty cache that is not yet serving.
    pub fn new() -> Self {
        Self {
            filters: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Materialize every known user's filter from storage.
    ///
    /// Users without a stored blob, or whose blob fails to decode, start
    /// with an empty filter.
    pub async fn load(db: &Database) -> Result<Self> {
        let cache = Self::new();
        cache.reload(db).await?;
        Ok(cache)
    }

    /// Replace the in-memory filters with the stored ones and start serving.
    pub async fn reload(&self, db: &Database) -> Result<()> {
        let mut blobs = timed(db.get_retrieval_cache())
            .await
            .context("Failed to read retrieval cache")?;
        let users = timed(db.get_users())
            .await
            .context("Failed to enumerate users for retrieval cache")?;

        let mut loaded = HashMap::with_capacity(users.len());
        for user in users {
            let filter = match blobs.remove(&user.id) {
                Some(blob) => decode(&blob).unwrap_or_else(|e| {
                    tracing::error!(
                        user_id = %user.id,
                        error = %e,
                        "Corrupt retrieval cache entry, starting empty"
                    );
                    empty_filter()
                }),
                None => empty_filter(),
            };
            loaded.insert(user.id, filter);
        }
        for orphan in blobs.keys() {
            tracing::debug!(user_id = %orphan, "Ignoring retrieval cache entry of unknown user");
        }

        let users = loaded.len();
        *self.filters.lock().unwrap_or_else(PoisonError::into_inner) = loaded;
        self.ready.store(true, Ordering::Release);
        tracing::info!(users, "Retrieval cache loaded");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Serialize every filter while holding the lock.
    fn snapshot(&self) -> HashMap<String, String> {
        let filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        filters
            .iter()
            .filter_map(|(user_id, filter)| match encode(filter) {
                Ok(blob) => Some((user_id.clone(), blob)),
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Failed to serialize retrieval cache");
                    None
                }
            })
            .collect()
    }

    /// Write every user's filter to storage in one transaction.
    ///
    /// Adds made while the write is in flight land in the next flush.
    pub async fn flush(&self, db: &Database) -> Result<()> {
        if !self.is_ready() {
            tracing::debug!("Retrieval cache not loaded, skipping flush");
            return Ok(());
        }
        let blobs = self.snapshot();
        timed(db.persist_retrieval_cache(&blobs))
            .await
            .context("Failed to persist retrieval cache")?;
        tracing::debug!(users = blobs.len(), "Retrieval cache flushed");
        Ok(())
    }

    /// Flush every `period` until `cancel` fires, then flush once more.
    ///
    /// A flush already in progress when `cancel` fires runs to completion.
    pub async fn run_persist_loop(
        self: Arc<Self>,
        db: Database,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown signal received, writing retrieval cache");
                    if let Err(e) = self.flush(&db).await {
                        tracing::error!(error = %e, "Final retrieval cache flush failed");
                    }
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.flush(&db).await {
                        tracing::error!(error = %e, "Periodic retrieval cache flush failed");
                    }
                }
            }
        }
    }
}

impl RetrievalCache for BloomCache {
    fn add(&self, user_id: &str, fingerprint: &str) {
        if !self.is_ready() {
            tracing::warn!(user_id = %user_id, "Retrieval cache add before load, dropping");
            return;
        }
        let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        match filters.get_mut(user_id) {
            Some(filter) => {
                filter.insert(fingerprint);
            }
            None => {
                tracing::error!(user_id = %user_id, "Retrieval cache add for unknown user, skipping");
            }
        }
    }

    fn contains(&self, user_id: &str, fingerprint: &str) -> bool {
        if !self.is_ready() {
            tracing::warn!(user_id = %user_id, "Retrieval cache lookup before load");
            return false;
        }
        let filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        filters
            .get(user_id)
            .is_some_and(|filter| filter.contains(fingerprint))
    }

    fn register_user(&self, user_id: &str) {
        let mut filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        filters
            .entry(user_id.to_string())
            .or_insert_with(empty_filter);
    }
}

impl std::fmt::Debug for BloomCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let users = self
            .filters
            .lock()
            .map(|filters| filters.len())
            .unwrap_or_default();
        f.debug_struct("BloomCache")
            .field("users", &users)
            .field("ready", &self.is_ready())
            .finish()
    }
}
