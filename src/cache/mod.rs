//! Per-user retrieval cache: an approximate set of article fingerprints that
//! short-circuits re-ingestion without a storage round-trip.

mod bloom;
mod exact;

pub use bloom::BloomCache;
pub use exact::ExactCache;

/// Per-user fingerprint set.
///
/// `contains` may return false positives but never a false negative for a
/// fingerprint added since the cache was loaded.
pub trait RetrievalCache: Send + Sync {
    /// Insert a fingerprint; idempotent.
    fn add(&self, user_id: &str, fingerprint: &str);

    fn contains(&self, user_id: &str, fingerprint: &str) -> bool;

    /// Make sure `user_id` has a set, creating an empty one if absent.
    fn register_user(&self, user_id: &str);
}
