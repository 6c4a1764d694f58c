use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use crate::Fingerprint;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    fingerprint: Arc<Fingerprint>,
    /// Milliseconds since the cache epoch; drives TTL expiry.
    touched_at: AtomicU64,
    /// Monotonic access sequence; drives LRU eviction.
    recency: AtomicU64,
}

/// LRU cache of fingerprints keyed by submission id, bounded by entry count
/// and TTL.
///
/// Reads take the read lock and bump recency through atomics; insertion,
/// eviction and the periodic sweep take the write lock. Losing the cache
/// costs recomputation only, since fingerprints are a pure function of the
/// stored source.
pub struct FingerprintCache {
    entries: RwLock<HashMap<i32, CacheEntry>>,
    epoch: Instant,
    clock: AtomicU64,
    max_entries: usize,
    ttl: Duration,
}

impl FingerprintCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
            clock: AtomicU64::new(0),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a fingerprint, refreshing its recency.
    pub async fn get(&self, submission_id: i32) -> Option<Arc<Fingerprint>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&submission_id)?;
        entry.touched_at.store(self.now_ms(), Ordering::Relaxed);
        entry.recency.store(self.tick(), Ordering::Relaxed);
        Some(entry.fingerprint.clone())
    }

    /// Insert a fingerprint, evicting least-recently-used entries if the
    /// cache grew past its bound.
    pub async fn insert(&self, submission_id: i32, fingerprint: Fingerprint) -> Arc<Fingerprint> {
        let fingerprint = Arc::new(fingerprint);
        let mut entries = self.entries.write().await;
        entries.insert(
            submission_id,
            CacheEntry {
                fingerprint: fingerprint.clone(),
                touched_at: AtomicU64::new(self.now_ms()),
                recency: AtomicU64::new(self.tick()),
            },
        );

        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            let mut by_recency: Vec<(i32, u64)> = entries
                .iter()
                .map(|(id, entry)| (*id, entry.recency.load(Ordering::Relaxed)))
                .collect();
            by_recency.sort_unstable_by_key(|(_, recency)| *recency);
            for (id, _) in by_recency.into_iter().take(excess) {
                entries.remove(&id);
            }
        }

        fingerprint
    }

    /// Remove entries not touched within `max_age`. Returns removed count.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let now = self.now_ms();
        let max_age_ms = max_age.as_millis() as u64;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries
            .retain(|_, entry| now.saturating_sub(entry.touched_at.load(Ordering::Relaxed)) < max_age_ms);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawn the background sweep that expires entries older than the TTL.
    pub fn spawn_sweeper(cache: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = cache.sweep_stale(cache.ttl).await;
                if removed > 0 {
                    info!(removed, "Swept expired fingerprint cache entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(values: &[u64]) -> Fingerprint {
        values.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = FingerprintCache::new(10, DEFAULT_TTL);
        cache.insert(1, fp(&[1, 2, 3])).await;

        let hit = cache.get(1).await.expect("entry present");
        assert_eq!(*hit, fp(&[1, 2, 3]));
        assert!(cache.get(2).await.is_none());
    }

    #[tokio::test]
    async fn test_insert_overwrites() {
        let cache = FingerprintCache::new(10, DEFAULT_TTL);
        cache.insert(1, fp(&[1])).await;
        cache.insert(1, fp(&[2])).await;
        assert_eq!(*cache.get(1).await.unwrap(), fp(&[2]));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = FingerprintCache::new(2, DEFAULT_TTL);
        cache.insert(1, fp(&[1])).await;
        cache.insert(2, fp(&[2])).await;

        // Touch 1 so 2 becomes the LRU entry.
        cache.get(1).await.unwrap();
        cache.insert(3, fp(&[3])).await;

        assert!(cache.get(1).await.is_some());
        assert!(cache.get(2).await.is_none());
        assert!(cache.get(3).await.is_some());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_sweep_zero_age_removes_everything() {
        let cache = FingerprintCache::new(10, DEFAULT_TTL);
        cache.insert(1, fp(&[1])).await;
        cache.insert(2, fp(&[2])).await;

        let removed = cache.sweep_stale(Duration::ZERO).await;
        assert_eq!(removed, 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_preserves_recent() {
        let cache = FingerprintCache::new(10, DEFAULT_TTL);
        cache.insert(1, fp(&[1])).await;

        let removed = cache.sweep_stale(Duration::from_secs(3600)).await;
        assert_eq!(removed, 0);
        assert_eq!(cache.len().await, 1);
    }
}
