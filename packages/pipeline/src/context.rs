use std::collections::HashMap;
use std::sync::Arc;

use mq::QueueBroker;
use sea_orm::DatabaseConnection;
use similarity::{FingerprintCache, LshIndex};
use tokio::sync::Mutex;

use crate::config::AppConfig;

/// Everything the workers share, constructed once at boot and passed by
/// reference. No module-level state exists after startup.
pub struct PipelineContext {
    pub db: DatabaseConnection,
    pub broker: QueueBroker,
    pub config: AppConfig,
    /// Bounded fingerprint cache; losing it only costs recomputation.
    pub fingerprints: Arc<FingerprintCache>,
    /// Per-problem LSH indexes, built lazily by the plagiarism worker.
    /// Process-local and additive; rebuilt from the store after a restart.
    pub indexes: Mutex<HashMap<i32, LshIndex>>,
}

impl PipelineContext {
    pub fn new(db: DatabaseConnection, broker: QueueBroker, config: AppConfig) -> Self {
        let fingerprints = Arc::new(FingerprintCache::new(
            config.fp_cache_max_entries,
            config.fp_cache_ttl(),
        ));

        Self {
            db,
            broker,
            config,
            fingerprints,
            indexes: Mutex::new(HashMap::new()),
        }
    }
}
