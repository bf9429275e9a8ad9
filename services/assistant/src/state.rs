//! Shared application state.

use cal_core::{Clock, FixedClock, SharedClock, SystemClock, TimezoneResolver};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::handlers::intents::IntentDeps;
use crate::health::HealthTracker;
use crate::http_client::ClientManager;
use crate::precompute::PrecomputeStore;
use crate::response_cache::ResponseCache;
use crate::skipped::{InMemorySkippedStore, SkippedStore};
use crate::window::WindowPublisher;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub resolver: Arc<TimezoneResolver>,
    pub window: Arc<WindowPublisher>,
    pub precomputed: Arc<PrecomputeStore>,
    pub cache: Arc<ResponseCache>,
    pub health: Arc<HealthTracker>,
    pub skipped: Arc<InMemorySkippedStore>,
    pub deps: Arc<IntentDeps>,
    pub http_client: Arc<ClientManager>,
    /// Bounds concurrent RRULE expansions (`RRULE_WORKER_CONCURRENCY`).
    pub expansion_workers: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let clock: SharedClock = match config.test_time {
            Some(instant) => Arc::new(FixedClock(instant)),
            None => Arc::new(SystemClock),
        };
        let now = clock.now_utc();

        AppState {
            clock,
            resolver: Arc::new(TimezoneResolver::new(config.default_timezone)),
            window: Arc::new(WindowPublisher::new(now)),
            precomputed: Arc::new(PrecomputeStore::new(config.production)),
            cache: Arc::new(ResponseCache::new(config.production)),
            health: Arc::new(HealthTracker::new(config.refresh_interval)),
            skipped: Arc::new(InMemorySkippedStore::new()),
            deps: Arc::new(IntentDeps::default()),
            http_client: Arc::new(ClientManager::new(config.request_timeout)),
            expansion_workers: Arc::new(Semaphore::new(config.rrule_worker_concurrency)),
            config: Arc::new(config),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// The skipped store as its trait object, for pipeline stages.
    pub fn skipped_store(&self) -> Arc<dyn SkippedStore> {
        Arc::clone(&self.skipped) as Arc<dyn SkippedStore>
    }
}
