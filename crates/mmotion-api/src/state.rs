//! Application state.

use std::sync::Arc;

use mmotion_queue::{JobQueue, ProgressChannel};
use mmotion_storage::ObjectStore;
use mmotion_store::JobStore;

use crate::auth::TokenVerifier;
use crate::config::ApiConfig;
use crate::middleware::RateLimiterCache;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: JobStore,
    pub storage: Arc<ObjectStore>,
    pub queue: Arc<JobQueue>,
    pub progress: Arc<ProgressChannel>,
    pub verifier: TokenVerifier,
    pub limiter: RateLimiterCache,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = JobStore::from_env().await?;
        let storage = ObjectStore::from_env()?;
        let queue = JobQueue::from_env()?;
        let progress = ProgressChannel::from_env()?;

        let verifier = TokenVerifier::new(&config.jwt_secret);
        let limiter = RateLimiterCache::new(config.submit_rate_per_sec, config.submit_burst);

        Ok(Self {
            config,
            store,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            progress: Arc::new(progress),
            verifier,
            limiter,
        })
    }
}
