//! Background purge of refresh tokens past end of life.
//!
//! Superseded and revoked rows stay in the store until their end of life so
//! replays keep getting a definite answer; only the sweep deletes them.

use crate::tokens::repo::TokenStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 600;

#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    interval_seconds: u64,
}

impl SweepConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = seconds.max(1);
        self
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn_sweep_worker(store: Arc<dyn TokenStore>, config: SweepConfig) {
    tokio::spawn(async move {
        info!(
            interval_seconds = config.interval_seconds,
            "refresh token sweep worker started"
        );
        loop {
            tokio::time::sleep(config.interval()).await;
            match store.purge_expired().await {
                Ok(0) => debug!("sweep found nothing to purge"),
                Ok(purged) => info!(purged, "swept expired refresh tokens"),
                Err(err) => error!("refresh token sweep failed: {err:#}"),
            }
        }
    });
}
