//! Background expiry of abandoned reservations.
//!
//! Callers that reserve and then crash never commit or release. Their holds
//! stay active until the deadline passes and a sweep marks them EXPIRED. The
//! sweeper runs that sweep on a fixed interval until its cancellation token
//! fires.

use std::{sync::Arc, time::Duration};

use budgetguard_engine::BudgetEngine;
use budgetguard_types::{BudgetError, Result};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodically calls [`BudgetEngine::cleanup_expired_reservations`].
pub struct ExpirySweeper {
    engine: Arc<BudgetEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(engine: Arc<BudgetEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Sweeper ticking at the engine's configured `sweep_interval_ms`.
    #[must_use]
    pub fn from_engine_config(engine: Arc<BudgetEngine>) -> Self {
        let interval = Duration::from_millis(engine.config().sweep_interval_ms);
        Self::new(engine, interval)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep against the engine clock's current instant.
    ///
    /// The store calls are blocking, so the sweep runs on the blocking pool.
    ///
    /// # Errors
    /// Propagates store failures; a panicked sweep maps to [`BudgetError::Internal`].
    #[tracing::instrument(skip(self), fields(interval_ms = self.interval.as_millis()))]
    pub async fn sweep_once(&self) -> Result<usize> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let now = engine.now();
            engine.cleanup_expired_reservations(now)
        })
        .await
        .map_err(|e| BudgetError::Internal(format!("sweep task failed: {e}")))?
    }

    /// Start the sweep loop on the current runtime.
    ///
    /// The first sweep happens immediately. A failed sweep is logged and the
    /// loop keeps going; only `shutdown` stops it.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_ms = self.interval.as_millis(),
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown.cancelled() => {
                        tracing::info!("Expiry sweeper shutting down");
                        return;
                    }
                }

                match self.sweep_once().await {
                    Ok(0) => tracing::trace!("No expired reservations"),
                    Ok(expired) => tracing::debug!(expired, "Sweep expired reservations"),
                    Err(e) if e.is_transient() => {
                        tracing::warn!(error = %e, "Sweep failed, retrying next tick");
                    }
                    Err(e) => tracing::error!(error = %e, "Sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use budgetguard_engine::{MemoryStore, StaticRegistry};
    use budgetguard_types::EngineConfig;

    use super::*;

    fn engine(sweep_interval_ms: u64) -> Arc<BudgetEngine> {
        let config = EngineConfig {
            sweep_interval_ms,
            ..EngineConfig::default()
        };
        Arc::new(
            BudgetEngine::new(
                Arc::new(StaticRegistry::new()),
                Arc::new(MemoryStore::new()),
                config,
            )
            .unwrap(),
        )
    }

    #[test]
    fn interval_follows_config() {
        let sweeper = ExpirySweeper::from_engine_config(engine(1_500));
        assert_eq!(sweeper.interval(), Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn sweep_on_empty_store_expires_nothing() {
        let sweeper = ExpirySweeper::new(engine(10), Duration::from_millis(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_exits() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let handle = ExpirySweeper::from_engine_config(engine(60_000)).spawn(shutdown);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
