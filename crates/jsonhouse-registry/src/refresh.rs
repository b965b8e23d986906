//! Periodic and on-demand registry refresh
//!
//! A single background task owns reloading. It wakes on a timer and on
//! explicit reload requests, and exits when its cancellation token fires.

use crate::memory::InMemoryTableRegistry;
use crate::{RegistryError, TableRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct RefreshConfig {
    /// Period of the background reload
    pub interval: Duration,
    /// A forced reload is skipped when the last one is younger than this
    pub force_debounce: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            force_debounce: Duration::from_secs(60),
        }
    }
}

type ReloadRequest = oneshot::Sender<Result<bool, RegistryError>>;

/// Requests reloads from the refresh task.
#[derive(Clone)]
pub struct ReloadHandle {
    requests: mpsc::Sender<ReloadRequest>,
}

impl ReloadHandle {
    /// Asks for a reload and waits until it finished. Returns whether a
    /// reload actually ran (it is skipped right after a previous one).
    pub async fn force_reload(&self) -> Result<bool, RegistryError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.requests
            .send(done_tx)
            .await
            .map_err(|_| RegistryError::RefreshStopped)?;
        done_rx.await.map_err(|_| RegistryError::RefreshStopped)?
    }
}

/// Starts the refresh task. The first reload happens immediately.
pub fn spawn_refresh_loop(
    registry: Arc<InMemoryTableRegistry>,
    config: RefreshConfig,
    shutdown: CancellationToken,
) -> (JoinHandle<()>, ReloadHandle) {
    let (tx, mut rx) = mpsc::channel::<ReloadRequest>(16);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = config.interval.as_secs(), "table registry refresh started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("table registry refresh stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = reload(&registry).await {
                        error!(error = %e, "periodic table registry reload failed");
                    }
                }
                request = rx.recv() => {
                    let Some(done) = request else { break };
                    let fresh = registry
                        .since_last_reload()
                        .map(|age| age < config.force_debounce)
                        .unwrap_or(false);
                    let outcome = if fresh {
                        debug!("forced reload skipped, registry is fresh");
                        Ok(false)
                    } else {
                        reload(&registry).await.map(|_| true)
                    };
                    // requester may have given up waiting
                    let _ = done.send(outcome);
                }
            }
        }
    });

    (handle, ReloadHandle { requests: tx })
}

async fn reload(registry: &Arc<InMemoryTableRegistry>) -> Result<(), RegistryError> {
    let registry = Arc::clone(registry);
    tokio::task::spawn_blocking(move || registry.reload_all())
        .await
        .map_err(|e| RegistryError::Reload(e.to_string()))?
}
