//! Heartbeat ingestion and the staleness sweeper.

use crate::capacity::LoopHandle;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskfabric_core::{AgentRecord, FabricResult};
use taskfabric_store::DispatchStore;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Applies one heartbeat: stamps the receive time and upserts the record,
/// replacing the previous status and resource snapshot wholesale.
pub async fn apply_heartbeat(store: &dyn DispatchStore, mut agent: AgentRecord) -> FabricResult<()> {
    agent.last_heartbeat_at = Utc::now();
    store.upsert_agent(agent).await
}

/// Background loop marking agents offline once their heartbeats lapse.
///
/// Sweep errors are logged and the loop retries on the next interval;
/// `start` is a no-op while running and `stop` is safe while stopped.
pub struct HeartbeatSweeper {
    store: Arc<dyn DispatchStore>,
    interval: Duration,
    timeout: chrono::Duration,
    running: Mutex<Option<LoopHandle>>,
}

impl HeartbeatSweeper {
    /// Creates a stopped sweeper with the given poll interval and staleness
    /// timeout.
    pub fn new(store: Arc<dyn DispatchStore>, interval: Duration, timeout: chrono::Duration) -> Self {
        Self {
            store,
            interval,
            timeout,
            running: Mutex::new(None),
        }
    }

    /// Runs one sweep, returning how many agents were marked offline.
    pub async fn sweep_once(&self) -> FabricResult<usize> {
        self.store
            .mark_stale_agents_offline(Utc::now(), self.timeout)
            .await
    }

    /// Spawns the sweep loop. A no-op while already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        let (stop, mut stopped) = watch::channel(false);
        let store = self.store.clone();
        let interval = self.interval;
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match store.mark_stale_agents_offline(Utc::now(), timeout).await {
                    Ok(0) => {}
                    Ok(marked) => info!(marked, "marked stale agents offline"),
                    Err(e) => warn!(error = %e, "heartbeat sweep failed"),
                }
            }
        });
        *running = Some(LoopHandle { stop, handle });
    }

    /// Stops the loop and waits for it to exit. Safe while stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "heartbeat sweeper task aborted");
        }
    }
}
