use super::registry::PoolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Background task calling [`PoolRegistry::keepalive`] on a fixed period.
///
/// The registry itself owns no timer; applications that do not drive the
/// sweep from their own scheduler can spawn one of these instead.
pub struct KeepaliveTask {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl KeepaliveTask {
    /// Start sweeping every `period`. The first sweep runs one period after
    /// the call.
    pub fn spawn(registry: Arc<PoolRegistry>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately once
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if registry.is_shut_down() {
                            debug!("registry shut down, keepalive task exiting");
                            break;
                        }
                        registry.keepalive().await;
                    }
                    _ = &mut stop_rx => {
                        info!("keepalive task stopped");
                        break;
                    }
                }
            }
        });

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for an in-flight sweep to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.handle.await;
    }
}
