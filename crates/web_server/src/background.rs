use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use detection_engine::{DetectionProcessor, OutboxDispatcher};

const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Background work that runs next to the HTTP server: the notification
/// outbox dispatcher and the periodic guest expiry sweep.
pub struct BackgroundTasks {
    dispatcher_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Spawns the dispatcher and the guest sweeper
    pub fn start(
        processor: Arc<DetectionProcessor>,
        dispatcher: OutboxDispatcher,
        sweep_interval: Duration,
    ) -> Self {
        info!("Starting background tasks");

        let dispatcher_handle = tokio::spawn(dispatcher.run());

        let sweeper_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = processor.guests().expire_overdue(Utc::now()).await {
                    error!("Guest expiry sweep failed: {}", e);
                }
            }
        });

        info!(
            "Background tasks started (guest sweep every {:?})",
            sweep_interval
        );
        Self {
            dispatcher_handle: Some(dispatcher_handle),
            sweeper_handle: Some(sweeper_handle),
        }
    }

    /// Stops the sweeper and waits for queued notifications to go out.
    ///
    /// The dispatcher only finishes once every outbox producer is dropped, so
    /// call this after the HTTP server has shut down.
    pub async fn stop(&mut self) {
        info!("Stopping background tasks");

        if let Some(handle) = self.sweeper_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(handle) = self.dispatcher_handle.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Notification dispatcher ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Notification dispatcher still busy after {:?}, aborting",
                        DISPATCHER_DRAIN_TIMEOUT
                    );
                    abort.abort();
                }
            }
        }

        info!("Background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
        }
    }
}
