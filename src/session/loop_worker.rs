use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::models::{ActionTable, TargetConfig};

use super::controller::{SessionController, SessionServices};
use super::surface::ActionSurface;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Opens one dedicated action surface per worker.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn open(&self, label: &str) -> Result<Arc<dyn ActionSurface>>;
}

/// Static inputs every worker is built from.
#[derive(Clone)]
pub struct WorkerConfig {
    pub table: Arc<ActionTable>,
    pub special_titles: Arc<Vec<String>>,
    pub factory: Arc<dyn SurfaceFactory>,
}

/// Whole life of one target: open its surface, enter, loop until stop. A bootstrap
/// failure ends this worker only.
pub async fn session_worker(target: TargetConfig, config: WorkerConfig, services: SessionServices) {
    let label = target.label().to_string();
    let surface = match config.factory.open(&label).await {
        Ok(surface) => surface,
        Err(err) => {
            log_error!("[{label}] could not open action surface: {err:#}");
            return;
        }
    };

    let mut session = SessionController::new(
        target,
        &config.table,
        &config.special_titles,
        surface.clone(),
        services,
    );
    if let Err(err) = session.bootstrap().await {
        log_error!("[{label}] bootstrap failed: {err:#}");
        if let Err(err) = surface.quit().await {
            log_warn!("[{label}] failed to close surface: {err:#}");
        }
        return;
    }
    session.run().await;
}

/// Handles of the running per-target workers.
pub struct SessionFleet {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl SessionFleet {
    /// Spawn one worker per target, staggering launches so the endpoints do not see a
    /// connection burst. Stops launching once stop is requested.
    pub async fn launch(targets: Vec<TargetConfig>, config: WorkerConfig, services: SessionServices) -> Self {
        let coordinator = services.coordinator.clone();
        let mut handles = Vec::with_capacity(targets.len());

        for (index, target) in targets.into_iter().enumerate() {
            if index > 0 {
                let delay = services.tuning.scaled(coordinator.stagger_delay());
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = coordinator.cancelled() => {}
                    }
                }
            }
            if coordinator.is_stopped() {
                log_warn!("stop requested, {} targets not launched", index);
                break;
            }

            let label = target.label().to_string();
            log_info!("[{label}] launching worker");
            let handle = tokio::spawn(session_worker(target, config.clone(), services.clone()));
            handles.push((label, handle));
        }
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to unwind.
    pub async fn join(self) {
        for (label, handle) in self.handles {
            if let Err(err) = handle.await {
                log_error!("[{label}] worker task failed to join: {err}");
            }
        }
        log_info!("all workers finished");
    }
}
