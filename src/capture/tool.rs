use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// External snapshot/record collaborator.
#[async_trait]
pub trait CaptureTool: Send + Sync {
    /// Grab one frame into `output`. Never raises; `false` on failure or timeout.
    async fn snapshot(&self, endpoint: &str, output: &Path, timeout: Duration) -> bool;

    /// Launch a detached, time-bounded recording into `output`.
    async fn record(&self, endpoint: &str, output: &Path, duration: Duration) -> Result<Box<dyn RecordingProcess>>;
}

/// Liveness view over a launched recording.
pub trait RecordingProcess: Send + Sync {
    /// `Ok(true)` while the process is still running.
    fn poll_running(&mut self) -> Result<bool>;
}

impl RecordingProcess for tokio::process::Child {
    fn poll_running(&mut self) -> Result<bool> {
        let status = self.try_wait().context("failed to poll recording process")?;
        Ok(status.is_none())
    }
}
