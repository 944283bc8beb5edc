use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

use super::tool::RecordingProcess;

/// Handle on the single recording a target may have running.
#[derive(Default)]
pub struct Recording {
    name: Option<String>,
    process: Option<Box<dyn RecordingProcess>>,
    ends_at: Option<Instant>,
    started_at: Option<Instant>,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("name", &self.name)
            .field("running", &self.process.is_some())
            .field("ends_at", &self.ends_at)
            .finish()
    }
}

impl Recording {
    pub fn started(name: impl Into<String>, process: Box<dyn RecordingProcess>, duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            name: Some(name.into()),
            process: Some(process),
            ends_at: Some(now + duration),
            started_at: Some(now),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ends_at(&self) -> Option<Instant> {
        self.ends_at
    }

    /// Poll process liveness. The first poll that sees the process gone clears every
    /// field, so later calls answer `false` without touching the process again.
    pub fn is_active(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        match process.poll_running() {
            Ok(true) => true,
            Ok(false) => {
                info!("[Record] recording finished: {}", self.name.as_deref().unwrap_or("?"));
                self.clear();
                false
            }
            Err(err) => {
                debug!("[Record] recording state unreadable, dropping handle: {err:#}");
                self.clear();
                false
            }
        }
    }

    /// True while active and started less than `grace` ago.
    pub fn within_grace(&mut self, grace: Duration) -> bool {
        let started = self.started_at;
        self.is_active() && started.is_some_and(|at| at.elapsed() < grace)
    }

    fn clear(&mut self) {
        self.name = None;
        self.process = None;
        self.ends_at = None;
        self.started_at = None;
    }
}
