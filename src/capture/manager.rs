use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

use super::duplicate::{frame_digest, DuplicateFrameGuard, DuplicateVerdict};
use super::recording::Recording;
use super::tool::CaptureTool;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DUPLICATE_RUN_THRESHOLD: u32 = 3;

/// Wraps the external capture tool: frame paths, snapshots, recordings and the
/// duplicate-frame guard shared by every target.
pub struct CaptureManager {
    tool: Arc<dyn CaptureTool>,
    capture_dir: PathBuf,
    duplicates: Mutex<DuplicateFrameGuard>,
}

impl CaptureManager {
    pub fn new(tool: Arc<dyn CaptureTool>, capture_dir: impl Into<PathBuf>) -> Result<Self> {
        let capture_dir = capture_dir.into();
        std::fs::create_dir_all(&capture_dir)
            .with_context(|| format!("Failed to create capture dir {}", capture_dir.display()))?;
        Ok(Self {
            tool,
            capture_dir,
            duplicates: Mutex::new(DuplicateFrameGuard::new(DUPLICATE_RUN_THRESHOLD)),
        })
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    /// `<label>_<timestamp><suffix>.jpg`
    pub fn frame_path(&self, label: &str, timestamp: &str, suffix: &str) -> PathBuf {
        self.capture_dir.join(format!("{label}_{timestamp}{suffix}.jpg"))
    }

    pub fn recording_path(&self, label: &str, timestamp: &str) -> PathBuf {
        self.capture_dir.join(format!("{label}_{timestamp}.mp4"))
    }

    pub async fn snapshot(&self, endpoint: &str, output: &Path, timeout: Duration) -> bool {
        self.tool.snapshot(endpoint, output, timeout).await
    }

    /// Capture and immediately drop a frame. Keeps the source connection warm while a
    /// recording owns the target.
    pub async fn capture_and_discard(&self, label: &str, endpoint: &str, output: &Path, timeout: Duration) {
        if self.tool.snapshot(endpoint, output, timeout).await {
            discard(output).await;
        } else {
            log_debug!("[{label}] warm-up snapshot failed while recording");
        }
    }

    /// Feed a captured frame through the duplicate guard.
    pub async fn check_duplicate(&self, label: &str, frame: &Path) -> Option<DuplicateVerdict> {
        let digest = match frame_digest(frame).await {
            Ok(digest) => digest,
            Err(err) => {
                log_warn!("[{label}] frame checksum failed: {err:#}");
                return None;
            }
        };
        let mut guard = match self.duplicates.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let verdict = guard.observe(label, &digest);
        match verdict {
            DuplicateVerdict::Repeat(n) | DuplicateVerdict::RunReached(n) => {
                log_warn!("[{label}] repeated frame {n}/{DUPLICATE_RUN_THRESHOLD}");
            }
            DuplicateVerdict::Fresh => {}
        }
        Some(verdict)
    }

    /// Launch a bounded recording. Launch failure is logged and yields `None`.
    pub async fn start_recording(
        &self,
        label: &str,
        endpoint: &str,
        duration: Duration,
        timestamp: &str,
    ) -> Option<Recording> {
        let output = self.recording_path(label, timestamp);
        match self.tool.record(endpoint, &output, duration).await {
            Ok(process) => {
                log_warn!(
                    "[Record] recording {}s -> {}",
                    duration.as_secs(),
                    output.file_name().and_then(|f| f.to_str()).unwrap_or("?")
                );
                Some(Recording::started(label, process, duration))
            }
            Err(err) => {
                log_error!("[Record] failed to start recording for {label}: {err:#}");
                None
            }
        }
    }
}

/// Best-effort removal of a frame file.
pub async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log_info!("failed to remove {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tool::RecordingProcess;
    use async_trait::async_trait;

    struct FileTool {
        content: &'static [u8],
        fail_record: bool,
    }

    struct Done;

    impl RecordingProcess for Done {
        fn poll_running(&mut self) -> Result<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl CaptureTool for FileTool {
        async fn snapshot(&self, _endpoint: &str, output: &Path, _timeout: Duration) -> bool {
            std::fs::write(output, self.content).is_ok()
        }

        async fn record(&self, _endpoint: &str, _output: &Path, _duration: Duration) -> Result<Box<dyn RecordingProcess>> {
            if self.fail_record {
                anyhow::bail!("no encoder");
            }
            Ok(Box::new(Done))
        }
    }

    fn manager(dir: &Path, fail_record: bool) -> CaptureManager {
        let tool = Arc::new(FileTool {
            content: b"same",
            fail_record,
        });
        CaptureManager::new(tool, dir.join("captures")).unwrap()
    }

    #[test]
    fn names_follow_label_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), false);
        assert!(m.capture_dir().is_dir());
        assert_eq!(
            m.frame_path("cam1", "20250301_142233", "").file_name().unwrap(),
            "cam1_20250301_142233.jpg"
        );
        assert_eq!(
            m.frame_path("cam1", "20250301_142233", "_exception").file_name().unwrap(),
            "cam1_20250301_142233_exception.jpg"
        );
        assert_eq!(
            m.recording_path("cam1", "20250301_142233").file_name().unwrap(),
            "cam1_20250301_142233.mp4"
        );
    }

    #[tokio::test]
    async fn discarded_frames_do_not_linger() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), false);
        let out = m.frame_path("cam1", "t", "");
        m.capture_and_discard("cam1", "rtmp://x", &out, Duration::from_secs(1)).await;
        assert!(!out.exists());
        discard(&out).await;
    }

    #[tokio::test]
    async fn duplicate_run_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), false);
        let out = m.frame_path("cam1", "t", "");
        let mut verdicts = Vec::new();
        for _ in 0..4 {
            assert!(m.snapshot("rtmp://x", &out, Duration::from_secs(1)).await);
            verdicts.push(m.check_duplicate("cam1", &out).await.unwrap());
        }
        assert_eq!(verdicts[0], DuplicateVerdict::Fresh);
        assert_eq!(verdicts[3], DuplicateVerdict::RunReached(3));
        assert!(m.check_duplicate("cam1", &dir.path().join("gone.jpg")).await.is_none());
    }

    #[tokio::test]
    async fn failed_launch_yields_no_handle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(manager(dir.path(), true)
            .start_recording("cam1", "rtmp://x", Duration::from_secs(5), "t")
            .await
            .is_none());
        let mut rec = manager(dir.path(), false)
            .start_recording("cam1", "rtmp://x", Duration::from_secs(5), "t")
            .await
            .unwrap();
        assert!(!rec.is_active());
    }
}
