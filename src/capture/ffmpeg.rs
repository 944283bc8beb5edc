use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use super::tool::{CaptureTool, RecordingProcess};

pub struct FfmpegTool {
    binary: PathBuf,
}

impl FfmpegTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

fn snapshot_args(endpoint: &str, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        endpoint.into(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        output.display().to_string(),
    ]
}

fn record_args(endpoint: &str, output: &Path, duration: Duration) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y",
        // input tuned for a live feed
        "-fflags",
        "nobuffer",
        "-rtmp_live",
        "live",
        "-i",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(endpoint.into());
    args.push("-t".into());
    args.push(duration.as_secs().max(1).to_string());
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            // fixed one-second GOP at 25 fps
            "-g",
            "25",
            "-keyint_min",
            "25",
            "-sc_threshold",
            "0",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ]
        .into_iter()
        .map(String::from),
    );
    args.push(output.display().to_string());
    args
}

#[async_trait]
impl CaptureTool for FfmpegTool {
    async fn snapshot(&self, endpoint: &str, output: &Path, timeout: Duration) -> bool {
        // kill_on_drop: a timed-out wait drops the child and the process is killed
        let child = match Command::new(&self.binary)
            .args(snapshot_args(endpoint, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                warn!("[Capture] ffmpeg spawn failed ({}): {err}", self.binary.display());
                return false;
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) if out.status.success() => output.exists(),
            Ok(Ok(out)) => {
                debug!("[Capture] ffmpeg snapshot exited with {}", out.status);
                false
            }
            Ok(Err(err)) => {
                warn!("[Capture] ffmpeg snapshot failed: {err}");
                false
            }
            Err(_) => {
                warn!("[Capture] ffmpeg snapshot timeout ({:.1}s), process killed", timeout.as_secs_f32());
                false
            }
        }
    }

    async fn record(&self, endpoint: &str, output: &Path, duration: Duration) -> Result<Box<dyn RecordingProcess>> {
        let child = Command::new(&self.binary)
            .args(record_args(endpoint, output, duration))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch {}", self.binary.display()))?;
        Ok(Box::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_grabs_one_high_quality_frame() {
        let args = snapshot_args("rtmp://host/live/cam1", Path::new("/tmp/cam1.jpg"));
        assert_eq!(
            args,
            vec!["-y", "-i", "rtmp://host/live/cam1", "-frames:v", "1", "-q:v", "2", "/tmp/cam1.jpg"]
        );
    }

    #[test]
    fn recording_is_bounded_and_low_latency() {
        let args = record_args("rtmp://s/x", Path::new("out.mp4"), Duration::from_secs(120));
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-t") + 1], "120");
        assert!(pos("-fflags") < pos("-i"));
        assert!(pos("-i") < pos("-c:v"));
        assert_eq!(args[pos("-tune") + 1], "zerolatency");
        assert_eq!(args[pos("-f") + 1], "mp4");
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_failed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FfmpegTool::new(dir.path().join("no-such-ffmpeg"));
        let out = dir.path().join("f.jpg");
        assert!(!tool.snapshot("rtmp://x", &out, Duration::from_secs(1)).await);
        assert!(tool.record("rtmp://x", &out, Duration::from_secs(1)).await.is_err());
    }
}
