use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// SHA-256 of a frame file, hex encoded.
pub async fn frame_digest(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read frame {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Fresh,
    /// Same content as the previous frame; count of back-to-back repeats.
    Repeat(u32),
    /// The repeat run reached the threshold; the counter has been reset.
    RunReached(u32),
}

#[derive(Debug, Default)]
struct Run {
    digest: String,
    repeats: u32,
}

/// Back-to-back identical frame detector, keyed by target label.
#[derive(Debug)]
pub struct DuplicateFrameGuard {
    threshold: u32,
    runs: HashMap<String, Run>,
}

impl DuplicateFrameGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            runs: HashMap::new(),
        }
    }

    pub fn observe(&mut self, label: &str, digest: &str) -> DuplicateVerdict {
        let run = self.runs.entry(label.to_string()).or_default();
        if run.digest != digest {
            run.digest = digest.to_string();
            run.repeats = 0;
            return DuplicateVerdict::Fresh;
        }

        run.repeats += 1;
        if run.repeats >= self.threshold {
            let count = run.repeats;
            run.repeats = 0;
            DuplicateVerdict::RunReached(count)
        } else {
            DuplicateVerdict::Repeat(run.repeats)
        }
    }
}
