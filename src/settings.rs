use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{enabled_targets, ActionTable, TargetConfig};

pub const SETTINGS_FILE: &str = "spinwatch.json";
pub const WEBHOOK_ENV: &str = "LARK_WEBHOOK_URL";

const MOBILE_USER_AGENT: &str = "--user-agent=Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/85.0.4183.127 Mobile Safari/537.36";

fn default_browser_args() -> Vec<String> {
    vec![
        MOBILE_USER_AGENT.to_string(),
        "--window-size=432,859".to_string(),
        "--incognito".to_string(),
    ]
}

fn default_special_titles() -> Vec<String> {
    vec!["BULLBLITZ".to_string(), "ALLABOARD".to_string()]
}

/// Process-wide settings. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Root for relative paths; defaults to the settings file's directory.
    pub base_dir: Option<PathBuf>,
    pub template_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub capture_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub targets_path: PathBuf,
    pub actions_path: PathBuf,
    pub webdriver_url: String,
    pub browser_name: String,
    pub browser_args: Vec<String>,
    pub initial_cadence_secs: f64,
    pub special_titles: Vec<String>,
    pub webhook_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: None,
            template_dir: "templates".into(),
            manifest_path: "templates_manifest.json".into(),
            capture_dir: "stream_captures".into(),
            ffmpeg_path: "ffmpeg".into(),
            targets_path: "game_config.json".into(),
            actions_path: "actions.json".into(),
            webdriver_url: "http://localhost:9515".into(),
            browser_name: "MicrosoftEdge".into(),
            browser_args: default_browser_args(),
            initial_cadence_secs: 1.0,
            special_titles: default_special_titles(),
            webhook_url: None,
        }
    }
}

impl Settings {
    /// Read `path`; a missing file yields defaults rooted at its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str::<Settings>(&contents)
                .with_context(|| format!("Failed to parse settings {}", path.display()))?
        } else {
            Settings::default()
        };

        if settings.base_dir.is_none() {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            settings.base_dir = Some(dir.to_path_buf());
        }
        Ok(settings)
    }

    /// A non-blank environment value replaces the configured webhook.
    pub fn with_webhook_override(mut self, env_value: Option<String>) -> Self {
        if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
            self.webhook_url = Some(value);
        }
        self
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.base_dir.as_deref() {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Enabled targets in file order.
    pub fn load_targets(&self) -> Result<Vec<TargetConfig>> {
        let path = self.resolve(&self.targets_path);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read target list {}", path.display()))?;
        let targets: Vec<TargetConfig> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse target list {}", path.display()))?;
        Ok(enabled_targets(targets))
    }

    /// Missing action file means no entry or auxiliary taps.
    pub fn load_actions(&self) -> Result<ActionTable> {
        let path = self.resolve(&self.actions_path);
        if !path.exists() {
            return Ok(ActionTable::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read action table {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse action table {}", path.display()))
    }
}
