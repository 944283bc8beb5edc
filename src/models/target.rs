use serde::{Deserialize, Serialize};

fn enabled_by_default() -> bool {
    true
}

/// One entry of the target list. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// Action-surface endpoint the worker navigates to.
    pub url: String,
    /// Capture-source id, also the label used for frames and recordings.
    #[serde(default, alias = "rtmp")]
    pub source_name: Option<String>,
    /// Capture-source endpoint handed to the capture tool.
    #[serde(default, alias = "rtmp_url")]
    pub source_url: Option<String>,
    /// Code identifying the target in the lobby grid.
    #[serde(default, alias = "game_title_code")]
    pub title_code: Option<String>,
    #[serde(default, alias = "template_type")]
    pub detection_tag: Option<String>,
    #[serde(default, alias = "error_template_type")]
    pub error_tag: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default = "enabled_by_default")]
    pub enable_recording: bool,
    #[serde(default = "enabled_by_default", alias = "enable_template_detection")]
    pub enable_detection: bool,
}

impl TargetConfig {
    /// Identity label used in logs, file names and notifications.
    pub fn label(&self) -> &str {
        self.source_name
            .as_deref()
            .or(self.title_code.as_deref())
            .unwrap_or("NA")
    }

    pub fn title(&self) -> &str {
        self.title_code.as_deref().unwrap_or("")
    }

    /// Capture source as `(name, endpoint)` when both are configured.
    pub fn capture_source(&self) -> Option<(&str, &str)> {
        match (self.source_name.as_deref(), self.source_url.as_deref()) {
            (Some(name), Some(url)) if !name.is_empty() && !url.is_empty() => Some((name, url)),
            _ => None,
        }
    }

    /// Classify the target; special titles use an alternate control layout.
    pub fn kind(&self, special_titles: &[String]) -> TargetKind {
        let title = self.title();
        if special_titles
            .iter()
            .any(|special| !special.is_empty() && title.contains(special.as_str()))
        {
            TargetKind::Special
        } else {
            TargetKind::Standard
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Standard,
    Special,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Standard => "standard",
            TargetKind::Special => "special",
        }
    }
}

/// Keep only enabled targets, preserving file order.
pub fn enabled_targets(targets: Vec<TargetConfig>) -> Vec<TargetConfig> {
    targets.into_iter().filter(|t| t.enabled).collect()
}
