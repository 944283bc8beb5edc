use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::time::Instant;

const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Css,
    XPath,
    Id,
}

/// Locator for an on-page control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
    pub kind: MarkerKind,
    pub value: String,
}

impl Marker {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::XPath,
            value: value.into(),
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Id,
            value: value.into(),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MarkerKind::Css => "css",
            MarkerKind::XPath => "xpath",
            MarkerKind::Id => "id",
        };
        write!(f, "{kind}:{}", self.value)
    }
}

/// Opaque handle on a located element, valid for the surface that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// Remote interactive surface driven by one session. Every call may fail or time out.
#[async_trait]
pub trait ActionSurface: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn find_all(&self, marker: &Marker) -> Result<Vec<ElementRef>>;
    /// Scroll the element into view and click it.
    async fn click(&self, element: &ElementRef) -> Result<()>;
    async fn read_text(&self, element: &ElementRef) -> Result<String>;
    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>>;
    async fn is_displayed(&self, element: &ElementRef) -> Result<bool>;
    async fn title(&self) -> Result<String>;
    async fn page_source(&self) -> Result<String>;
    async fn current_url(&self) -> Result<String>;
    async fn refresh(&self) -> Result<()>;
    async fn quit(&self) -> Result<()>;

    /// Poll until at least one element matches, or fail after `timeout`.
    async fn wait_until_present(&self, marker: &Marker, timeout: Duration) -> Result<Vec<ElementRef>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(found) = self.find_all(marker).await {
                if !found.is_empty() {
                    return Ok(found);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("timed out after {:.1}s waiting for {marker}", timeout.as_secs_f32());
            }
            tokio::time::sleep(WAIT_POLL.min(deadline - now)).await;
        }
    }
}
