use std::time::Duration;

use tokio::time::Instant;

use super::surface::ActionSurface;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// An in-place refresh fixed the page.
    Refreshed,
    /// Navigating back to the endpoint fixed the page.
    Renavigated,
    StillBroken,
    Failed,
}

pub fn probe_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}

/// Title, content or address markers of the server's not-found page. Any read error
/// counts as healthy.
pub async fn is_broken_page(surface: &dyn ActionSurface, label: &str) -> bool {
    match surface.title().await {
        Ok(title) => {
            let title = title.to_lowercase();
            if title.contains("404") || title.contains("not found") {
                return true;
            }
        }
        Err(err) => {
            log_debug!("[{label}] broken-page probe: title unavailable: {err:#}");
            return false;
        }
    }
    match surface.page_source().await {
        Ok(source) => {
            let source = source.to_lowercase();
            if source.contains("404 not found") || source.contains("nginx/1.20.1") {
                return true;
            }
        }
        Err(_) => return false,
    }
    match surface.current_url().await {
        Ok(url) => url.to_lowercase().contains("404"),
        Err(_) => false,
    }
}

/// Refresh in place, then fall back to re-navigating to `url`.
pub async fn repair_broken_page(surface: &dyn ActionSurface, url: &str, settle: Duration, label: &str) -> ProbeOutcome {
    if !is_broken_page(surface, label).await {
        return ProbeOutcome::Healthy;
    }
    log_warn!("[{label}] broken page detected, refreshing");

    if let Err(err) = surface.refresh().await {
        log_error!("[{label}] refresh failed: {err:#}");
        return ProbeOutcome::Failed;
    }
    tokio::time::sleep(settle).await;
    if !is_broken_page(surface, label).await {
        log_info!("[{label}] refresh succeeded");
        return ProbeOutcome::Refreshed;
    }

    log_error!("[{label}] still broken after refresh, reloading endpoint");
    if let Err(err) = surface.navigate(url).await {
        log_error!("[{label}] reload failed: {err:#}");
        return ProbeOutcome::Failed;
    }
    tokio::time::sleep(settle).await;
    if is_broken_page(surface, label).await {
        log_error!("[{label}] still broken after reload");
        ProbeOutcome::StillBroken
    } else {
        log_info!("[{label}] reload succeeded");
        ProbeOutcome::Renavigated
    }
}
