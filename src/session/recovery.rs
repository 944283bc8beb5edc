//! Entering a target from the lobby, tapping positions, and the low-resource
//! exit/confirm/re-enter sequence.

use tokio::time::sleep;

use super::markers;
use super::surface::{ActionSurface, ElementRef};
use super::tuning::{RecoveryTimings, SurfaceTimings};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Click without raising; failures are logged.
pub async fn safe_click(surface: &dyn ActionSurface, element: &ElementRef, label: &str) -> bool {
    match surface.click(element).await {
        Ok(()) => true,
        Err(err) => {
            log_warn!("[{label}] click failed: {err:#}");
            false
        }
    }
}

async fn any_displayed(surface: &dyn ActionSurface, elements: &[ElementRef]) -> bool {
    for el in elements {
        if surface.is_displayed(el).await.unwrap_or(false) {
            return true;
        }
    }
    false
}

/// Inside a target when any in-target indicator is visible; in the lobby when a lobby
/// card is visible. Undecidable pages count as inside.
pub async fn is_in_target(surface: &dyn ActionSurface, label: &str) -> bool {
    for marker in markers::in_target_indicators() {
        if let Ok(found) = surface.find_all(&marker).await {
            if any_displayed(surface, &found).await {
                return true;
            }
        }
    }
    if let Ok(cards) = surface.find_all(&markers::lobby_card()).await {
        if any_displayed(surface, &cards).await {
            log_info!("[{label}] lobby detected");
            return false;
        }
    }
    log_debug!("[{label}] surface state undecidable, assuming inside target");
    true
}

/// Tap each position label in order, then the collect control when asked.
pub async fn tap_positions(surface: &dyn ActionSurface, positions: &[String], collect: bool, t: &SurfaceTimings, label: &str) {
    for pos in positions {
        match surface.wait_until_present(&markers::position(pos), t.position_wait).await {
            Ok(found) => {
                if let Some(first) = found.first() {
                    if safe_click(surface, first, label).await {
                        log_info!("[{label}] tapped position {pos}");
                    }
                    sleep(t.after_position).await;
                }
            }
            Err(_) => log_warn!("[{label}] position {pos} not found"),
        }
    }

    if collect {
        match surface.wait_until_present(&markers::collect_button(), t.collect_wait).await {
            Ok(found) => {
                if let Some(btn) = found.first() {
                    if safe_click(surface, btn, label).await {
                        log_info!("[{label}] collected");
                    }
                }
            }
            Err(_) => log_debug!("[{label}] collect control not found"),
        }
    }
}

/// Find the lobby card whose title contains `title_code`, open it, press Join when it
/// shows up, then run the entry taps. True once a card was opened.
pub async fn enter_target(
    surface: &dyn ActionSurface,
    title_code: &str,
    entry_positions: Option<&[String]>,
    t: &SurfaceTimings,
    label: &str,
) -> bool {
    let cards = match surface.wait_until_present(&markers::lobby_card(), t.lobby_wait).await {
        Ok(cards) => cards,
        Err(err) => {
            log_warn!("[{label}] lobby not available: {err:#}");
            return false;
        }
    };

    for card in &cards {
        let title = surface.attribute(card, "title").await.ok().flatten().unwrap_or_default();
        if title.is_empty() || !title.contains(title_code) {
            continue;
        }
        if !safe_click(surface, card, label).await {
            continue;
        }
        log_info!("[{label}] opened card {title}");
        sleep(t.after_card).await;

        // Join is optional: some targets open directly from the card
        match surface.wait_until_present(&markers::join_button(), t.join_wait).await {
            Ok(buttons) => {
                for btn in &buttons {
                    if surface.is_displayed(btn).await.unwrap_or(false) && safe_click(surface, btn, label).await {
                        log_info!("[{label}] joined");
                        sleep(t.after_join).await;
                        break;
                    }
                }
            }
            Err(_) => log_info!("[{label}] no Join prompt, continuing"),
        }

        if let Some(positions) = entry_positions.filter(|p| !p.is_empty()) {
            sleep(t.entry_settle).await;
            tap_positions(surface, positions, false, t, label).await;
            sleep(t.entry_settle).await;
        }
        return true;
    }

    log_warn!("[{label}] no lobby card for {title_code}");
    false
}

/// First visible cash-out control among the candidates.
pub async fn find_cashout(surface: &dyn ActionSurface, label: &str) -> Option<ElementRef> {
    for marker in markers::cashout_candidates() {
        let Ok(found) = surface.find_all(&marker).await else {
            continue;
        };
        for el in found {
            if surface.is_displayed(&el).await.unwrap_or(false) {
                log_debug!("[{label}] cash-out control via {marker}");
                return Some(el);
            }
        }
    }
    log_warn!("[{label}] no cash-out control found");
    None
}

/// Leave the target, dismiss prompts, then re-enter it. Returns false when the exit
/// part failed; re-entry problems are only logged.
pub async fn exit_and_reenter(
    surface: &dyn ActionSurface,
    balance: u64,
    title_code: Option<&str>,
    entry_positions: Option<&[String]>,
    r: &RecoveryTimings,
    t: &SurfaceTimings,
    label: &str,
) -> bool {
    log_warn!("[{label}] resource low ({balance}), leaving target");

    let Some(cashout) = find_cashout(surface, label).await else {
        log_error!("[{label}] cannot leave target: no cash-out control");
        return false;
    };
    safe_click(surface, &cashout, label).await;
    sleep(r.after_cashout).await;

    match surface.wait_until_present(&markers::exit_button(), r.exit_wait).await {
        Ok(found) => {
            if let Some(btn) = found.first() {
                safe_click(surface, btn, label).await;
                log_info!("[{label}] exit pressed");
                sleep(r.after_exit).await;
            }
        }
        Err(_) => log_info!("[{label}] no exit control, trying confirm"),
    }

    let confirm = match surface.wait_until_present(&markers::confirm_button(), r.confirm_wait).await {
        Ok(found) => found,
        Err(err) => {
            log_error!("[{label}] confirm prompt missing: {err:#}");
            return false;
        }
    };
    if let Some(btn) = confirm.first() {
        safe_click(surface, btn, label).await;
    }
    sleep(r.after_confirm).await;

    if is_in_target(surface, label).await {
        log_warn!("[{label}] still inside after exit");
        sleep(r.recheck).await;
    } else {
        log_info!("[{label}] back in lobby");
    }

    if let Some(code) = title_code.filter(|c| !c.is_empty()) {
        if enter_target(surface, code, entry_positions, t, label).await {
            sleep(r.after_reenter).await;
            if is_in_target(surface, label).await {
                log_info!("[{label}] re-entered target");
            } else {
                log_warn!("[{label}] still in lobby after re-entry");
                sleep(r.recheck).await;
            }
        } else {
            log_warn!("[{label}] re-entry failed");
        }
    }
    true
}
