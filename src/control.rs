//! Operator commands read from stdin: `p` pause/resume, `q` stop, `0`-`9` cadence presets.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::coordinator::cadence::describe;
use crate::coordinator::{Coordinator, PRESETS};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Paused,
    Resumed,
    Stopped,
    Cadence(f64),
    Ignored,
}

/// Apply one command line to the coordinator.
pub fn apply_command(coordinator: &Coordinator, line: &str) -> ControlEvent {
    let mut chars = line.trim().chars();
    let (Some(key), None) = (chars.next(), chars.next()) else {
        return ControlEvent::Ignored;
    };
    match key.to_ascii_lowercase() {
        'p' => {
            if coordinator.toggle_pause() {
                ControlEvent::Paused
            } else {
                ControlEvent::Resumed
            }
        }
        'q' => {
            coordinator.request_stop();
            ControlEvent::Stopped
        }
        digit => match coordinator.select_preset(digit) {
            Some(preset) => ControlEvent::Cadence(preset.secs),
            None => ControlEvent::Ignored,
        },
    }
}

pub fn usage() -> String {
    let presets: Vec<String> = PRESETS
        .iter()
        .map(|p| format!("{}={}", p.key, describe(p.secs)))
        .collect();
    format!("commands: p=pause/resume q=quit | {}", presets.join(" "))
}

/// Read commands until stdin closes or stop is requested.
pub async fn run_control(coordinator: Coordinator) {
    log_info!("{}", usage());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if apply_command(&coordinator, &line) == ControlEvent::Ignored && !line.trim().is_empty() {
                        log_warn!("unknown command '{}'", line.trim());
                    }
                }
                Ok(None) => {
                    log_info!("stdin closed, control surface disabled");
                    break;
                }
                Err(err) => {
                    log_warn!("failed to read command: {err}");
                    break;
                }
            },
            _ = coordinator.cancelled() => break,
        }
    }
}
