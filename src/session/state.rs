use serde::Serialize;
use tokio::time::Instant;

use crate::capture::Recording;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Init,
    EnsuringInGame,
    CheckingHealth,
    LowResourceRecovery,
    Acting,
    ObservingChange,
    PeriodicDetection,
    Waiting,
    Paused,
    Stopped,
}

/// Result of comparing two resource reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Changed,
    Unchanged,
    /// One of the reads was unavailable.
    Unknown,
}

fn compare(a: Option<u64>, b: Option<u64>) -> Option<Observation> {
    match (a, b) {
        (Some(a), Some(b)) if a == b => Some(Observation::Unchanged),
        (Some(_), Some(_)) => Some(Observation::Changed),
        _ => None,
    }
}

/// Compare the post-action read with the pre-action one, or with the last known value
/// when the pre-action read is missing. The fastest tier always uses the last known
/// value: its settle delay is too short to straddle one action.
pub fn compare_balances(before: Option<u64>, after: Option<u64>, last: Option<u64>, fastest_tier: bool) -> Observation {
    let observed = if fastest_tier {
        compare(last, after)
    } else {
        compare(before, after).or_else(|| compare(last, after))
    };
    observed.unwrap_or(Observation::Unknown)
}

/// State owned by one session worker.
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub last_balance: Option<u64>,
    pub no_change_count: u32,
    /// Actions performed in the fastest tier, drives interval detection.
    pub action_count: u64,
    pub last_health_probe: Option<Instant>,
    /// Private pause raised while a recording is being started.
    pub auto_pause: bool,
    pub recording: Recording,
}

impl SessionState {
    /// Feed one observation into the no-change counter. Returns true when the counter
    /// reached `interval`; the counter is reset in that case.
    pub fn observe(&mut self, observation: Observation, interval: u32) -> bool {
        match observation {
            Observation::Changed => {
                self.no_change_count = 0;
                false
            }
            Observation::Unchanged => {
                self.no_change_count += 1;
                if self.no_change_count >= interval.max(1) {
                    self.no_change_count = 0;
                    true
                } else {
                    false
                }
            }
            Observation::Unknown => false,
        }
    }
}
