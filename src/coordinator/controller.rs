use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::cadence::{describe, is_fastest_tier, preset_for_key, CadencePreset};
use super::state::CoordinatorState;

/// Shared cadence, global pause and stop. Sessions only read; the control surface
/// mutates through these methods.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
    cancel_token: CancellationToken,
}

impl Coordinator {
    pub fn new(initial_cadence_secs: f64) -> Self {
        let cadence = if initial_cadence_secs.is_finite() && initial_cadence_secs > 0.0 {
            initial_cadence_secs
        } else {
            1.0
        };
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::new(cadence))),
            cancel_token: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> CoordinatorState {
        *self.lock()
    }

    pub fn cadence(&self) -> f64 {
        self.lock().cadence_secs
    }

    pub fn set_cadence(&self, secs: f64) {
        if !secs.is_finite() || secs <= 0.0 {
            warn!("[Control] ignoring invalid cadence {secs}");
            return;
        }
        let old = {
            let mut guard = self.lock();
            std::mem::replace(&mut guard.cadence_secs, secs)
        };
        info!("[Control] cadence {old:.2}s -> {}", describe(secs));
        if is_fastest_tier(secs) {
            warn!("[Control] cadence {secs:.2}s puts heavy load on browsers, streams and the remote service");
        }
    }

    pub fn select_preset(&self, key: char) -> Option<CadencePreset> {
        let preset = preset_for_key(key)?;
        self.set_cadence(preset.secs);
        Some(preset)
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        info!("[Control] {}", if paused { "paused" } else { "resumed" });
    }

    /// Returns the new pause state.
    pub fn toggle_pause(&self) -> bool {
        let paused = {
            let mut guard = self.lock();
            guard.paused = !guard.paused;
            guard.paused
        };
        info!("[Control] {}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn request_stop(&self) {
        self.lock().stopped = true;
        self.cancel_token.cancel();
        info!("[Control] stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Resolves once stop has been requested.
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Per-target launch stagger: 1-2 s.
    pub fn stagger_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 + rand::thread_rng().gen::<f64>())
    }
}
