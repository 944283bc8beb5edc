use std::time::Duration;

/// Waits used by one exit/confirm/re-enter pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecoveryTimings {
    pub after_cashout: Duration,
    pub exit_wait: Duration,
    pub after_exit: Duration,
    pub confirm_wait: Duration,
    pub after_confirm: Duration,
    /// Extra wait when the surface still looks wrong after a step.
    pub recheck: Duration,
    pub after_reenter: Duration,
    /// Pause before the next iteration once recovery is done.
    pub cooldown: Duration,
}

impl RecoveryTimings {
    pub fn normal() -> Self {
        Self {
            after_cashout: Duration::from_secs(1),
            exit_wait: Duration::from_secs(2),
            after_exit: Duration::from_secs(1),
            confirm_wait: Duration::from_secs(2),
            after_confirm: Duration::from_secs(3),
            recheck: Duration::from_secs(2),
            after_reenter: Duration::from_secs(3),
            cooldown: Duration::from_secs(2),
        }
    }

    pub fn fast() -> Self {
        Self {
            after_cashout: Duration::from_millis(500),
            exit_wait: Duration::from_secs(1),
            after_exit: Duration::from_millis(500),
            confirm_wait: Duration::from_secs(1),
            after_confirm: Duration::from_millis(1500),
            recheck: Duration::from_secs(1),
            after_reenter: Duration::from_secs(2),
            cooldown: Duration::from_secs(1),
        }
    }
}

/// Waits used while entering a target and tapping positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceTimings {
    pub lobby_wait: Duration,
    pub after_card: Duration,
    pub join_wait: Duration,
    pub after_join: Duration,
    pub entry_settle: Duration,
    pub position_wait: Duration,
    pub after_position: Duration,
    pub collect_wait: Duration,
    pub action_wait: Duration,
    pub after_entry: Duration,
    pub entry_retry: Duration,
    pub action_retry: Duration,
}

impl Default for SurfaceTimings {
    fn default() -> Self {
        Self {
            lobby_wait: Duration::from_secs(10),
            after_card: Duration::from_millis(1200),
            join_wait: Duration::from_secs(3),
            after_join: Duration::from_secs(3),
            entry_settle: Duration::from_secs(1),
            position_wait: Duration::from_millis(2500),
            after_position: Duration::from_millis(400),
            collect_wait: Duration::from_secs(3),
            action_wait: Duration::from_secs(8),
            after_entry: Duration::from_secs(3),
            entry_retry: Duration::from_secs(2),
            action_retry: Duration::from_secs(1),
        }
    }
}

/// Every constant the session state machine runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTuning {
    pub low_resource_floor: u64,
    pub trigger_interval: u32,
    pub health_interval: Duration,
    pub health_settle: Duration,
    pub recording_grace: Duration,
    pub grace_poll: Duration,
    pub recording_duration: Duration,
    pub confirm_window: Duration,
    pub confirm_poll: Duration,
    pub park_interval: Duration,
    pub error_backoff: Duration,
    pub detection_threshold: f32,
    pub snapshot_timeout: Duration,
    pub fast_snapshot_timeout: Duration,
    /// In the fastest tier detection runs on every n-th action.
    pub fast_detection_every: u32,
    pub fast_max_templates: usize,
    /// Multiplier on cadence-derived delays (settle, inter-iteration sleep) and the
    /// launch stagger.
    pub time_scale: f64,
    pub surface: SurfaceTimings,
    pub recovery: RecoveryTimings,
    pub fast_recovery: RecoveryTimings,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            low_resource_floor: 20_000,
            trigger_interval: 10,
            health_interval: Duration::from_secs(30),
            health_settle: Duration::from_secs(3),
            recording_grace: Duration::from_secs(10),
            grace_poll: Duration::from_secs(1),
            recording_duration: Duration::from_secs(120),
            confirm_window: Duration::from_secs(3),
            confirm_poll: Duration::from_millis(100),
            park_interval: Duration::from_millis(300),
            error_backoff: Duration::from_secs(1),
            detection_threshold: 0.80,
            snapshot_timeout: Duration::from_secs(5),
            fast_snapshot_timeout: Duration::from_secs(2),
            fast_detection_every: 5,
            fast_max_templates: 2,
            time_scale: 1.0,
            surface: SurfaceTimings::default(),
            recovery: RecoveryTimings::normal(),
            fast_recovery: RecoveryTimings::fast(),
        }
    }
}

impl SessionTuning {
    pub fn scaled(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.time_scale.max(0.0))
    }

    #[cfg(test)]
    pub fn instant() -> Self {
        let zero = Duration::ZERO;
        let recovery = RecoveryTimings {
            after_cashout: zero,
            exit_wait: zero,
            after_exit: zero,
            confirm_wait: zero,
            after_confirm: zero,
            recheck: zero,
            after_reenter: zero,
            cooldown: zero,
        };
        Self {
            health_settle: zero,
            grace_poll: zero,
            confirm_window: Duration::from_millis(200),
            confirm_poll: Duration::from_millis(5),
            park_interval: Duration::from_millis(1),
            error_backoff: zero,
            snapshot_timeout: Duration::from_secs(1),
            fast_snapshot_timeout: Duration::from_secs(1),
            time_scale: 0.0,
            surface: SurfaceTimings {
                lobby_wait: zero,
                after_card: zero,
                join_wait: zero,
                after_join: zero,
                entry_settle: zero,
                position_wait: zero,
                after_position: zero,
                collect_wait: zero,
                action_wait: zero,
                after_entry: zero,
                entry_retry: zero,
                action_retry: zero,
            },
            recovery,
            fast_recovery: recovery,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_recovery_is_shorter() {
        let (n, f) = (RecoveryTimings::normal(), RecoveryTimings::fast());
        assert!(f.after_confirm < n.after_confirm);
        assert!(f.confirm_wait < n.confirm_wait);
        assert!(f.cooldown < n.cooldown);
    }

    #[test]
    fn time_scale_applies_to_cadence_delays() {
        let mut t = SessionTuning::default();
        assert_eq!(t.scaled(Duration::from_millis(500)), Duration::from_millis(500));
        t.time_scale = 0.0;
        assert_eq!(t.scaled(Duration::from_secs(3)), Duration::ZERO);
    }
}
