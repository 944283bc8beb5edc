use std::time::Duration;

use rand::Rng;

/// Named cadence preset selectable from the control surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadencePreset {
    pub key: char,
    pub secs: f64,
    pub name: &'static str,
}

pub const PRESETS: [CadencePreset; 10] = [
    CadencePreset { key: '0', secs: 0.01, name: "extreme" },
    CadencePreset { key: '1', secs: 0.05, name: "limit" },
    CadencePreset { key: '2', secs: 0.1, name: "ultra" },
    CadencePreset { key: '3', secs: 0.5, name: "fast" },
    CadencePreset { key: '4', secs: 1.0, name: "normal" },
    CadencePreset { key: '5', secs: 1.5, name: "slow" },
    CadencePreset { key: '6', secs: 2.0, name: "very slow" },
    CadencePreset { key: '7', secs: 3.0, name: "crawl" },
    CadencePreset { key: '8', secs: 5.0, name: "idle" },
    CadencePreset { key: '9', secs: 10.0, name: "standby" },
];

pub const FASTEST_TIER_SECS: f64 = 0.1;

pub fn preset_for_key(key: char) -> Option<CadencePreset> {
    PRESETS.iter().copied().find(|p| p.key == key)
}

pub fn describe(secs: f64) -> String {
    PRESETS
        .iter()
        .find(|p| (p.secs - secs).abs() < f64::EPSILON)
        .map(|p| format!("{} ({:.2}s)", p.name, p.secs))
        .unwrap_or_else(|| format!("{secs:.2}s"))
}

pub fn is_fastest_tier(secs: f64) -> bool {
    secs <= FASTEST_TIER_SECS
}

/// Delay between the action and the follow-up resource read.
pub fn settle_delay(secs: f64) -> Duration {
    if secs <= FASTEST_TIER_SECS {
        Duration::from_millis(50)
    } else if secs <= 0.5 {
        Duration::from_millis(200)
    } else {
        Duration::from_millis(500)
    }
}

/// Jitter half-width as a fraction of the cadence; narrower at short cadences.
pub fn jitter_fraction(secs: f64) -> f64 {
    if secs <= 0.1 {
        0.05
    } else if secs <= 0.2 {
        0.10
    } else {
        0.20
    }
}

pub fn jittered_sleep(secs: f64) -> Duration {
    let spread = jitter_fraction(secs);
    let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
    Duration::from_secs_f64((secs * factor).max(0.0))
}
