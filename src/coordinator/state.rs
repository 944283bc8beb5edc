use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    pub cadence_secs: f64,
    pub paused: bool,
    pub stopped: bool,
}

impl CoordinatorState {
    pub fn new(cadence_secs: f64) -> Self {
        Self {
            cadence_secs,
            paused: false,
            stopped: false,
        }
    }
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self::new(1.0)
    }
}
