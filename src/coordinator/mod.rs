pub mod cadence;
mod controller;
mod state;

pub use cadence::{CadencePreset, PRESETS};
pub use controller::Coordinator;
pub use state::CoordinatorState;
