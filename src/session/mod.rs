pub mod controller;
pub mod health;
pub mod loop_worker;
pub mod markers;
pub mod recovery;
pub mod state;
pub mod surface;
pub mod tuning;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{DetectionOutcome, IterationOutcome, SessionController, SessionServices};
pub use loop_worker::{session_worker, SessionFleet, SurfaceFactory, WorkerConfig};
pub use state::{Observation, SessionPhase, SessionState};
pub use surface::{ActionSurface, ElementRef, Marker, MarkerKind};
pub use tuning::{RecoveryTimings, SessionTuning, SurfaceTimings};
