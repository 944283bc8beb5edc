pub mod actions;
pub mod target;

pub use actions::{ActionTable, AuxiliarySequence, ResolvedActions};
pub use target::{enabled_targets, TargetConfig, TargetKind};
