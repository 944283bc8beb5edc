pub mod engine;
pub mod library;
pub mod manifest;
pub mod scoring;

pub use engine::{
    inverted_hit, load_frame, normal_hit, Detection, DetectionEngine, DetectionReport, TemplateScore,
};
pub use library::TemplateLibrary;
pub use manifest::{DetectionContext, Manifest, FALLBACK_THRESHOLD};
