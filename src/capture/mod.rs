pub mod duplicate;
pub mod ffmpeg;
pub mod manager;
pub mod recording;
pub mod tool;

pub use duplicate::{DuplicateFrameGuard, DuplicateVerdict};
pub use ffmpeg::FfmpegTool;
pub use manager::{discard, CaptureManager};
pub use recording::Recording;
pub use tool::{CaptureTool, RecordingProcess};
