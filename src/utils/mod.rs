pub mod logging;

use chrono::{DateTime, Local};

/// Timestamp used to name frames and recordings, e.g. `20250301_142233`.
pub fn file_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
