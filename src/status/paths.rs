//! Well-known status file location.

use std::path::PathBuf;

/// Per-user application directory name.
pub const APP_DIR_NAME: &str = "session-warden";

/// Status document file name.
pub const STATUS_FILE_NAME: &str = "status.json";

/// `<data_dir>/session-warden/status.json`, falling back to the system temp
/// directory when the platform reports no data directory.
#[must_use]
pub fn default_status_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join(STATUS_FILE_NAME)
}
