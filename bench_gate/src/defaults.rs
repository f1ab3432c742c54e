//! Centralized default values for bench-gate configuration.
//!
//! These are the fallbacks used when neither the configuration file nor the
//! command line provide a value.

use chrono::Duration;

// ============================================================================
// Store Defaults
// ============================================================================

/// Directory holding the history document, relative to the working directory.
pub const DEFAULT_DATA_FOLDER: &str = "benchmark_data";

/// File name of the history document inside [`DEFAULT_DATA_FOLDER`].
pub const DEFAULT_DATA_FILE: &str = "data.json";

/// Indentation used when writing the history document.
pub const JSON_INDENT: &[u8] = b"    ";

// ============================================================================
// Evaluation Defaults
// ============================================================================

/// Number of snapshots averaged by the moving-average trend detection.
pub const DEFAULT_MOVING_AVE_WINDOW_SIZE: usize = 5;

/// Upper bound for all percentage thresholds.
pub const MAX_PERCENTAGE_THRESHOLD: f64 = 100.0;

/// Margin value requesting a strict comparison without tolerance.
pub const STRICT_MARGIN: f64 = -1.0;

/// Age of the "week ago" reference of the delta trend detection.
pub fn week_ago_target_age() -> Duration {
    Duration::weeks(1)
}

// ============================================================================
// Display Defaults
// ============================================================================

/// Number of characters of a commit id shown in summaries.
pub const DEFAULT_COMMIT_HASH_DISPLAY_LENGTH: usize = 7;

// ============================================================================
// Configuration Discovery
// ============================================================================

/// Name of the repository-local configuration file.
pub const LOCAL_CONFIG_FILE_NAME: &str = ".benchgateconfig";

/// Directory below the user configuration directory.
pub const SYSTEM_CONFIG_DIR_NAME: &str = "bench-gate";
