//! Utility functions for working with environment variables.

use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable for the replicore home directory (SQLite database, default
/// TOML config, etc).
pub const REPLICORE_HOME_ENV_VAR: &str = "REPLICORE_HOME";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path to the replicore home directory. If `REPLICORE_HOME` is set,
/// returns that path; otherwise falls back to the platform config directory (e.g.
/// `~/.config/replicore` on Linux).
pub fn get_replicore_home_path() -> PathBuf {
    if let Ok(home) = std::env::var(REPLICORE_HOME_ENV_VAR) {
        return PathBuf::from(home);
    }
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("replicore")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
