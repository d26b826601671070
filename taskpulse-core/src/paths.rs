//! Filesystem locations for taskpulse
//!
//! This module follows the XDG Base Directory Specification:
//! - Data (persisted state): `$XDG_DATA_HOME/taskpulse/` (~/.local/share/taskpulse/)
//! - State/Logs: `$XDG_STATE_HOME/taskpulse/` (~/.local/state/taskpulse/)

use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Returns the data directory path (for the persisted state file)
///
/// `$XDG_DATA_HOME/taskpulse/` (~/.local/share/taskpulse/)
pub fn data_dir() -> PathBuf {
    xdg_data_home().join("taskpulse")
}

/// Returns the state directory path (for logs)
///
/// `$XDG_STATE_HOME/taskpulse/` (~/.local/state/taskpulse/)
pub fn state_dir() -> PathBuf {
    xdg_state_home().join("taskpulse")
}

/// Returns the persisted state file path
///
/// `$XDG_DATA_HOME/taskpulse/state.json`
pub fn state_file_path() -> PathBuf {
    data_dir().join("state.json")
}

/// Returns the log file path
///
/// `$XDG_STATE_HOME/taskpulse/taskpulse.log`
pub fn log_path() -> PathBuf {
    state_dir().join("taskpulse.log")
}
