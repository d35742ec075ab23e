//! CLI-side config and state-path resolution.
//!
//! `prompter-core` parses and validates a TOML config once handed its
//! text (`prompter_core::config::load_file`); everything here is purely
//! about finding files on disk, kept deliberately separate from the
//! resolved-config type itself.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The state file prompter reads/writes for a given config path.
///
/// Conventionally `.prompter_state.json` in the current working
/// directory, independent of where the config file itself lives -- a
/// run is keyed by "where you ran it from", not by config location.
pub fn state_path() -> PathBuf {
    PathBuf::from(".prompter_state.json")
}

/// Load and validate the configuration file at `path`.
pub fn load_validated(path: &Path) -> Result<prompter_core::ValidatedConfig> {
    prompter_core::config::load_file(path)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// The one environment variable the CLI surface reads: a timeout in
/// seconds for the external configuration-wizard collaborator. The
/// wizard itself is a stub -- this only carries the setting through so a
/// future wizard integration has somewhere to read it from. The core
/// reads no environment variables at all.
pub fn wizard_timeout() -> Option<std::time::Duration> {
    std::env::var("PROMPTER_WIZARD_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // `wizard_timeout` reads a process-wide environment variable, so
    // tests that set it must not run concurrently with each other.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    #[test]
    fn state_path_is_fixed_and_relative() {
        let path = state_path();
        assert_eq!(path, PathBuf::from(".prompter_state.json"));
        assert!(path.is_relative());
    }

    #[test]
    fn wizard_timeout_absent_by_default() {
        let _lock = lock_env();
        std::env::remove_var("PROMPTER_WIZARD_TIMEOUT");
        assert_eq!(wizard_timeout(), None);
    }

    #[test]
    fn wizard_timeout_parses_seconds() {
        let _lock = lock_env();
        std::env::set_var("PROMPTER_WIZARD_TIMEOUT", "30");
        assert_eq!(wizard_timeout(), Some(std::time::Duration::from_secs(30)));
        std::env::remove_var("PROMPTER_WIZARD_TIMEOUT");
    }

    #[test]
    fn wizard_timeout_ignores_garbage() {
        let _lock = lock_env();
        std::env::set_var("PROMPTER_WIZARD_TIMEOUT", "not-a-number");
        assert_eq!(wizard_timeout(), None);
        std::env::remove_var("PROMPTER_WIZARD_TIMEOUT");
    }

    #[test]
    fn load_validated_reports_missing_file() {
        let result = load_validated(Path::new("/nonexistent/prompter.toml"));
        assert!(result.is_err());
    }
}
