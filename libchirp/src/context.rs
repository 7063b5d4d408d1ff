//! Execution context
//!
//! Resolves the configuration directory once at startup and hands out the
//! paths of the files chirp persists there. Every operation that touches
//! disk takes a `&Context` instead of consulting process state, which
//! keeps tests hermetic and makes the directory override explicit.
//!
//! All three files live flat in one directory:
//! `config.json` (accounts), `budget.json` (spend policy),
//! `usage.jsonl` (append-only ledger).

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Environment override for the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CHIRP_CONFIG_DIR";

#[derive(Debug, Clone)]
pub struct Context {
    config_dir: PathBuf,
}

impl Context {
    /// Resolve the configuration directory: an explicit `--config-dir`
    /// override wins, then `CHIRP_CONFIG_DIR`, then the platform config
    /// directory following the XDG Base Directory spec.
    pub fn resolve(override_dir: Option<&str>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::at(PathBuf::from(shellexpand::tilde(dir).to_string())));
        }

        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(Self::at(PathBuf::from(shellexpand::tilde(&dir).to_string())));
            }
        }

        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::at(config_dir.join("chirp")))
    }

    /// Context rooted at an explicit directory. Used by tests and by
    /// embedders that manage their own paths.
    pub fn at(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of the account/credential file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Path of the budget configuration file.
    pub fn budget_file(&self) -> PathBuf {
        self.config_dir.join("budget.json")
    }

    /// Path of the usage ledger.
    pub fn usage_file(&self) -> PathBuf {
        self.config_dir.join("usage.jsonl")
    }

    /// Create the configuration directory if it does not exist yet.
    /// Called by every writer before first write.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).map_err(|e| {
            ConfigError::Write(self.config_dir.display().to_string(), e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_explicit_override_wins() {
        let ctx = Context::resolve(Some("/tmp/chirp-test")).unwrap();
        assert_eq!(ctx.config_dir(), Path::new("/tmp/chirp-test"));
    }

    #[test]
    #[serial]
    fn test_env_var_used_when_no_override() {
        std::env::set_var(CONFIG_DIR_ENV, "/tmp/chirp-env-test");
        let ctx = Context::resolve(None).unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(ctx.config_dir(), Path::new("/tmp/chirp-env-test"));
    }

    #[test]
    #[serial]
    fn test_override_beats_env_var() {
        std::env::set_var(CONFIG_DIR_ENV, "/tmp/chirp-env-test");
        let ctx = Context::resolve(Some("/tmp/chirp-flag-test")).unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(ctx.config_dir(), Path::new("/tmp/chirp-flag-test"));
    }

    #[test]
    #[serial]
    fn test_empty_env_var_is_ignored() {
        std::env::set_var(CONFIG_DIR_ENV, "");
        let ctx = Context::resolve(None).unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        // Falls back to the platform dir, which always ends in "chirp".
        assert!(ctx.config_dir().ends_with("chirp"));
    }

    #[test]
    fn test_file_paths_are_flat_in_the_config_dir() {
        let ctx = Context::at(PathBuf::from("/data/chirp"));
        assert_eq!(ctx.config_file(), Path::new("/data/chirp/config.json"));
        assert_eq!(ctx.budget_file(), Path::new("/data/chirp/budget.json"));
        assert_eq!(ctx.usage_file(), Path::new("/data/chirp/usage.jsonl"));
    }

    #[test]
    fn test_ensure_dir_creates_nested_path() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = Context::at(temp.path().join("deep").join("chirp"));
        ctx.ensure_dir().unwrap();
        assert!(ctx.config_dir().is_dir());
        // Idempotent.
        ctx.ensure_dir().unwrap();
    }
}
