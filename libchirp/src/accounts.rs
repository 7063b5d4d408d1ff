//! Account credential store
//!
//! Accounts live in `config.json`: a map of account name to stored
//! credential, plus the default account name and an optional API base URL
//! override. The whole file is read once per command and written back
//! whole; across processes the last writer wins (no file locking, see the
//! concurrency notes in `budget`).
//!
//! A credential's `type` is stored as a plain string so that a file
//! written by a newer version still parses here; using an account with a
//! type this build does not understand fails at resolution time, not at
//! load time.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{AuthError, ChirpError, ConfigError, Result};

pub const AUTH_TYPE_OAUTH2: &str = "oauth2";
pub const AUTH_TYPE_BEARER: &str = "bearer";

/// One stored credential. Exactly one of the two shapes is populated:
/// oauth2 uses `access_token`/`refresh_token`/`expires_at`/`client_id`,
/// bearer uses `bearer_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds. Absent means already expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl StoredCredential {
    pub fn oauth2(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
        client_id: String,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            auth_type: AUTH_TYPE_OAUTH2.to_string(),
            access_token: Some(access_token),
            refresh_token,
            expires_at,
            client_id: Some(client_id),
            scopes: if scopes.is_empty() { None } else { Some(scopes) },
            bearer_token: None,
        }
    }

    pub fn bearer(token: String) -> Self {
        Self {
            auth_type: AUTH_TYPE_BEARER.to_string(),
            access_token: None,
            refresh_token: None,
            expires_at: None,
            client_id: None,
            scopes: None,
            bearer_token: Some(token),
        }
    }
}

/// Shape of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_account: Option<String>,
    #[serde(default)]
    pub accounts: BTreeMap<String, StoredCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

/// Loaded view of `config.json` with mutation and save.
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
    config: AccountConfig,
}

impl AccountStore {
    /// Read `config.json`, or start from the empty config when the file
    /// does not exist yet.
    pub fn open(ctx: &Context) -> Result<Self> {
        let path = ctx.config_file();
        let config = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse("config.json".to_string(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AccountConfig::default(),
            Err(e) => return Err(ConfigError::Read("config.json".to_string(), e).into()),
        };
        Ok(Self { path, config })
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn account_names(&self) -> Vec<String> {
        self.config.accounts.keys().cloned().collect()
    }

    pub fn default_account(&self) -> Option<&str> {
        self.config.default_account.as_deref()
    }

    /// Resolve an account name: an explicit name must exist; otherwise
    /// the configured default is used, and a store holding exactly one
    /// account falls back to that one.
    pub fn resolve_name(&self, name: Option<&str>) -> Result<String> {
        if let Some(name) = name {
            if self.config.accounts.contains_key(name) {
                return Ok(name.to_string());
            }
            return Err(AuthError::UnknownAccount(name.to_string()).into());
        }

        if let Some(default) = &self.config.default_account {
            if self.config.accounts.contains_key(default) {
                return Ok(default.clone());
            }
        }

        if self.config.accounts.len() == 1 {
            if let Some(only) = self.config.accounts.keys().next() {
                return Ok(only.clone());
            }
        }

        Err(AuthError::NoAccountConfigured.into())
    }

    /// Look up the named (or default) account's credential.
    pub fn get(&self, name: Option<&str>) -> Result<(String, &StoredCredential)> {
        let resolved = self.resolve_name(name)?;
        let credential = self
            .config
            .accounts
            .get(&resolved)
            .ok_or(AuthError::NoAccountConfigured)?;
        Ok((resolved, credential))
    }

    /// Insert or replace a credential. The first stored account becomes
    /// the default.
    pub fn set(&mut self, name: &str, credential: StoredCredential) {
        self.config
            .accounts
            .insert(name.to_string(), credential);
        if self.config.default_account.is_none() {
            self.config.default_account = Some(name.to_string());
        }
    }

    /// Remove an account. Clears the default if it pointed at it.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.config.accounts.remove(name).is_some();
        if removed && self.config.default_account.as_deref() == Some(name) {
            self.config.default_account = self.config.accounts.keys().next().cloned();
        }
        removed
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.config.accounts.contains_key(name) {
            return Err(AuthError::UnknownAccount(name.to_string()).into());
        }
        self.config.default_account = Some(name.to_string());
        Ok(())
    }

    /// Write `config.json` as pretty-printed JSON with a trailing
    /// newline. Sets file permissions to 600 on Unix; the file holds
    /// tokens.
    pub fn save(&self, ctx: &Context) -> Result<()> {
        ctx.ensure_dir()?;
        let mut json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| ConfigError::Parse("config.json".to_string(), e))?;
        json.push('\n');
        std::fs::write(&self.path, json)
            .map_err(|e| ConfigError::Write("config.json".to_string(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .map_err(|e| ConfigError::Write("config.json".to_string(), e))?;
        }

        tracing::debug!("saved account config to {:?}", self.path);
        Ok(())
    }
}

/// Account names are part of file contents and command lines: keep them
/// short and boring.
pub fn validate_account_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChirpError::InvalidInput(
            "account name cannot be empty".to_string(),
        ));
    }
    if name.len() > 64 {
        return Err(ChirpError::InvalidInput(format!(
            "account name too long: {} characters (max 64)",
            name.len()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ChirpError::InvalidInput(format!(
            "invalid account name '{}': use letters, digits, hyphens and underscores",
            name
        )));
    }
    Ok(())
}
