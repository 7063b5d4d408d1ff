//! Spend budget: configuration, enforcement, and the password lock
//!
//! The budget is one global record in `budget.json`. When a daily ceiling
//! is set, every governed API call is checked against today's spend (local
//! calendar day) before it goes out. Over-budget behavior is a policy:
//! `block` fails the call, `warn` logs and proceeds, `confirm` asks on the
//! terminal.
//!
//! The optional password lock guards budget mutation only. The stored
//! pair is an scrypt hash plus a random salt; both present means locked,
//! both absent means open. Reading the budget never requires the
//! password.
//!
//! Writes are whole-file and last-writer-wins across processes. There is
//! no file locking; two commands mutating the budget at once will race,
//! which is accepted for a per-user CLI.

use std::io::{BufRead, Write};
use std::str::FromStr;

use rand::RngCore;
use scrypt::Params;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, format_usd};
use crate::context::Context;
use crate::error::{BudgetError, ChirpError, ConfigError, Result};
use crate::usage;

const SALT_LEN: usize = 32;
const HASH_LEN: usize = 64;
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Policy applied when a call would push today's spend past the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetAction {
    Block,
    #[default]
    Warn,
    Confirm,
}

impl FromStr for BudgetAction {
    type Err = ChirpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "block" => Ok(BudgetAction::Block),
            "warn" => Ok(BudgetAction::Warn),
            "confirm" => Ok(BudgetAction::Confirm),
            other => Err(ChirpError::InvalidInput(format!(
                "invalid budget action '{}', expected block, warn or confirm",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BudgetAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetAction::Block => write!(f, "block"),
            BudgetAction::Warn => write!(f, "warn"),
            BudgetAction::Confirm => write!(f, "confirm"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetConfig {
    /// Daily ceiling in dollars. Unset means no governance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<f64>,
    #[serde(default)]
    pub action: BudgetAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_salt: Option<String>,
}

/// Load `budget.json`. A missing file is the default config (warn, no
/// ceiling); a file that exists but does not parse is a hard error, since
/// silently defaulting would drop governance the user configured.
pub fn load_budget(ctx: &Context) -> Result<BudgetConfig> {
    let path = ctx.budget_file();
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BudgetConfig::default())
        }
        Err(e) => return Err(ConfigError::Read("budget.json".to_string(), e).into()),
    };
    let config = serde_json::from_str(&content)
        .map_err(|e| ConfigError::Parse("budget.json".to_string(), e))?;
    Ok(config)
}

/// Write `budget.json` as pretty-printed JSON with a trailing newline.
pub fn save_budget(ctx: &Context, config: &BudgetConfig) -> Result<()> {
    ctx.ensure_dir()?;
    let mut json = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Parse("budget.json".to_string(), e))?;
    json.push('\n');
    std::fs::write(ctx.budget_file(), json)
        .map_err(|e| ConfigError::Write("budget.json".to_string(), e))?;
    Ok(())
}

/// Outcome of evaluating one prospective call against the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Within budget, or no ceiling configured.
    Allow,
    /// Over budget with the `warn` policy: proceed after a diagnostic.
    WarnAndAllow { daily: f64, spent: f64, cost: f64 },
    /// Over budget with the `confirm` policy: ask the user.
    AskUser { daily: f64, spent: f64, cost: f64 },
    /// Over budget with the `block` policy.
    Deny { daily: f64, spent: f64, cost: f64 },
}

/// Pure decision function. Spending exactly up to the ceiling is allowed;
/// the gate trips only when projected spend passes it.
pub fn evaluate(config: &BudgetConfig, today_spend: f64, call_cost: f64) -> GateDecision {
    let Some(daily) = config.daily else {
        return GateDecision::Allow;
    };
    if today_spend + call_cost <= daily {
        return GateDecision::Allow;
    }
    match config.action {
        BudgetAction::Block => GateDecision::Deny {
            daily,
            spent: today_spend,
            cost: call_cost,
        },
        BudgetAction::Warn => GateDecision::WarnAndAllow {
            daily,
            spent: today_spend,
            cost: call_cost,
        },
        BudgetAction::Confirm => GateDecision::AskUser {
            daily,
            spent: today_spend,
            cost: call_cost,
        },
    }
}

/// Gate one prospective call to `endpoint`. Consults the ledger for
/// today's spend, then applies the configured policy. The `confirm`
/// policy prompts on stderr and reads one line from stdin; everything
/// else is non-interactive.
///
/// Returns `Ok(())` when the call may proceed.
pub fn check_budget(ctx: &Context, endpoint: &str) -> Result<()> {
    let config = load_budget(ctx)?;
    if config.daily.is_none() {
        return Ok(());
    }

    let entries = usage::load_entries(ctx)?;
    let today_spend = usage::compute_today_spend(&entries);
    let call_cost = catalog::cost_for(endpoint);

    match evaluate(&config, today_spend, call_cost) {
        GateDecision::Allow => Ok(()),
        GateDecision::WarnAndAllow { daily, spent, cost } => {
            tracing::warn!(
                "daily budget exceeded: spent {} today, this call costs {}, limit is {}; proceeding",
                format_usd(spent),
                format_usd(cost),
                format_usd(daily)
            );
            Ok(())
        }
        GateDecision::AskUser { daily, spent, cost } => {
            let question = format!(
                "Daily budget exceeded: spent {} today, this call costs {}, limit is {}. Proceed?",
                format_usd(spent),
                format_usd(cost),
                format_usd(daily)
            );
            let stdin = std::io::stdin();
            let confirmed =
                prompt_confirm(&question, &mut stdin.lock(), &mut std::io::stderr())
                    .map_err(BudgetError::Prompt)?;
            if confirmed {
                Ok(())
            } else {
                Err(BudgetError::Cancelled.into())
            }
        }
        GateDecision::Deny { daily, spent, cost } => Err(BudgetError::Exceeded {
            daily,
            spent,
            cost,
        }
        .into()),
    }
}

/// Ask a y/N question. The question goes to `out` (stderr in practice,
/// so piped stdout stays parseable); the answer is one line from `input`.
/// Only an answer of `y` counts as yes; anything else, including EOF,
/// declines.
pub fn prompt_confirm<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    out: &mut W,
) -> std::io::Result<bool> {
    write!(out, "{} [y/N] ", question)?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// True iff the budget carries the full lock pair.
pub fn is_locked(config: &BudgetConfig) -> bool {
    config.password_hash.is_some() && config.password_salt.is_some()
}

/// Fresh random salt, 32 bytes rendered as 64 hex characters.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Derive the stored hash for a password and hex-encoded salt via scrypt
/// (N=2^14, r=8, p=1, 64-byte key). Deterministic; rendered as 128
/// lowercase hex characters.
pub fn hash_password(password: &str, salt_hex: &str) -> Result<String> {
    let salt = hex::decode(salt_hex)
        .map_err(|e| BudgetError::Kdf(format!("invalid salt: {}", e)))?;
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, HASH_LEN)
        .map_err(|e| BudgetError::Kdf(e.to_string()))?;
    let mut output = [0u8; HASH_LEN];
    scrypt::scrypt(password.as_bytes(), &salt, &params, &mut output)
        .map_err(|e| BudgetError::Kdf(e.to_string()))?;
    Ok(hex::encode(output))
}

/// True when `password` opens the lock. An unlocked budget accepts
/// anything. A lock whose stored salt is unusable rejects everything
/// rather than erroring; `unlock` via the correct password is then
/// impossible and the user has to edit the file.
pub fn verify_password(config: &BudgetConfig, password: &str) -> bool {
    let (Some(stored_hash), Some(salt)) = (&config.password_hash, &config.password_salt)
    else {
        return true;
    };
    match hash_password(password, salt) {
        Ok(hash) => &hash == stored_hash,
        Err(_) => false,
    }
}

/// Set the lock pair, leaving `daily` and `action` untouched.
pub fn lock_budget(ctx: &Context, password: &str) -> Result<()> {
    let mut config = load_budget(ctx)?;
    let salt = generate_salt();
    config.password_hash = Some(hash_password(password, &salt)?);
    config.password_salt = Some(salt);
    save_budget(ctx, &config)
}

/// Remove the lock pair, leaving `daily` and `action` untouched.
pub fn unlock_budget(ctx: &Context) -> Result<()> {
    let mut config = load_budget(ctx)?;
    config.password_hash = None;
    config.password_salt = None;
    save_budget(ctx, &config)
}

/// Guard for budget-mutating commands. No lock means proceed; a lock
/// demands a password that verifies. Read-only display skips this on
/// purpose.
pub fn require_unlocked(config: &BudgetConfig, password: Option<&str>) -> Result<()> {
    if !is_locked(config) {
        return Ok(());
    }
    match password {
        None => Err(BudgetError::PasswordRequired.into()),
        Some(p) if verify_password(config, p) => Ok(()),
        Some(_) => Err(BudgetError::IncorrectPassword.into()),
    }
}
