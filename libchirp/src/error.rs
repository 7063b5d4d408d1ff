//! Error types for chirp

use thiserror::Error;

use crate::catalog::format_usd;

pub type Result<T> = std::result::Result<T, ChirpError>;

#[derive(Error, Debug)]
pub enum ChirpError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("Failed to write {0}: {1}")]
    Write(String, #[source] std::io::Error),

    #[error("Failed to parse {0}: {1}")]
    Parse(String, #[source] serde_json::Error),

    #[error("Could not determine a config directory for this platform")]
    NoConfigDir,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No account is configured. Run 'chirp auth login' first")]
    NoAccountConfigured,

    #[error("Account '{0}' is not configured")]
    UnknownAccount(String),

    #[error("Stored bearer token is empty")]
    EmptyBearerToken,

    #[error("Stored OAuth2 credential has no access token")]
    MissingAccessToken,

    #[error("Access token is expired and cannot be refreshed (no refresh token or client id stored). Run 'chirp auth login' again")]
    CannotRefresh,

    #[error("Unknown credential type '{0}'")]
    UnknownAuthType(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),
}

#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("{}", exceeded_message(.daily, .spent, .cost))]
    Exceeded { daily: f64, spent: f64, cost: f64 },

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Failed to read confirmation: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("Budget settings are password protected. Pass --password")]
    PasswordRequired,

    #[error("Incorrect budget password")]
    IncorrectPassword,

    #[error("Password hashing failed: {0}")]
    Kdf(String),
}

fn exceeded_message(daily: &f64, spent: &f64, cost: &f64) -> String {
    format!(
        "Daily budget exceeded: spent {} today and this call costs {}, over the {} daily limit",
        format_usd(*spent),
        format_usd(*cost),
        format_usd(*daily)
    )
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read usage ledger: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to append to usage ledger: {0}")]
    Append(#[source] std::io::Error),

    #[error("Failed to encode usage entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}
