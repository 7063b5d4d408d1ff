//! chirp - a budget-aware command-line client for the X API
//!
//! This library holds everything behind the `chirp` binary: account
//! credential storage with transparent OAuth2 refresh, the spend budget
//! gate with its password lock, the append-only usage ledger, and a thin
//! typed API client.

pub mod accounts;
pub mod api;
pub mod auth;
pub mod budget;
pub mod catalog;
pub mod context;
pub mod error;
pub mod logging;
pub mod usage;

// Re-export commonly used types
pub use accounts::{AccountStore, StoredCredential};
pub use budget::{BudgetAction, BudgetConfig};
pub use context::Context;
pub use error::{ChirpError, Result};
pub use usage::UsageEntry;
