//! Usage ledger
//!
//! Append-only JSONL log of estimated API spend. Every completed call
//! appends one compact JSON object on its own line; nothing ever rewrites
//! or deletes individual lines. Reads are forward-resilient: a line that
//! fails to parse is skipped (and logged at debug level) so a torn write
//! or hand-edit cannot take the rest of the history with it.
//!
//! Entries are account-agnostic on purpose. The ledger answers "what did
//! this machine spend", not "who spent it", and the budget gate reads it
//! the same way.
//!
//! Concurrent writers are not coordinated; appends from separate
//! processes interleave line-by-line, which the format tolerates.

use std::fs::OpenOptions;
use std::io::Write;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::context::Context;
use crate::error::{LedgerError, Result};

/// One logged API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    /// HTTP method for display only; inferred from the catalog, never
    /// sent on the wire.
    pub method: String,
    pub estimated_cost: f64,
}

impl UsageEntry {
    /// Entry for a call to `endpoint` happening now, with method and
    /// cost looked up from the catalog.
    pub fn new(endpoint: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            method: catalog::method_for(endpoint).to_string(),
            estimated_cost: catalog::cost_for(endpoint),
        }
    }
}

/// Append one entry for a completed call to `endpoint`.
pub fn log_call(ctx: &Context, endpoint: &str) -> Result<()> {
    append_entry(ctx, &UsageEntry::new(endpoint))
}

/// Append `entry` to the ledger as a single line. The line is written
/// with one `write_all` so concurrent appenders interleave at line
/// granularity, not mid-record.
pub fn append_entry(ctx: &Context, entry: &UsageEntry) -> Result<()> {
    ctx.ensure_dir()?;

    let mut line = serde_json::to_string(entry).map_err(LedgerError::Encode)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(ctx.usage_file())
        .map_err(LedgerError::Append)?;
    file.write_all(line.as_bytes()).map_err(LedgerError::Append)?;
    file.flush().map_err(LedgerError::Append)?;
    Ok(())
}

/// Load all entries, oldest first. A missing or empty ledger yields an
/// empty vec. Unparseable lines are skipped.
pub fn load_entries(ctx: &Context) -> Result<Vec<UsageEntry>> {
    let path = ctx.usage_file();
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LedgerError::Read(e).into()),
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UsageEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::debug!("skipping malformed ledger line: {}", e);
            }
        }
    }
    Ok(entries)
}

/// Sum of estimated costs inside the rolling window ending now.
pub fn compute_spend(entries: &[UsageEntry], window: Duration) -> f64 {
    spend_since(entries, Utc::now() - window)
}

/// Sum of estimated costs for entries on the current local calendar day.
/// This is the daily-budget boundary: local midnight, not a rolling 24
/// hours, so the counter visibly resets overnight.
pub fn compute_today_spend(entries: &[UsageEntry]) -> f64 {
    spend_on_or_after_local_date(entries, Local::now().date_naive())
}

fn spend_since(entries: &[UsageEntry], cutoff: DateTime<Utc>) -> f64 {
    entries
        .iter()
        .filter(|e| e.timestamp >= cutoff)
        .map(|e| e.estimated_cost)
        .sum()
}

fn spend_on_or_after_local_date(entries: &[UsageEntry], day: NaiveDate) -> f64 {
    entries
        .iter()
        .filter(|e| e.timestamp.with_timezone(&Local).date_naive() >= day)
        .map(|e| e.estimated_cost)
        .sum()
}
