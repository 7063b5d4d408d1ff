//! Terminal output helpers
//!
//! Human-readable text goes through the `print_*` functions; `--json`
//! switches every command to pretty-printed JSON on stdout. Diagnostics
//! never come through here (they go to stderr via tracing), so stdout
//! stays parseable in pipes.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

use libchirp::accounts::{AccountConfig, StoredCredential, AUTH_TYPE_BEARER, AUTH_TYPE_OAUTH2};
use libchirp::api::{DmEvent, ListInfo, Post, Trend, User};
use libchirp::budget::BudgetConfig;
use libchirp::catalog::format_usd;
use libchirp::usage::{self, UsageEntry};

/// Pretty-print any serializable value to stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate content to a character count with an ellipsis, and flatten
/// newlines so each entry stays on one line.
fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let head: String = flat.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

pub fn print_post(post: &Post) {
    println!(
        "{} | {} | author {}",
        post.id,
        post.created_at.as_deref().unwrap_or("-"),
        post.author_id.as_deref().unwrap_or("-")
    );
    println!("{}", post.text);
}

/// One line per post. Empty input prints nothing; exit code carries the
/// "no results" signal in pipes.
pub fn print_posts(posts: &[Post]) {
    for post in posts {
        println!(
            "{} | {} | {}",
            post.id,
            post.created_at.as_deref().unwrap_or("-"),
            preview(&post.text, 60)
        );
    }
}

pub fn print_user(user: &User) {
    println!("@{} ({}) | id {}", user.username, user.name, user.id);
    if let Some(description) = &user.description {
        if !description.is_empty() {
            println!("  {}", description);
        }
    }
    if let Some(metrics) = &user.public_metrics {
        println!(
            "  followers: {}  following: {}  posts: {}",
            metrics.followers_count, metrics.following_count, metrics.tweet_count
        );
    }
}

pub fn print_dm_events(events: &[DmEvent]) {
    for event in events {
        println!(
            "{} | from {} | {}",
            event.id,
            event.sender_id.as_deref().unwrap_or("-"),
            preview(event.text.as_deref().unwrap_or(""), 60)
        );
    }
}

pub fn print_lists(lists: &[ListInfo]) {
    for list in lists {
        match &list.description {
            Some(description) if !description.is_empty() => {
                println!("{} | {} | {}", list.id, list.name, preview(description, 50));
            }
            _ => println!("{} | {}", list.id, list.name),
        }
    }
}

pub fn print_trends(trends: &[Trend]) {
    for trend in trends {
        match trend.tweet_count {
            Some(count) => println!("{} ({} posts)", trend.trend_name, count),
            None => println!("{}", trend.trend_name),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountRow {
    name: String,
    #[serde(rename = "type")]
    auth_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    default: bool,
}

fn describe_credential(credential: &StoredCredential) -> String {
    match credential.auth_type.as_str() {
        AUTH_TYPE_BEARER => "static token".to_string(),
        AUTH_TYPE_OAUTH2 => {
            let expires_at = credential.expires_at.unwrap_or(0);
            match Utc.timestamp_millis_opt(expires_at).single() {
                Some(at) if at > Utc::now() => {
                    format!("expires {}", at.format("%Y-%m-%d %H:%M UTC"))
                }
                Some(_) if credential.refresh_token.is_some() => {
                    "expired, will refresh on next use".to_string()
                }
                _ => "expired, log in again".to_string(),
            }
        }
        other => format!("unrecognized type '{}'", other),
    }
}

/// List configured accounts without ever showing token material.
pub fn print_auth_status(config: &AccountConfig, json: bool) -> Result<()> {
    let rows: Vec<AccountRow> = config
        .accounts
        .iter()
        .map(|(name, credential)| AccountRow {
            name: name.clone(),
            auth_type: credential.auth_type.clone(),
            expires_at: credential.expires_at,
            default: config.default_account.as_deref() == Some(name),
        })
        .collect();

    if json {
        return print_json(&rows);
    }

    if config.accounts.is_empty() {
        println!("No accounts configured. Run 'chirp auth login' first.");
        return Ok(());
    }

    println!("Accounts:");
    for (name, credential) in &config.accounts {
        let marker = if config.default_account.as_deref() == Some(name.as_str()) {
            " [default]"
        } else {
            ""
        };
        println!(
            "  {} | {} | {}{}",
            name,
            credential.auth_type,
            describe_credential(credential),
            marker
        );
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BudgetView {
    #[serde(skip_serializing_if = "Option::is_none")]
    daily: Option<f64>,
    action: String,
    locked: bool,
    today_spend: f64,
}

/// Budget settings plus today's spend. The password hash and salt never
/// appear in output, only the locked flag.
pub fn print_budget(config: &BudgetConfig, today_spend: f64, json: bool) -> Result<()> {
    let locked = libchirp::budget::is_locked(config);
    if json {
        return print_json(&BudgetView {
            daily: config.daily,
            action: config.action.to_string(),
            locked,
            today_spend,
        });
    }

    println!("Budget:");
    match config.daily {
        Some(daily) => println!("  daily limit: {}", format_usd(daily)),
        None => println!("  daily limit: (not set)"),
    }
    println!("  action:      {}", config.action);
    println!("  locked:      {}", if locked { "yes" } else { "no" });
    println!("  spent today: {}", format_usd(today_spend));
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndpointRow {
    endpoint: String,
    method: String,
    calls: usize,
    spend: f64,
}

#[derive(Serialize)]
struct WindowTotals {
    #[serde(rename = "1h")]
    last_hour: f64,
    #[serde(rename = "24h")]
    last_day: f64,
    #[serde(rename = "7d")]
    last_week: f64,
    #[serde(rename = "30d")]
    last_month: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FullUsageReport {
    total_calls: usize,
    total_spend: f64,
    today_spend: f64,
    windows: WindowTotals,
    endpoints: Vec<EndpointRow>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowUsageReport {
    window: String,
    calls: usize,
    spend: f64,
    endpoints: Vec<EndpointRow>,
}

fn endpoint_rows(entries: &[&UsageEntry]) -> Vec<EndpointRow> {
    let mut by_endpoint: BTreeMap<&str, EndpointRow> = BTreeMap::new();
    for entry in entries {
        let row = by_endpoint
            .entry(entry.endpoint.as_str())
            .or_insert_with(|| EndpointRow {
                endpoint: entry.endpoint.clone(),
                method: entry.method.clone(),
                calls: 0,
                spend: 0.0,
            });
        row.calls += 1;
        row.spend += entry.estimated_cost;
    }
    let mut rows: Vec<EndpointRow> = by_endpoint.into_values().collect();
    rows.sort_by(|a, b| {
        b.spend
            .partial_cmp(&a.spend)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

fn print_endpoint_rows(rows: &[EndpointRow]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("By endpoint:");
    for row in rows {
        println!(
            "  {:<6} {:<16} {:>4} call{} {:>10}",
            row.method,
            row.endpoint,
            row.calls,
            if row.calls == 1 { " " } else { "s" },
            format_usd(row.spend)
        );
    }
}

/// Spend report from the local ledger. With a window, totals cover the
/// rolling window ending now; without one, the standard report shows
/// today (local calendar day) plus the four standard rolling windows.
pub fn print_usage_report(
    entries: &[UsageEntry],
    window: Option<(&str, Duration)>,
    json: bool,
) -> Result<()> {
    if let Some((label, window)) = window {
        let cutoff = Utc::now() - window;
        let within: Vec<&UsageEntry> = entries.iter().filter(|e| e.timestamp >= cutoff).collect();
        let spend: f64 = within.iter().map(|e| e.estimated_cost).sum();
        let rows = endpoint_rows(&within);

        if json {
            return print_json(&WindowUsageReport {
                window: label.to_string(),
                calls: within.len(),
                spend,
                endpoints: rows,
            });
        }

        println!(
            "Usage in the last {}: {} call{}, {} estimated",
            label,
            within.len(),
            if within.len() == 1 { "" } else { "s" },
            format_usd(spend)
        );
        print_endpoint_rows(&rows);
        return Ok(());
    }

    let all: Vec<&UsageEntry> = entries.iter().collect();
    let total_spend: f64 = entries.iter().map(|e| e.estimated_cost).sum();
    let report = FullUsageReport {
        total_calls: entries.len(),
        total_spend,
        today_spend: usage::compute_today_spend(entries),
        windows: WindowTotals {
            last_hour: usage::compute_spend(entries, Duration::hours(1)),
            last_day: usage::compute_spend(entries, Duration::hours(24)),
            last_week: usage::compute_spend(entries, Duration::days(7)),
            last_month: usage::compute_spend(entries, Duration::days(30)),
        },
        endpoints: endpoint_rows(&all),
    };

    if json {
        return print_json(&report);
    }

    println!(
        "Usage: {} call{} logged, {} estimated total",
        report.total_calls,
        if report.total_calls == 1 { "" } else { "s" },
        format_usd(report.total_spend)
    );
    println!();
    println!("  today (local): {:>10}", format_usd(report.today_spend));
    println!("  last 1h:       {:>10}", format_usd(report.windows.last_hour));
    println!("  last 24h:      {:>10}", format_usd(report.windows.last_day));
    println!("  last 7d:       {:>10}", format_usd(report.windows.last_week));
    println!("  last 30d:      {:>10}", format_usd(report.windows.last_month));
    print_endpoint_rows(&report.endpoints);
    Ok(())
}

/// Render an epoch-millisecond expiry for human output.
pub fn format_expiry(expires_at: i64) -> String {
    match Utc.timestamp_millis_opt(expires_at).single() {
        Some(at) => format_datetime(at),
        None => format!("{}", expires_at),
    }
}

fn format_datetime(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}
