//! chirp - budget-aware command-line client for the X API
//!
//! Every command that talks to the API runs the same pipeline: check the
//! spend budget, resolve a credential (refreshing OAuth2 tokens near
//! expiry), make the call, print the result, append a usage entry.
//! Command output goes to stdout; diagnostics and prompts go to stderr.

mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use libchirp::accounts::{self, AccountStore, StoredCredential};
use libchirp::api::{ApiClient, DEFAULT_API_BASE_URL};
use libchirp::auth::{self, HttpTokenRefresher};
use libchirp::budget::{self, BudgetAction, BudgetConfig};
use libchirp::catalog::format_usd;
use libchirp::context::Context;
use libchirp::{logging, usage};

/// How long `auth login` waits for the browser redirect.
const LOGIN_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REDIRECT_PORT: u16 = 8585;

#[derive(Parser)]
#[command(name = "chirp")]
#[command(version)]
#[command(about = "Post, read and search on X from the terminal, with local spend governance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account to use (default: the configured default account)
    #[arg(long, global = true)]
    account: Option<String>,

    /// Override the configuration directory
    #[arg(long, global = true, value_name = "PATH")]
    config_dir: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, inspect or switch accounts
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Create, show or delete posts
    Post {
        #[command(subcommand)]
        command: PostCommands,
    },

    /// Search recent posts
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Show the home timeline, or a user's timeline with --user
    Timeline {
        /// Show this user's posts instead of the home timeline
        #[arg(long)]
        user: Option<String>,

        /// Maximum number of posts
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },

    /// Look up users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Follow a user
    Follow {
        /// Handle of the user to follow
        handle: String,
    },

    /// Unfollow a user
    Unfollow {
        /// Handle of the user to unfollow
        handle: String,
    },

    /// Send and list direct messages
    Dm {
        #[command(subcommand)]
        command: DmCommands,
    },

    /// Show and create lists
    Lists {
        #[command(subcommand)]
        command: ListCommands,
    },

    /// Show trending topics
    Trends {
        /// Where-on-earth id (default: worldwide)
        #[arg(long, default_value_t = 1)]
        woeid: u32,
    },

    /// Upload media for use in posts
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },

    /// Show the authenticated user
    Whoami,

    /// Report estimated spend from the local usage ledger
    Usage {
        /// Rolling window to report (e.g. 1h, 24h, 7d, 30d)
        #[arg(long)]
        window: Option<String>,
    },

    /// Inspect or change the daily spend budget
    Budget {
        #[command(subcommand)]
        command: BudgetCommands,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Authenticate and store a credential for an account
    Login {
        /// OAuth2 client id of this app (public client, PKCE flow)
        #[arg(long, env = "CHIRP_CLIENT_ID")]
        client_id: Option<String>,

        /// Store a static app-only bearer token instead of running OAuth2
        #[arg(long, value_name = "TOKEN")]
        bearer: Option<String>,

        /// Name to store the credential under
        #[arg(long, default_value = "default")]
        name: String,

        /// Port for the loopback redirect listener
        #[arg(long, default_value_t = DEFAULT_REDIRECT_PORT)]
        redirect_port: u16,
    },

    /// Remove a stored credential
    Logout,

    /// List configured accounts and token state
    Status,

    /// Set the default account
    Use {
        /// Account name
        name: String,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Publish a new post
    Create {
        /// Post text
        text: String,

        /// Id of a post to reply to
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Delete a post by id
    Delete {
        /// Post id
        id: String,
    },

    /// Show a post by id
    Show {
        /// Post id
        id: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Show a user's profile
    Show {
        /// Handle, with or without the leading @
        handle: String,
    },
}

#[derive(Subcommand)]
enum DmCommands {
    /// Send a direct message to a user
    Send {
        /// Recipient handle
        handle: String,

        /// Message text
        text: String,
    },

    /// List recent direct-message events
    List {
        /// Maximum number of events
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Show lists owned by you (or another user with --user)
    Show {
        /// Owner handle (default: the authenticated user)
        #[arg(long)]
        user: Option<String>,
    },

    /// Create a new list
    Create {
        /// List name
        name: String,

        /// List description
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum MediaCommands {
    /// Upload a media file
    Upload {
        /// Path of the file to upload
        file: String,
    },
}

#[derive(Subcommand)]
enum BudgetCommands {
    /// Show the budget settings and today's spend
    Show,

    /// Set the daily limit and/or over-budget action
    Set {
        /// Daily spending limit in dollars
        #[arg(long)]
        daily: Option<f64>,

        /// What to do when a call would exceed the limit
        #[arg(long, value_name = "block|warn|confirm")]
        action: Option<BudgetAction>,

        /// Budget password, when the budget is locked
        #[arg(long)]
        password: Option<String>,
    },

    /// Clear the budget configuration (the usage ledger is kept)
    Reset {
        /// Budget password, when the budget is locked
        #[arg(long)]
        password: Option<String>,
    },

    /// Protect budget changes with a password
    Lock {
        /// Password to set
        #[arg(long)]
        password: Option<String>,
    },

    /// Remove the budget password
    Unlock {
        /// Current budget password
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_from_env(cli.verbose);

    let ctx = match Context::resolve(cli.config_dir.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_command(&ctx, &cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(ctx: &Context, cli: &Cli) -> Result<()> {
    let account = cli.account.as_deref();
    match &cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login {
                client_id,
                bearer,
                name,
                redirect_port,
            } => login(ctx, client_id.as_deref(), bearer.as_deref(), name, *redirect_port).await,
            AuthCommands::Logout => logout(ctx, account),
            AuthCommands::Status => auth_status(ctx, cli.json),
            AuthCommands::Use { name } => use_account(ctx, name),
        },
        Commands::Post { command } => match command {
            PostCommands::Create { text, reply_to } => {
                create_post(ctx, account, text, reply_to.as_deref(), cli.json).await
            }
            PostCommands::Delete { id } => delete_post(ctx, account, id).await,
            PostCommands::Show { id } => show_post(ctx, account, id, cli.json).await,
        },
        Commands::Search { query, limit } => search(ctx, account, query, *limit, cli.json).await,
        Commands::Timeline { user, limit } => {
            timeline(ctx, account, user.as_deref(), *limit, cli.json).await
        }
        Commands::User { command } => match command {
            UserCommands::Show { handle } => show_user(ctx, account, handle, cli.json).await,
        },
        Commands::Follow { handle } => follow(ctx, account, handle, true).await,
        Commands::Unfollow { handle } => follow(ctx, account, handle, false).await,
        Commands::Dm { command } => match command {
            DmCommands::Send { handle, text } => dm_send(ctx, account, handle, text, cli.json).await,
            DmCommands::List { limit } => dm_list(ctx, account, *limit, cli.json).await,
        },
        Commands::Lists { command } => match command {
            ListCommands::Show { user } => lists_show(ctx, account, user.as_deref(), cli.json).await,
            ListCommands::Create { name, description } => {
                lists_create(ctx, account, name, description.as_deref(), cli.json).await
            }
        },
        Commands::Trends { woeid } => trends(ctx, account, *woeid, cli.json).await,
        Commands::Media { command } => match command {
            MediaCommands::Upload { file } => media_upload(ctx, account, file, cli.json).await,
        },
        Commands::Whoami => whoami(ctx, account, cli.json).await,
        Commands::Usage { window } => usage_report(ctx, window.as_deref(), cli.json),
        Commands::Budget { command } => match command {
            BudgetCommands::Show => budget_show(ctx, cli.json),
            BudgetCommands::Set {
                daily,
                action,
                password,
            } => budget_set(ctx, *daily, *action, password.as_deref()),
            BudgetCommands::Reset { password } => budget_reset(ctx, password.as_deref()),
            BudgetCommands::Lock { password } => budget_lock(ctx, password.as_deref()),
            BudgetCommands::Unlock { password } => budget_unlock(ctx, password.as_deref()),
        },
    }
}

/// Budget gate, credential resolution, client construction. Every
/// API-facing handler starts here; the gate runs before any network
/// traffic, so a blocked call costs nothing.
async fn governed_client(ctx: &Context, account: Option<&str>, endpoint: &str) -> Result<ApiClient> {
    budget::check_budget(ctx, endpoint)?;

    let mut store = AccountStore::open(ctx)?;
    let refresher = HttpTokenRefresher::new();
    let token = auth::resolve_token(ctx, &mut store, &refresher, account).await?;
    let base_url = store
        .config()
        .api_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    Ok(ApiClient::with_base_url(base_url, token)?)
}

/// Record a completed call in the ledger. Logging failure is reported
/// but does not fail the command; the API work is already done.
fn record_usage(ctx: &Context, endpoint: &str) {
    if let Err(e) = usage::log_call(ctx, endpoint) {
        tracing::warn!("failed to record usage for {}: {}", endpoint, e);
    }
}

async fn login(
    ctx: &Context,
    client_id: Option<&str>,
    bearer: Option<&str>,
    name: &str,
    redirect_port: u16,
) -> Result<()> {
    accounts::validate_account_name(name)?;
    let mut store = AccountStore::open(ctx)?;

    if let Some(token) = bearer {
        if token.trim().is_empty() {
            anyhow::bail!("bearer token cannot be empty");
        }
        store.set(name, StoredCredential::bearer(token.trim().to_string()));
        store.save(ctx)?;
        println!("Stored bearer credential for account '{}'", name);
        return Ok(());
    }

    let Some(client_id) = client_id else {
        anyhow::bail!("either --client-id (OAuth2 login) or --bearer <token> is required");
    };

    let pkce = auth::generate_pkce();
    let redirect_uri = format!("http://127.0.0.1:{}/callback", redirect_port);
    let scopes: Vec<String> = auth::DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
    let authorize_url = auth::build_authorize_url(client_id, &redirect_uri, &scopes, &pkce)?;

    // Bind before printing the URL so the redirect cannot beat us.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", redirect_port))
        .await
        .map_err(|e| anyhow::anyhow!("could not listen on port {}: {}", redirect_port, e))?;

    eprintln!("Open this URL in your browser to authorize chirp:");
    eprintln!();
    eprintln!("  {}", authorize_url);
    eprintln!();
    eprintln!("Waiting up to {} seconds for the redirect...", LOGIN_TIMEOUT_SECS);

    let code = auth::wait_for_callback(
        listener,
        &pkce.state,
        std::time::Duration::from_secs(LOGIN_TIMEOUT_SECS),
    )
    .await?;

    let token = HttpTokenRefresher::new()
        .exchange_code(client_id, &code, &redirect_uri, &pkce.verifier)
        .await?;

    store.set(
        name,
        StoredCredential::oauth2(
            token.access_token,
            token.refresh_token,
            Some(token.expires_at),
            client_id.to_string(),
            token.scopes,
        ),
    );
    store.save(ctx)?;
    println!(
        "Logged in as account '{}' (token expires {})",
        name,
        output::format_expiry(token.expires_at)
    );
    Ok(())
}

fn logout(ctx: &Context, account: Option<&str>) -> Result<()> {
    let mut store = AccountStore::open(ctx)?;
    let name = store.resolve_name(account)?;
    store.remove(&name);
    store.save(ctx)?;
    println!("Removed credential for account '{}'", name);
    Ok(())
}

fn auth_status(ctx: &Context, json: bool) -> Result<()> {
    let store = AccountStore::open(ctx)?;
    output::print_auth_status(store.config(), json)
}

fn use_account(ctx: &Context, name: &str) -> Result<()> {
    let mut store = AccountStore::open(ctx)?;
    store.set_default(name)?;
    store.save(ctx)?;
    println!("Default account is now '{}'", name);
    Ok(())
}

async fn create_post(
    ctx: &Context,
    account: Option<&str>,
    text: &str,
    reply_to: Option<&str>,
    json: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("post text cannot be empty");
    }
    let client = governed_client(ctx, account, "posts.create").await?;
    let post = client.create_post(text, reply_to).await?;
    record_usage(ctx, "posts.create");
    if json {
        output::print_json(&post)?;
    } else {
        println!("Posted {}", post.id);
    }
    Ok(())
}

async fn delete_post(ctx: &Context, account: Option<&str>, id: &str) -> Result<()> {
    let client = governed_client(ctx, account, "posts.delete").await?;
    let deleted = client.delete_post(id).await?;
    record_usage(ctx, "posts.delete");
    if deleted {
        println!("Deleted {}", id);
    } else {
        anyhow::bail!("the API did not confirm deletion of {}", id);
    }
    Ok(())
}

async fn show_post(ctx: &Context, account: Option<&str>, id: &str, json: bool) -> Result<()> {
    let client = governed_client(ctx, account, "posts.get").await?;
    let post = client.get_post(id).await?;
    record_usage(ctx, "posts.get");
    if json {
        output::print_json(&post)?;
    } else {
        output::print_post(&post);
    }
    Ok(())
}

async fn search(
    ctx: &Context,
    account: Option<&str>,
    query: &str,
    limit: u32,
    json: bool,
) -> Result<()> {
    let client = governed_client(ctx, account, "posts.search").await?;
    let posts = client.search_posts(query, limit).await?;
    record_usage(ctx, "posts.search");
    if json {
        output::print_json(&posts)?;
    } else {
        output::print_posts(&posts);
    }
    Ok(())
}

async fn timeline(
    ctx: &Context,
    account: Option<&str>,
    user: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let endpoint = if user.is_some() {
        "timeline.user"
    } else {
        "timeline.home"
    };
    let client = governed_client(ctx, account, endpoint).await?;
    let posts = match user {
        Some(handle) => {
            let target = client.user_by_username(handle).await?;
            client.user_timeline(&target.id, limit).await?
        }
        None => {
            let me = client.me().await?;
            client.home_timeline(&me.id, limit).await?
        }
    };
    record_usage(ctx, endpoint);
    if json {
        output::print_json(&posts)?;
    } else {
        output::print_posts(&posts);
    }
    Ok(())
}

async fn show_user(ctx: &Context, account: Option<&str>, handle: &str, json: bool) -> Result<()> {
    let client = governed_client(ctx, account, "users.lookup").await?;
    let user = client.user_by_username(handle).await?;
    record_usage(ctx, "users.lookup");
    if json {
        output::print_json(&user)?;
    } else {
        output::print_user(&user);
    }
    Ok(())
}

async fn follow(ctx: &Context, account: Option<&str>, handle: &str, follow: bool) -> Result<()> {
    let endpoint = if follow { "users.follow" } else { "users.unfollow" };
    let client = governed_client(ctx, account, endpoint).await?;
    let me = client.me().await?;
    let target = client.user_by_username(handle).await?;
    if follow {
        client.follow(&me.id, &target.id).await?;
        record_usage(ctx, endpoint);
        println!("Now following @{}", target.username);
    } else {
        client.unfollow(&me.id, &target.id).await?;
        record_usage(ctx, endpoint);
        println!("Unfollowed @{}", target.username);
    }
    Ok(())
}

async fn dm_send(
    ctx: &Context,
    account: Option<&str>,
    handle: &str,
    text: &str,
    json: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("message text cannot be empty");
    }
    let client = governed_client(ctx, account, "dm.send").await?;
    let recipient = client.user_by_username(handle).await?;
    let sent = client.send_dm(&recipient.id, text).await?;
    record_usage(ctx, "dm.send");
    if json {
        output::print_json(&sent)?;
    } else {
        println!(
            "Sent message {} to @{}",
            sent.dm_event_id, recipient.username
        );
    }
    Ok(())
}

async fn dm_list(ctx: &Context, account: Option<&str>, limit: u32, json: bool) -> Result<()> {
    let client = governed_client(ctx, account, "dm.list").await?;
    let events = client.list_dm_events(limit).await?;
    record_usage(ctx, "dm.list");
    if json {
        output::print_json(&events)?;
    } else {
        output::print_dm_events(&events);
    }
    Ok(())
}

async fn lists_show(
    ctx: &Context,
    account: Option<&str>,
    user: Option<&str>,
    json: bool,
) -> Result<()> {
    let client = governed_client(ctx, account, "lists.list").await?;
    let owner_id = match user {
        Some(handle) => client.user_by_username(handle).await?.id,
        None => client.me().await?.id,
    };
    let lists = client.owned_lists(&owner_id).await?;
    record_usage(ctx, "lists.list");
    if json {
        output::print_json(&lists)?;
    } else {
        output::print_lists(&lists);
    }
    Ok(())
}

async fn lists_create(
    ctx: &Context,
    account: Option<&str>,
    name: &str,
    description: Option<&str>,
    json: bool,
) -> Result<()> {
    let client = governed_client(ctx, account, "lists.create").await?;
    let list = client.create_list(name, description).await?;
    record_usage(ctx, "lists.create");
    if json {
        output::print_json(&list)?;
    } else {
        println!("Created list '{}' ({})", list.name, list.id);
    }
    Ok(())
}

async fn trends(ctx: &Context, account: Option<&str>, woeid: u32, json: bool) -> Result<()> {
    let client = governed_client(ctx, account, "trends.get").await?;
    let trends = client.trends(woeid).await?;
    record_usage(ctx, "trends.get");
    if json {
        output::print_json(&trends)?;
    } else {
        output::print_trends(&trends);
    }
    Ok(())
}

async fn media_upload(ctx: &Context, account: Option<&str>, file: &str, json: bool) -> Result<()> {
    let path = std::path::Path::new(file);
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("could not read {}: {}", path.display(), e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let mime = mime_for(&file_name);

    let client = governed_client(ctx, account, "media.upload").await?;
    let media = client.upload_media(bytes, &file_name, mime).await?;
    record_usage(ctx, "media.upload");
    if json {
        output::print_json(&media)?;
    } else {
        println!("Uploaded {} as media {}", file_name, media.id);
    }
    Ok(())
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn whoami(ctx: &Context, account: Option<&str>, json: bool) -> Result<()> {
    let client = governed_client(ctx, account, "users.me").await?;
    let me = client.me().await?;
    record_usage(ctx, "users.me");
    if json {
        output::print_json(&me)?;
    } else {
        output::print_user(&me);
    }
    Ok(())
}

fn usage_report(ctx: &Context, window: Option<&str>, json: bool) -> Result<()> {
    let entries = usage::load_entries(ctx)?;
    let window = match window {
        Some(label) => {
            let duration = humantime::parse_duration(label)
                .map_err(|e| anyhow::anyhow!("invalid window '{}': {}", label, e))?;
            let duration = chrono::Duration::from_std(duration)
                .map_err(|_| anyhow::anyhow!("window '{}' is too large", label))?;
            Some((label, duration))
        }
        None => None,
    };
    output::print_usage_report(&entries, window, json)
}

fn budget_show(ctx: &Context, json: bool) -> Result<()> {
    let config = budget::load_budget(ctx)?;
    let entries = usage::load_entries(ctx)?;
    let today = usage::compute_today_spend(&entries);
    output::print_budget(&config, today, json)
}

/// Supplied password, or a no-echo prompt when we are on a terminal.
/// Non-interactive callers must pass --password; None here lets
/// `require_unlocked` report PasswordRequired.
fn password_or_prompt(password: Option<&str>, prompt: &str) -> Result<Option<String>> {
    if let Some(password) = password {
        return Ok(Some(password.to_string()));
    }
    if atty::is(atty::Stream::Stdin) {
        return Ok(Some(rpassword::prompt_password(prompt)?));
    }
    Ok(None)
}

fn unlock_guard(config: &BudgetConfig, password: Option<&str>) -> Result<()> {
    let password = if budget::is_locked(config) {
        password_or_prompt(password, "Budget password: ")?
    } else {
        None
    };
    budget::require_unlocked(config, password.as_deref())?;
    Ok(())
}

fn budget_set(
    ctx: &Context,
    daily: Option<f64>,
    action: Option<BudgetAction>,
    password: Option<&str>,
) -> Result<()> {
    if daily.is_none() && action.is_none() {
        anyhow::bail!("nothing to change: pass --daily and/or --action");
    }
    if let Some(daily) = daily {
        if !daily.is_finite() || daily < 0.0 {
            anyhow::bail!("--daily must be a non-negative amount");
        }
    }

    let mut config = budget::load_budget(ctx)?;
    unlock_guard(&config, password)?;

    if let Some(daily) = daily {
        config.daily = Some(daily);
    }
    if let Some(action) = action {
        config.action = action;
    }
    budget::save_budget(ctx, &config)?;

    match config.daily {
        Some(daily) => println!(
            "Budget set: {} per day, action '{}'",
            format_usd(daily),
            config.action
        ),
        None => println!("Budget action set to '{}' (no daily limit)", config.action),
    }
    Ok(())
}

fn budget_reset(ctx: &Context, password: Option<&str>) -> Result<()> {
    let config = budget::load_budget(ctx)?;
    unlock_guard(&config, password)?;

    // Back to the defaults, lock included. The usage ledger is untouched.
    budget::save_budget(ctx, &BudgetConfig::default())?;
    println!("Budget configuration reset (usage history kept)");
    Ok(())
}

fn budget_lock(ctx: &Context, password: Option<&str>) -> Result<()> {
    let config = budget::load_budget(ctx)?;
    unlock_guard(&config, password)?;

    let new_password = password_or_prompt(password, "New budget password: ")?
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow::anyhow!("a password is required: pass --password"))?;
    budget::lock_budget(ctx, &new_password)?;
    println!("Budget is now password protected");
    Ok(())
}

fn budget_unlock(ctx: &Context, password: Option<&str>) -> Result<()> {
    let config = budget::load_budget(ctx)?;
    if !budget::is_locked(&config) {
        println!("Budget is not locked");
        return Ok(());
    }
    unlock_guard(&config, password)?;
    budget::unlock_budget(ctx)?;
    println!("Budget password removed");
    Ok(())
}
