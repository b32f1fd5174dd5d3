//! sessionvault - command-line front-end for an API session.
//!
//! Logs in once, keeps the token pair in the OS keychain (or an encrypted
//! file), and makes authorized requests that refresh the access token on
//! their own when the server rejects it.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionvault_core::config::STORE_PASSPHRASE_ENV;
use sessionvault_core::{ApiRequest, Config, SessionError, SessionManager, StoreBackend};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sessionvault")]
#[command(version, about = "Log in to an API and make authorized requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.config/sessionvault/config.json)
    #[arg(long, global = true, env = "SESSIONVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// API base URL, overriding the config file
    #[arg(long, global = true, env = "SESSIONVAULT_BASE_URL")]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        #[arg(short, long, env = "SESSIONVAULT_EMAIL")]
        email: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Show session state
    Status,

    /// Authorized GET request; prints the response body
    Get {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// Query parameters as key=value
        #[arg(short, long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },
}

fn parse_query_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if e
            .downcast_ref::<SessionError>()
            .is_some_and(SessionError::requires_login)
        {
            eprintln!("Run `sessionvault login` to sign in again.");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    debug!(base_url = %config.base_url, store = ?config.store, "Configuration loaded");

    let manager = open_session(&config)?;
    manager.restore().await.context("Failed to read stored session")?;

    match cli.command {
        Commands::Login { email } => login(&manager, email).await,
        Commands::Logout => {
            manager.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Commands::Whoami => {
            match manager.current_user().await {
                Some(user) => println!("{} <{}> (employee {})", user.full_name(), user.email, user.employee_id),
                None => println!("Not logged in."),
            }
            Ok(())
        }
        Commands::Status => {
            let status = manager.status().await;
            match status.user {
                Some(ref user) => {
                    println!("Logged in as {} (user id {})", user.email, user.user_id);
                    match status.access_token_age {
                        Some(age) => println!("Access token age: {}m", age.num_minutes().max(0)),
                        None => println!("Access token age: unknown (restored session)"),
                    }
                }
                None => println!("Not logged in."),
            }
            println!("Store: {:?}", config.store);
            Ok(())
        }
        Commands::Get { path, query } => {
            let request = query
                .into_iter()
                .fold(ApiRequest::get(path), |req, (k, v)| req.with_query(k, v));
            let response = manager.authorized_request(&request).await?;

            if !response.is_success() {
                anyhow::bail!("Request failed with status {}: {}", response.status, response.body);
            }
            // Pretty-print JSON bodies, pass anything else through
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", response.body),
            }
            Ok(())
        }
    }
}

fn open_session(config: &Config) -> Result<SessionManager> {
    let passphrase = match config.store {
        StoreBackend::File => Some(match std::env::var(STORE_PASSPHRASE_ENV) {
            Ok(passphrase) => passphrase,
            Err(_) => rpassword::prompt_password("Store passphrase: ")
                .context("Failed to read store passphrase")?,
        }),
        _ => None,
    };

    let policy = config.refresh_policy().context("Invalid token refresh settings")?;
    let store = config.open_store(passphrase)?;
    let transport = config.transport()?;

    Ok(SessionManager::new(Arc::new(transport), store).with_policy(policy))
}

async fn login(manager: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        anyhow::bail!("Email required");
    }

    let password = match std::env::var("SESSIONVAULT_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let user = manager.login(&email, &password).await?;
    info!(user_id = user.user_id, "Login complete");
    println!("Logged in as {} <{}>.", user.full_name(), user.email);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}
