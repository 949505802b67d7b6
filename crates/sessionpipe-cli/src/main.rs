//! sessionpipe - command-line shell for an authenticated REST API.
//!
//! Keeps the session in a file-backed store between runs, so `login` once
//! and later `get`/`post` calls reuse (and transparently renew) the token.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionpipe_core::api::{ApiClient, ApiError, ApiRequest};
use sessionpipe_core::auth::{Session, SessionEvent, TokenStore};
use sessionpipe_core::config::Config;
use sessionpipe_core::storage::{FileStorage, MemoryStorage, SecureStore, StorageBackend, SystemClock};
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sessionpipe", version, about = "Call an authenticated REST API from the shell")]
struct Cli {
    /// Log every request and response (same as SESSIONPIPE_ENV=development)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: String,
    },
    /// Create an account and store the session
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
    },
    /// End the session locally and on the server
    Logout,
    /// Show whether a session is stored
    Status,
    /// GET a path and print the response body
    Get { path: String },
    /// POST JSON to a path and print the response body
    Post {
        path: String,
        /// JSON request body
        #[arg(short, long, default_value = "{}")]
        data: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(verbose: bool) {
    // RUST_LOG wins when set (e.g., RUST_LOG=sessionpipe_core=debug)
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Open the session store, falling back to memory when the cache directory
/// cannot be written.
fn open_storage() -> Arc<dyn StorageBackend> {
    let file = Config::storage_path().map(FileStorage::open);
    match file {
        Ok(storage) => {
            let storage: Arc<dyn StorageBackend> = Arc::new(storage);
            let probe = SecureStore::new(storage.clone(), Arc::new(SystemClock));
            if probe.is_available() {
                return storage;
            }
            warn!("Session file is not writable, session will not persist");
        }
        Err(e) => warn!(error = %e, "No cache directory, session will not persist"),
    }
    Arc::new(MemoryStorage::new())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    config.verbose_logging |= cli.verbose;

    init_tracing(config.verbose_logging);
    info!(api = %config.api_base_url, "sessionpipe starting");

    let store = SecureStore::new(open_storage(), Arc::new(SystemClock));
    let client = ApiClient::new(&config, TokenStore::new(store))?;
    let mut expired = client.session_events().subscribe();

    let result = execute(&client, cli.command).await;

    // The pipeline has already cleared stored state; the shell just has to
    // drop back to the logged-out view.
    if session_expired(&mut expired) {
        eprintln!("Your session has expired. Run `sessionpipe login` to sign in again.");
    }

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{}", e.user_message());
            if let Some(response) = e.response() {
                eprintln!("  {} {}", response.status, response.body);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn session_expired(events: &mut Receiver<SessionEvent>) -> bool {
    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        expired |= event == SessionEvent::Expired;
    }
    expired
}

async fn execute(client: &ApiClient, command: Command) -> Result<(), ApiError> {
    match command {
        Command::Login { username } => {
            let password = prompt_password()?;
            let session = client
                .login(&serde_json::json!({ "username": username, "password": password }))
                .await?;
            print_session(&session);
        }
        Command::Register { username, email } => {
            let password = prompt_password()?;
            let session = client
                .register(&serde_json::json!({
                    "username": username,
                    "email": email,
                    "password": password,
                }))
                .await?;
            print_session(&session);
        }
        Command::Logout => {
            client.logout().await;
            println!("Logged out.");
        }
        Command::Status => print_session(&client.session()),
        Command::Get { path } => {
            let response = client.send(&ApiRequest::get(path)).await?;
            println!("{}", response.text());
        }
        Command::Post { path, data } => {
            let body: serde_json::Value = serde_json::from_str(&data)
                .map_err(|e| ApiError::Validation(format!("--data is not valid JSON: {}", e)))?;
            let response = client.send(&ApiRequest::post(path).json(&body)?).await?;
            println!("{}", response.text());
        }
    }
    Ok(())
}

fn prompt_password() -> Result<String, ApiError> {
    rpassword::prompt_password("Password: ")
        .map_err(|e| ApiError::Validation(format!("Could not read password: {}", e)))
}

fn print_session(session: &Session) {
    match session {
        Session::Unauthenticated => println!("Not logged in."),
        Session::Authenticated { user, .. } => match user {
            Some(user) => println!("Logged in as {}", user),
            None => println!("Logged in."),
        },
    }
}
