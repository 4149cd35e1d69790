//! sessionkeep - keep an API session alive from the command line.
//!
//! Logs in against the configured API, persists the session, and makes
//! authenticated requests that renew the access token as needed.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_stream::StreamExt;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionkeep_core::api::ApiRequest;
use sessionkeep_core::auth::{token, GuardDecision, LogNavigator, Session};
use sessionkeep_core::config::{Config, ENV_PASSWORD};

/// File name prefix for the rolling log in `log_dir`
const LOG_FILE_PREFIX: &str = "sessionkeep.log";

const USAGE: &str = "\
Usage: sessionkeep <command>

Commands:
  login [username]        Log in and store the session
  logout                  End the session
  status                  Show the stored session
  get <path> [key=value]  GET a protected resource
  watch                   Keep the session alive until Ctrl-C";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file log and must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "sessionkeep starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let client = Arc::new(config.api_client()?);
    let session = Session::with_client(
        client,
        config.open_store()?,
        Arc::new(LogNavigator),
        config.refresh_options(),
    );

    match command.as_str() {
        "login" => login(&session, &config, args.get(1).cloned()).await,
        "logout" => {
            session.logout().await;
            eprintln!("Logged out");
            Ok(())
        }
        "status" => status(&session),
        "get" => {
            let Some(path) = args.get(1) else {
                bail!("Missing path\n\n{}", USAGE);
            };
            get(&session, path, &args[2..]).await
        }
        "watch" => watch(&session).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(session: &Session, config: &Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    session
        .login(&username, &password)
        .await
        .context("Login failed")?;

    Config::remember_username(&username)?;
    eprintln!("Logged in as {}", username);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No username given");
    }
    Ok(value)
}

fn status(session: &Session) -> Result<()> {
    let expires_at = session
        .access_token()
        .and_then(|t| token::expiry_of(&t))
        .map(|exp| exp.to_rfc3339());

    let report = serde_json::json!({
        "logged_in": session.is_logged_in(),
        "has_token": session.access_token().is_some(),
        "role": session.role(),
        "expires_at": expires_at,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn get(session: &Session, path: &str, params: &[String]) -> Result<()> {
    if session.guard().check_route(path).await == GuardDecision::RedirectToLogin {
        bail!("Not logged in. Run `sessionkeep login` first.");
    }

    let mut request = ApiRequest::get(path);
    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            bail!("Query parameter '{}' is not key=value", param);
        };
        request = request.with_query(key, Some(value));
    }

    let response = session.mediator().send(request).await?;
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    if !session.guard().check().await.is_allowed() {
        bail!("Not logged in. Run `sessionkeep login` first.");
    }

    eprintln!("Keeping session alive, Ctrl-C to stop");
    let mut changes = session.authenticated_stream();
    loop {
        tokio::select! {
            change = changes.next() => match change {
                Some(true) => eprintln!("authenticated"),
                Some(false) => {
                    eprintln!("session ended");
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopped");
                return Ok(());
            }
        }
    }
}
