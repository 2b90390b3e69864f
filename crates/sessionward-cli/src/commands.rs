//! CLI commands

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Subcommand;
use sessionward_core::{ApiClient, ApiError, ApiRequest, Config, EndReason, FailureKind, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        /// Account email (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show what is stored for the current backend
    Status,

    /// Show the signed-in user
    Whoami,

    /// Authenticated GET; prints the response body
    Get {
        /// Path relative to the base URL, or an absolute URL
        path: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
    },

    /// Keep the session alive, printing session events until Ctrl-C
    Watch,
}

impl Commands {
    pub async fn execute(self, mut config: Config) -> Result<()> {
        let client = ApiClient::connect(&config)?;
        client.set_notification_sink(|message: &str| eprintln!("! {}", message));

        match self {
            Commands::Login { email } => login(&client, &mut config, email).await,
            Commands::Logout => {
                client.logout().await;
                println!("Signed out.");
                Ok(())
            }
            Commands::Status => {
                status(&client);
                Ok(())
            }
            Commands::Whoami => {
                let me = client.current_user().await?;
                println!("{} <{}> (id {})", me.display_name(), me.email, me.id);
                Ok(())
            }
            Commands::Get { path, query } => get(&client, &path, &query).await,
            Commands::Watch => watch(&client).await,
        }
    }
}

/// True when the failure was already reported through the notification sink.
pub fn already_reported(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ApiError>()
        .map(|e| e.kind() == FailureKind::ServerUnavailable)
        .unwrap_or(false)
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        anyhow::bail!("Email required");
    }
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password required");
    }

    if let Err(e) = client.login(&email, &password).await {
        if e.kind() == FailureKind::OrdinaryFailure {
            return Err(anyhow::Error::new(e).context("Login failed"));
        }
        return Err(e.into());
    }

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match client.current_user().await {
        Ok(me) => println!("Signed in as {}.", me.display_name()),
        Err(e) => {
            warn!(error = %e, "Could not fetch profile after login");
            println!("Signed in.");
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn status(client: &ApiClient) {
    let session = client.session();
    let pair = session.credentials();
    let present = |v: &Option<String>| if v.is_some() { "stored" } else { "none" };

    println!("Backend:   {}", client.base_url());
    println!(
        "Session:   {}",
        if session.is_authenticated() { "signed in" } else { "signed out" }
    );
    println!("Access:    {}", present(&pair.access));
    println!("Refresh:   {}", present(&pair.refresh));
    println!(
        "Renewal:   every {} min ({})",
        session.renewal_interval().as_secs() / 60,
        if session.scheduler_running() { "armed" } else { "idle" }
    );
}

async fn get(client: &ApiClient, path: &str, query: &[String]) -> Result<()> {
    let mut request = ApiRequest::get(path);
    for pair in query {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Query parameter '{}' is not KEY=VALUE", pair))?;
        request = request.query(key, value);
    }

    let response = client.execute(request).await?;
    let text = response.text().await.context("Failed to read response body")?;

    // Pretty-print JSON, pass anything else through
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}

async fn watch(client: &ApiClient) -> Result<()> {
    let session = client.session();
    if !session.is_authenticated() {
        anyhow::bail!("Not signed in. Run `sessionward login` first.");
    }
    let mut events = session.subscribe();
    println!(
        "{} Watching session, renewing every {} min. Ctrl-C to stop.",
        stamp(Utc::now()),
        session.renewal_interval().as_secs() / 60
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Renewed) => {
                    let at = session.last_renewed_at().unwrap_or_else(Utc::now);
                    println!("{} Access credential renewed", stamp(at));
                }
                Ok(SessionEvent::Established) => println!("{} Session established", stamp(Utc::now())),
                Ok(SessionEvent::Ended(reason)) => {
                    println!("{} Session ended: {}", stamp(Utc::now()), describe(&reason));
                    println!("Run `sessionward login` to sign in again.");
                    return Ok(());
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("[%Y-%m-%d %H:%M:%S]").to_string()
}

fn describe(reason: &EndReason) -> String {
    match reason {
        EndReason::Requested => "ended by request".to_string(),
        EndReason::LoggedOut => "signed out".to_string(),
        EndReason::Expired(failure) => format!("expired ({})", failure),
    }
}
