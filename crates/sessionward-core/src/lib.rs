//! Core library for sessionward.
//!
//! Sits in front of every backend call an application makes: attaches the
//! bearer credential, renews it once when many requests find it expired at
//! the same moment, replays the rejected requests, keeps the credential
//! fresh on a timer, and separates "session expired" from "server
//! unavailable" so the host can react to each differently.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use sessionward_core::{ApiClient, Config};
//!
//! let client = ApiClient::connect(&Config::load()?)?;
//! client.set_notification_sink(|message: &str| eprintln!("{message}"));
//! client.login("anna@example.com", "hunter2").await?;
//! let me = client.current_user().await?;
//! println!("signed in as {}", me.display_name());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;

pub use api::{
    ApiClient, ApiError, ApiRequest, FailureKind, MultipartBody, NotificationSink, UserProfile,
    SERVER_UNAVAILABLE_MESSAGE,
};
pub use auth::{
    CredentialPair, CredentialStore, EndReason, RenewalFailure, SessionEvent, SessionManager, TokenStorage,
};
pub use config::{AuthEndpoints, Config, StorageKind};
