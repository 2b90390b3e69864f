//! REST API client module for the backend.
//!
//! This module provides the `ApiClient` through which the host application
//! makes every backend call. It attaches the bearer credential, performs the
//! single coordinated renewal on a credential rejection, and classifies
//! failures so server problems reach one global notification sink.

pub mod auth;
pub mod classify;
pub mod client;
pub mod error;
pub mod notify;
pub mod request;

pub use auth::{AuthApi, UserProfile};
pub use classify::FailureClassifier;
pub use client::ApiClient;
pub use error::{ApiError, FailureKind, Unavailable, SERVER_UNAVAILABLE_MESSAGE};
pub use notify::{NotificationSink, NotificationSlot};
pub use request::{ApiRequest, MultipartBody, RequestBody, MAX_CREDENTIAL_RETRIES};
