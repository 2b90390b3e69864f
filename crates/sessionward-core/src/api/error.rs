use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::RenewalFailure;

/// The single user-facing text for every server or network failure.
/// Transport diagnostics stay in the wrapped cause and never reach this string.
pub const SERVER_UNAVAILABLE_MESSAGE: &str =
    "The server ran into a problem. Please try again in a moment.";

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// How a failed exchange should be handled by the rest of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session is gone; the host should send the user back to sign-in.
    AuthenticationExpired,
    /// No response or a server fault; already reported to the notification sink.
    ServerUnavailable,
    /// Any other rejection (validation, not found, ...); the caller handles it.
    OrdinaryFailure,
}

impl FailureKind {
    /// Classify a non-success status that is not being handled as a
    /// credential rejection.
    pub fn of_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            FailureKind::ServerUnavailable
        } else {
            FailureKind::OrdinaryFailure
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session expired - please sign in again")]
    AuthenticationExpired(#[source] RenewalFailure),

    /// Display is always [`SERVER_UNAVAILABLE_MESSAGE`]; the cause keeps the details.
    #[error("{}", SERVER_UNAVAILABLE_MESSAGE)]
    ServerUnavailable(#[source] Unavailable),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The underlying reason a request counted as a server/network failure.
#[derive(Error, Debug)]
pub enum Unavailable {
    #[error("No response from server: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server fault {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::AuthenticationExpired(_) => FailureKind::AuthenticationExpired,
            ApiError::ServerUnavailable(_) => FailureKind::ServerUnavailable,
            ApiError::Rejected { .. } | ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) => {
                FailureKind::OrdinaryFailure
            }
        }
    }

    /// Status of the rejected response, if the failure came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::ServerUnavailable(Unavailable::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}
