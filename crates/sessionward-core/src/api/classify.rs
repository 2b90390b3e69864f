//! Failure classification for completed or failed exchanges.

use reqwest::Response;
use tracing::{debug, warn};

use super::error::{ApiError, FailureKind, Unavailable, SERVER_UNAVAILABLE_MESSAGE};
use super::notify::NotificationSlot;

/// Splits failures into server/network problems (escalated to the
/// notification sink) and ordinary rejections (returned untouched).
/// Credential rejections are handled by the pipeline before this runs.
#[derive(Clone, Default)]
pub struct FailureClassifier {
    notifications: NotificationSlot,
}

impl FailureClassifier {
    pub fn new(notifications: NotificationSlot) -> Self {
        Self { notifications }
    }

    pub fn notifications(&self) -> &NotificationSlot {
        &self.notifications
    }

    /// Pass a successful response through, classify anything else.
    pub async fn check(&self, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, status = status.as_u16(), path = %url, "Failed to read error body");
                String::new()
            }
        };
        let body = ApiError::truncate_body(&body);

        match FailureKind::of_status(status) {
            FailureKind::ServerUnavailable => {
                warn!(status = status.as_u16(), path = %url, "Server fault");
                Err(self.escalate(Unavailable::Status { status, body }))
            }
            _ => {
                debug!(status = status.as_u16(), path = %url, "Request rejected");
                Err(ApiError::Rejected { status, body })
            }
        }
    }

    /// No response was received at all.
    pub fn transport(&self, err: reqwest::Error) -> ApiError {
        warn!(error = %err, timeout = err.is_timeout(), "Request failed without a response");
        self.escalate(Unavailable::Transport(err))
    }

    fn escalate(&self, cause: Unavailable) -> ApiError {
        self.notifications.notify(SERVER_UNAVAILABLE_MESSAGE);
        ApiError::ServerUnavailable(cause)
    }
}
