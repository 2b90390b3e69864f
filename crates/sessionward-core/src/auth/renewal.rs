//! Single-flight renewal of the access credential.
//!
//! [`RenewalCoordinator`] is the state machine: `Idle` or `Renewing` with the
//! continuations registered during the episode. Joining while `Idle` starts an
//! episode; joining while `Renewing` only registers another continuation.
//! Settling hands every continuation the same outcome exactly once.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a renewal episode did not produce a new access credential.
/// Cloned to every continuation of the episode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalFailure {
    #[error("No refresh credential available")]
    NoRefreshCredential,

    #[error("Refresh credential rejected with status {0}")]
    Rejected(u16),

    #[error("Renewal exchange failed: {0}")]
    Exchange(String),

    #[error("Session changed while renewing")]
    Superseded,

    #[error("Renewal stopped before it settled")]
    Abandoned,
}

/// Result of one renewal episode: the new access credential or the failure.
pub type RenewalOutcome = Result<String, RenewalFailure>;

/// A caller suspended until the in-flight episode settles.
pub type PendingContinuation = oneshot::Receiver<RenewalOutcome>;

/// Credentials returned by a successful renewal exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct RenewedTokens {
    pub access: String,
    /// Absent when the backend keeps the existing refresh credential.
    pub refresh: Option<String>,
}

/// The backend renewal exchange.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh: &str) -> Result<RenewedTokens, RenewalFailure>;
}

/// What happened when a caller joined the coordinator.
pub enum Joined {
    /// The coordinator was idle; this caller must run the episode.
    Started(PendingContinuation),
    /// An episode is already running; just wait.
    Waiting(PendingContinuation),
}

enum RenewalState {
    Idle,
    Renewing {
        waiters: Vec<oneshot::Sender<RenewalOutcome>>,
    },
}

pub struct RenewalCoordinator {
    state: Mutex<RenewalState>,
}

impl Default for RenewalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RenewalState::Idle),
        }
    }

    /// Register a continuation. Check and transition happen under one lock,
    /// so two callers can never both see `Idle`.
    pub fn join(&self) -> Joined {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        match &mut *state {
            RenewalState::Idle => {
                *state = RenewalState::Renewing { waiters: vec![tx] };
                Joined::Started(rx)
            }
            RenewalState::Renewing { waiters } => {
                waiters.push(tx);
                Joined::Waiting(rx)
            }
        }
    }

    /// Return to `Idle` and deliver `outcome` to every continuation, in the
    /// order they joined. Returns how many callers were still waiting.
    pub fn settle(&self, outcome: RenewalOutcome) -> usize {
        let waiters = match std::mem::replace(&mut *self.state.lock(), RenewalState::Idle) {
            RenewalState::Renewing { waiters } => waiters,
            RenewalState::Idle => Vec::new(),
        };

        // A closed receiver is a caller that gave up waiting
        waiters
            .into_iter()
            .filter_map(|tx| tx.send(outcome.clone()).ok())
            .count()
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.state.lock(), RenewalState::Renewing { .. })
    }

    /// Continuations registered with the current episode.
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            RenewalState::Renewing { waiters } => waiters.len(),
            RenewalState::Idle => 0,
        }
    }
}

/// Wait for an episode's outcome.
pub async fn wait_for(continuation: PendingContinuation) -> RenewalOutcome {
    continuation.await.unwrap_or(Err(RenewalFailure::Abandoned))
}
