//! Authentication module for managing the user's session.
//!
//! This module provides:
//! - `CredentialStore`: access/refresh pair with file, keychain or memory persistence
//! - `RenewalCoordinator`: at most one renewal exchange in flight
//! - `RenewalScheduler`: periodic proactive renewal
//! - `SessionManager`: establish / end the session and glue the above together
//!
//! Renewal runs on a 30 minute heartbeat by default; a rejected request
//! renews on demand between ticks.

pub mod credentials;
pub mod renewal;
pub mod scheduler;
pub mod session;

pub use credentials::{
    CredentialPair, CredentialStore, FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, StorageError,
    TokenStorage,
};
pub use renewal::{
    Joined, PendingContinuation, RenewalCoordinator, RenewalFailure, RenewalOutcome, RenewedTokens, TokenRenewer,
};
pub use scheduler::RenewalScheduler;
pub use session::{EndReason, SessionEvent, SessionManager};
