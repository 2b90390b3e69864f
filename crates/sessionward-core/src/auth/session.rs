use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::credentials::{CredentialPair, CredentialStore};
use super::renewal::{wait_for, Joined, RenewalCoordinator, RenewalFailure, TokenRenewer};
use super::scheduler::RenewalScheduler;

/// Capacity of the session event channel; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `end_session` was called directly.
    Requested,
    /// The user signed out.
    LoggedOut,
    /// Renewal was impossible or failed.
    Expired(RenewalFailure),
}

/// Lifecycle notifications for the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established,
    Renewed,
    /// The host should navigate to its unauthenticated entry point.
    Ended(EndReason),
}

/// Owner of the credential store, the renewal state machine and the
/// auto-renewal timer. Clone is cheap and every clone shares one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    store: CredentialStore,
    coordinator: RenewalCoordinator,
    scheduler: RenewalScheduler,
    renewer: Arc<dyn TokenRenewer>,
    renewal_interval: Duration,
    events: broadcast::Sender<SessionEvent>,
    /// Bumped whenever the credential lineage changes (establish / end).
    /// Held across every store write or clear and scheduler change, so a
    /// renewal started before the change cannot write into the new session
    /// and an ended session cannot be revived.
    lineage: Mutex<u64>,
    active: AtomicBool,
    last_renewed_at: Mutex<Option<DateTime<Utc>>>,
}

impl SessionManager {
    /// Create the session around an opened store. If the store already holds
    /// a refresh credential the renewal timer is armed immediately, so this
    /// must be called from within a Tokio runtime.
    pub fn new(store: CredentialStore, renewer: Arc<dyn TokenRenewer>, renewal_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let active = !store.read().is_empty();
        let inner = Arc::new(SessionInner {
            store,
            coordinator: RenewalCoordinator::new(),
            scheduler: RenewalScheduler::new(),
            renewer,
            renewal_interval,
            events,
            lineage: Mutex::new(0),
            active: AtomicBool::new(active),
            last_renewed_at: Mutex::new(None),
        });

        if inner.store.has_refresh() {
            info!("Resuming persisted session");
            inner.arm_scheduler();
        }

        Self { inner }
    }

    /// Start a session with freshly issued credentials (e.g. after login).
    pub fn establish(&self, pair: CredentialPair) {
        {
            let mut lineage = self.inner.lineage.lock();
            *lineage += 1;
            self.inner.write_credentials(pair);
            self.inner.active.store(true, Ordering::SeqCst);
        }
        info!("Session established");
        let _ = self.inner.events.send(SessionEvent::Established);
    }

    /// Clear credentials, stop the timer and tell the host the session is
    /// over. Calling it again is a no-op apart from re-clearing the store.
    pub fn end_session(&self) {
        self.inner.end_with(EndReason::Requested);
    }

    pub(crate) fn end_with(&self, reason: EndReason) {
        self.inner.end_with(reason);
    }

    /// Get a new access credential, sharing any renewal already in flight.
    pub async fn ensure_fresh_credential(&self) -> Result<String, RenewalFailure> {
        self.inner.ensure_fresh_credential().await
    }

    pub fn credentials(&self) -> CredentialPair {
        self.inner.store.read()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.store.access()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.inner.store.read().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn scheduler_running(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    pub fn is_renewing(&self) -> bool {
        self.inner.coordinator.is_renewing()
    }

    /// Callers waiting on the in-flight renewal, including the one that started it.
    pub fn pending_continuations(&self) -> usize {
        self.inner.coordinator.pending()
    }

    pub fn last_renewed_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_renewed_at.lock()
    }

    pub fn renewal_interval(&self) -> Duration {
        self.inner.renewal_interval
    }
}

impl SessionInner {
    /// The only write path into the store. A refresh credential keeps the
    /// renewal timer running.
    fn write_credentials(self: &Arc<Self>, pair: CredentialPair) {
        let merged = self.store.write(pair);
        if merged.refresh.is_some() {
            self.arm_scheduler();
        }
    }

    fn arm_scheduler(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        self.scheduler
            .start(self.renewal_interval, move || Self::on_tick(&session));
    }

    fn on_tick(session: &Weak<Self>) -> ControlFlow<()> {
        let Some(inner) = session.upgrade() else {
            return ControlFlow::Break(());
        };
        if !inner.store.has_refresh() {
            debug!("Renewal tick without a refresh credential, skipping");
            return ControlFlow::Continue(());
        }

        // Detached: a successful renewal re-arms the timer, which must not
        // cancel the renewal itself.
        tokio::spawn(async move {
            debug!("Scheduled renewal");
            if let Err(e) = inner.ensure_fresh_credential().await {
                warn!(error = %e, "Scheduled renewal failed");
            }
        });
        ControlFlow::Continue(())
    }

    async fn ensure_fresh_credential(self: &Arc<Self>) -> Result<String, RenewalFailure> {
        let continuation = match self.coordinator.join() {
            Joined::Waiting(rx) => {
                debug!("Renewal already in flight, waiting");
                rx
            }
            Joined::Started(rx) => {
                let episode = {
                    let lineage = self.lineage.lock();
                    self.store.refresh().map(|refresh| (refresh, *lineage))
                };
                match episode {
                    Some((refresh, generation)) => {
                        tokio::spawn(Arc::clone(self).run_episode(refresh, generation));
                    }
                    None => {
                        debug!("No refresh credential, ending session");
                        let failure = RenewalFailure::NoRefreshCredential;
                        self.coordinator.settle(Err(failure.clone()));
                        self.end_with(EndReason::Expired(failure));
                    }
                }
                rx
            }
        };

        wait_for(continuation).await
    }

    /// One renewal exchange and its settlement. Runs as its own task so the
    /// exchange completes and waiters settle even if the caller that started
    /// it goes away.
    async fn run_episode(self: Arc<Self>, refresh: String, generation: u64) {
        info!("Renewing access credential");
        let result = self.renewer.renew(&refresh).await;

        let mut lineage = self.lineage.lock();
        if *lineage != generation {
            // A session established meanwhile answers for itself; an ended one does not
            let outcome = self.store.access().ok_or(RenewalFailure::Superseded);
            debug!(resumed_with_current = outcome.is_ok(), "Session changed during renewal, discarding result");
            self.coordinator.settle(outcome);
            return;
        }

        match result {
            Ok(renewed) => {
                self.write_credentials(CredentialPair {
                    access: Some(renewed.access.clone()),
                    refresh: Some(renewed.refresh.unwrap_or(refresh)),
                });
                *self.last_renewed_at.lock() = Some(Utc::now());
                let resumed = self.coordinator.settle(Ok(renewed.access));
                drop(lineage);
                debug!(resumed, "Access credential renewed");
                let _ = self.events.send(SessionEvent::Renewed);
            }
            Err(failure) => {
                warn!(error = %failure, "Renewal failed");
                // Waiters settle before the session is torn down
                self.coordinator.settle(Err(failure.clone()));
                self.end_locked(&mut lineage, EndReason::Expired(failure));
            }
        }
    }

    fn end_with(&self, reason: EndReason) {
        let mut lineage = self.lineage.lock();
        self.end_locked(&mut lineage, reason);
    }

    fn end_locked(&self, lineage: &mut u64, reason: EndReason) {
        *lineage += 1;
        self.scheduler.stop();
        self.store.clear();

        if self.active.swap(false, Ordering::SeqCst) {
            info!(reason = ?reason, "Session ended");
            let _ = self.events.send(SessionEvent::Ended(reason));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
