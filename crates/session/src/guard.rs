//! Session guard: decides whether the viewer may reach protected screens and
//! keeps that decision fresh.
//!
//! Entry transition (run on mount and on every probe):
//! 1. no stored token → `Unauthorized(NoSession)`, no network call;
//! 2. token locally expired (undecodable counts) → purge → `Unauthorized(Expired)`,
//!    no network call;
//! 3. otherwise the remote validator decides.
//!
//! Every failure resolves to `Unauthorized`; nothing crosses the public
//! boundary as an error. At most one check runs at a time, and once the guard
//! is torn down, late results are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cvai_auth::{Clock, ExpiryVerdict, SystemClock, decode_claims, evaluate};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SessionConfig;
use crate::store::{SessionStore, purge_session, read_token};
use crate::validator::{TokenValidator, Validation};

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub const SIGN_IN_REQUIRED_MESSAGE: &str = "Please sign in to continue.";

/// Coarse session validity, derived from the guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    /// Never logged in (or logged out).
    NoSession,
    /// The stored token expired (or could not be decoded).
    Expired,
    /// The server refused the token (401, 422 or another status).
    Rejected,
    /// The server could not be reached; the stored token is kept.
    Unreachable,
}

impl UnauthorizedReason {
    /// User-facing message carried by the redirect. "Never logged in" is silent.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            UnauthorizedReason::NoSession => None,
            UnauthorizedReason::Expired => Some(SESSION_EXPIRED_MESSAGE),
            UnauthorizedReason::Rejected | UnauthorizedReason::Unreachable => {
                Some(SIGN_IN_REQUIRED_MESSAGE)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Authorized,
    Unauthorized(UnauthorizedReason),
}

impl GuardState {
    pub fn session_state(&self) -> SessionState {
        match self {
            GuardState::Checking => SessionState::Unknown,
            GuardState::Authorized => SessionState::Valid,
            GuardState::Unauthorized(_) => SessionState::Invalid,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, GuardState::Authorized)
    }
}

/// Navigation request emitted on a transition into `Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    pub reason: Option<String>,
    /// Protected route to return to after signing in.
    pub from: Option<String>,
}

impl Redirect {
    pub fn to_sign_in(sign_in_path: &str, reason: UnauthorizedReason) -> Self {
        Self {
            to: sign_in_path.to_string(),
            reason: reason.message().map(str::to_string),
            from: None,
        }
    }

    pub fn returning_to(mut self, route: Option<String>) -> Self {
        self.from = route;
        self
    }
}

/// Side-effect sink for redirects (the router in a UI shell).
pub trait Navigator: Send + Sync {
    fn redirect(&self, redirect: Redirect);
}

/// [`Navigator`] forwarding redirects to an event loop over a channel.
#[derive(Debug, Clone)]
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<Redirect>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Redirect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn redirect(&self, redirect: Redirect) {
        if self.tx.send(redirect).is_err() {
            tracing::debug!("redirect dropped; navigator receiver is gone");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOptions {
    pub sign_in_path: String,
    pub probe_interval: Duration,
    pub require_user: bool,
    /// Route this guard protects, carried on redirects as `from`.
    pub protected_route: Option<String>,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for GuardOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            sign_in_path: config.sign_in_path.clone(),
            probe_interval: config.probe_interval,
            require_user: config.require_user,
            protected_route: None,
        }
    }
}

pub struct SessionGuard {
    store: Arc<dyn SessionStore>,
    validator: Arc<dyn TokenValidator>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    options: GuardOptions,
    /// Held for the duration of a check; serializes checks.
    in_flight: Mutex<()>,
    torn_down: AtomicBool,
    state: watch::Sender<GuardState>,
}

impl SessionGuard {
    pub fn new(
        store: Arc<dyn SessionStore>,
        validator: Arc<dyn TokenValidator>,
        navigator: Arc<dyn Navigator>,
        options: GuardOptions,
    ) -> Self {
        let (state, _) = watch::channel(GuardState::Checking);
        Self {
            store,
            validator,
            navigator,
            clock: Arc::new(SystemClock),
            options,
            in_flight: Mutex::new(()),
            torn_down: AtomicBool::new(false),
            state,
        }
    }

    /// Replace the time source used for local expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> GuardState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<GuardState> {
        self.state.subscribe()
    }

    pub fn options(&self) -> &GuardOptions {
        &self.options
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Run the entry transition, waiting for any check already in flight.
    ///
    /// Returns the guard state once the check settles (unchanged if the guard
    /// was torn down meanwhile).
    pub async fn check(&self) -> GuardState {
        let _in_flight = self.in_flight.lock().await;
        self.run_check().await
    }

    /// Run the entry transition unless a check is already in flight, in which
    /// case nothing is started and `None` is returned.
    pub async fn check_if_idle(&self) -> Option<GuardState> {
        let _in_flight = self.in_flight.try_lock().ok()?;
        Some(self.run_check().await)
    }

    /// Spawn the probe task: check now, then every `probe_interval` while
    /// authorized. The task ends on the first unauthorized outcome or when the
    /// returned handle is cancelled or dropped.
    pub fn start(self: Arc<Self>) -> GuardHandle {
        let shutdown = Arc::new(Notify::new());
        let guard = self.clone();
        let task_shutdown = shutdown.clone();

        let task = tokio::spawn(async move {
            tracing::debug!("session probe started");

            let mut probe = tokio::time::interval(guard.options.probe_interval);
            probe.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_shutdown.notified() => {
                        tracing::debug!("session probe received shutdown signal");
                        break;
                    }
                    _ = probe.tick() => {
                        if guard.is_torn_down() {
                            break;
                        }
                        match guard.check_if_idle().await {
                            None => {
                                tracing::debug!("skipping probe; a session check is still in flight");
                            }
                            Some(GuardState::Authorized) => {}
                            Some(GuardState::Checking) => {
                                // Result discarded (torn down mid-check).
                                break;
                            }
                            Some(GuardState::Unauthorized(reason)) => {
                                tracing::debug!(?reason, "session probe stopping; viewer is unauthorized");
                                break;
                            }
                        }
                    }
                }
            }

            tracing::debug!("session probe stopped");
        });

        GuardHandle {
            guard: self,
            shutdown,
            task: Some(task),
        }
    }

    /// Mark the guard torn down: later transitions and redirects are dropped.
    pub fn tear_down(&self) {
        // Flip the flag under the state lock so no transition can interleave.
        self.state.send_if_modified(|_| {
            self.torn_down.store(true, Ordering::SeqCst);
            false
        });
    }

    async fn run_check(&self) -> GuardState {
        if self.is_torn_down() {
            return self.state();
        }

        let next = self.entry_transition().await;

        if self.is_torn_down() {
            tracing::debug!(?next, "session check settled after teardown; discarding result");
            return self.state();
        }

        self.apply(next);
        self.state()
    }

    async fn entry_transition(&self) -> GuardState {
        let token = match read_token(self.store.as_ref()).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::debug!("no stored session token");
                return GuardState::Unauthorized(UnauthorizedReason::NoSession);
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to read session storage; treating as signed out");
                return GuardState::Unauthorized(UnauthorizedReason::NoSession);
            }
        };

        if self.options.require_user {
            match self.store.get(crate::store::USER_KEY).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!("session token present without a user record");
                    return GuardState::Unauthorized(UnauthorizedReason::NoSession);
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read user record; treating as signed out");
                    return GuardState::Unauthorized(UnauthorizedReason::NoSession);
                }
            }
        }

        let now = self.clock.now();
        let verdict = match decode_claims(&token) {
            Ok(claims) => evaluate(&claims, now),
            Err(err) => {
                tracing::debug!(error = %err, "stored session token is malformed");
                ExpiryVerdict::Malformed
            }
        };

        if verdict.is_expired() {
            if self.is_torn_down() {
                tracing::debug!(?verdict, "guard torn down; leaving expired session in storage");
                return GuardState::Unauthorized(UnauthorizedReason::Expired);
            }
            tracing::info!(?verdict, "session token expired; purging stored session");
            if let Err(err) = purge_session(self.store.as_ref()).await {
                tracing::error!(error = %err, "failed to purge expired session");
            }
            return GuardState::Unauthorized(UnauthorizedReason::Expired);
        }

        match self.validator.validate(&token).await {
            Validation::Valid => GuardState::Authorized,
            Validation::Rejected(rejection) => {
                tracing::info!(?rejection, "server rejected session token");
                GuardState::Unauthorized(UnauthorizedReason::Rejected)
            }
            Validation::Unreachable(reason) => {
                tracing::info!(%reason, "session validation unreachable; keeping stored token");
                GuardState::Unauthorized(UnauthorizedReason::Unreachable)
            }
        }
    }

    fn apply(&self, next: GuardState) {
        let mut redirect = None;
        let changed = self.state.send_if_modified(|current| {
            if self.torn_down.load(Ordering::SeqCst) || *current == next {
                return false;
            }
            if let GuardState::Unauthorized(reason) = next {
                redirect = Some(
                    Redirect::to_sign_in(&self.options.sign_in_path, reason)
                        .returning_to(self.options.protected_route.clone()),
                );
            }
            *current = next;
            true
        });

        if changed {
            match next {
                GuardState::Authorized => tracing::info!("session authorized"),
                GuardState::Unauthorized(reason) => {
                    tracing::info!(?reason, "session unauthorized")
                }
                GuardState::Checking => {}
            }
        }

        if let Some(redirect) = redirect {
            self.navigator.redirect(redirect);
        }
    }
}

/// Cancellation handle for a started guard. Dropping it cancels the probe.
pub struct GuardHandle {
    guard: Arc<SessionGuard>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl GuardHandle {
    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    /// Stop the timer and discard any check that settles afterwards.
    pub fn cancel(&self) {
        self.guard.tear_down();
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the probe task to exit (it exits on its own once unauthorized).
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "session probe task failed");
            }
        }
    }

    /// Cancel, then wait for the probe task to exit.
    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
