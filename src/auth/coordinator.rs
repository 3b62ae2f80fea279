//! Login coordinator.
//!
//! Owns the signed-in session and the (at most one) live login attempt, and
//! funnels every completion signal into the same transitions:
//! - [`AuthCoordinator::handle_callback_url`] for deep links,
//! - the browser session outcome reported by the [`BrowserLauncher`],
//! - link-status checks, both timer-driven and [`AuthCoordinator::manual_check_status`].
//!
//! All state lives behind one `tokio::sync::Mutex`; no lock is held across
//! network I/O. Each attempt is tagged with a generation, and any async result
//! whose generation is no longer live is dropped. Every transition publishes an
//! [`AuthSnapshot`] on a `watch` channel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ibtikar::api::BackendClient;
//! use ibtikar::auth::{AuthCoordinator, FileSessionStore, SystemBrowserLauncher};
//! use ibtikar::config::ClientConfig;
//!
//! # async fn example() -> ibtikar::error::Result<()> {
//! let config = ClientConfig::load()?;
//! let backend = Arc::new(BackendClient::new(&config)?);
//! let coordinator = AuthCoordinator::new(
//!     config,
//!     backend,
//!     Arc::new(SystemBrowserLauncher::new()),
//!     Arc::new(FileSessionStore::new_default()),
//! );
//! let mut updates = coordinator.subscribe();
//! coordinator.start_login().await;
//! let snapshot = updates.wait_for(|s| !s.is_logging_in).await.map(|s| s.clone());
//! println!("{snapshot:?}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backend::AuthBackend;
use super::callback::{parse_callback_url, parse_link_status, CallbackResult, CallbackTarget};
use super::error::AuthError;
use super::identity::{resolve_identity, Identity, ResolvedIdentity};
use super::launcher::{BrowserLauncher, BrowserOutcome, LauncherKind};
use super::session::{
    status_failed_with, status_polling, status_start_failed, AuthSnapshot, LoginState,
    STATUS_CANCELLED, STATUS_CHECKING, STATUS_TIMED_OUT, STATUS_WAITING,
};
use super::store::{SessionStore, StoredSession};
use crate::config::ClientConfig;
use crate::util::timeout::with_timeout;

const STATUS_OPENING: &str = "Opening the sign-in page…";
const STATUS_SIGNING_IN: &str = "Signing you in…";
const STATUS_NOT_LINKED: &str = "Authorization not complete yet";

/// What triggered a link-status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckTrigger {
    Timer,
    Manual,
}

#[derive(Debug)]
struct LoginAttempt {
    id: Uuid,
    generation: u64,
    account_id: i64,
    state: LoginState,
    started_at: DateTime<Utc>,
    poll_attempt_count: u32,
    timed_out: bool,
    resolving: bool,
    authorization_url: Option<String>,
    cancel: CancellationToken,
}

impl LoginAttempt {
    fn new(generation: u64, account_id: i64, state: LoginState) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            account_id,
            state,
            started_at: Utc::now(),
            poll_attempt_count: 0,
            timed_out: false,
            resolving: false,
            authorization_url: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    identity: Option<Identity>,
    degraded: bool,
    feature_active: bool,
    status_message: String,
    generation: u64,
    attempt: Option<LoginAttempt>,
    refreshing: bool,
}

impl Inner {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn live_attempt_mut(&mut self, generation: u64) -> Option<&mut LoginAttempt> {
        self.attempt
            .as_mut()
            .filter(|attempt| attempt.generation == generation)
    }

    /// Drop the live attempt (if any), stop its tasks and retire its generation.
    fn discard_attempt(&mut self) -> Option<LoginAttempt> {
        let attempt = self.attempt.take()?;
        attempt.cancel.cancel();
        self.next_generation();
        Some(attempt)
    }

    /// Whether a non-success outcome may still end the attempt for `generation`.
    ///
    /// Once a confirmed link is resolving its identity, only `cancel_login`
    /// and `logout` can end the attempt.
    fn can_abandon(&mut self, generation: u64) -> bool {
        match self.live_attempt_mut(generation) {
            Some(attempt) if attempt.resolving => {
                tracing::debug!(generation, "link already confirmed, ignoring outcome");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn stored_session(&self) -> Option<StoredSession> {
        self.identity.clone().map(|identity| StoredSession {
            identity,
            degraded: self.degraded,
        })
    }

    fn snapshot(&self) -> AuthSnapshot {
        let state = match (&self.attempt, &self.identity) {
            (Some(attempt), _) => attempt.state,
            (None, Some(_)) => LoginState::Resolved,
            (None, None) => LoginState::Idle,
        };
        AuthSnapshot {
            identity: self.identity.clone(),
            feature_active: self.feature_active,
            is_logging_in: self.attempt.is_some(),
            status_message: self.status_message.clone(),
            state,
            poll_attempt_count: self.attempt.as_ref().map_or(0, |a| a.poll_attempt_count),
            timed_out: self.attempt.as_ref().is_some_and(|a| a.timed_out),
            degraded: self.degraded,
            authorization_url: self
                .attempt
                .as_ref()
                .and_then(|a| a.authorization_url.clone()),
            attempt_started_at: self.attempt.as_ref().map(|a| a.started_at),
        }
    }
}

struct Shared {
    config: ClientConfig,
    backend: Arc<dyn AuthBackend>,
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn SessionStore>,
    target: Option<CallbackTarget>,
    inner: Mutex<Inner>,
    store_io: Mutex<()>,
    snapshot_tx: watch::Sender<AuthSnapshot>,
    snapshot_rx: watch::Receiver<AuthSnapshot>,
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        let _ = self.snapshot_tx.send(inner.snapshot());
    }

    /// Write `session` (or clear the store for `None`).
    ///
    /// Callers take `store_io` while still holding the state lock, so writes
    /// land in transition order without doing disk I/O under that lock.
    fn write_store(&self, session: Option<StoredSession>) {
        let result = match &session {
            Some(session) => self.store.save(session),
            None => self.store.clear(),
        };
        if let Err(error) = result {
            tracing::warn!(error = %error, "failed to update persisted session");
        }
    }
}

/// Drives login attempts and owns the signed-in session.
///
/// Cheap to clone; clones share state. Commands never return errors: outcomes
/// are observed through [`AuthCoordinator::subscribe`].
#[derive(Clone)]
pub struct AuthCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("launcher", &self.shared.launcher.kind())
            .field("snapshot", &*self.shared.snapshot_rx.borrow())
            .finish()
    }
}

impl AuthCoordinator {
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn AuthBackend>,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let target =
            CallbackTarget::from_strings(&config.callback_url, config.web_origin.as_deref());
        if target.is_none() {
            tracing::warn!(
                callback_url = %config.callback_url,
                "callback URL is not a valid URL; deep links will be ignored"
            );
        }
        let (snapshot_tx, snapshot_rx) = watch::channel(AuthSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                config,
                backend,
                launcher,
                store,
                target,
                inner: Mutex::new(Inner::default()),
                store_io: Mutex::new(()),
                snapshot_tx,
                snapshot_rx,
            }),
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.shared.snapshot_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.shared.snapshot_rx.clone()
    }

    pub fn launcher_kind(&self) -> LauncherKind {
        self.shared.launcher.kind()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Load a persisted session. Returns `true` when the user is now logged in.
    pub async fn restore(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if inner.identity.is_some() {
            return true;
        }
        if inner.attempt.is_some() {
            return false;
        }
        match self.shared.store.load() {
            Ok(Some(session)) => {
                tracing::info!(account_id = session.identity.id, "restored session");
                inner.identity = Some(session.identity);
                inner.degraded = session.degraded;
                inner.feature_active = false;
                inner.status_message.clear();
                self.shared.publish(&inner);
                true
            }
            Ok(None) => false,
            Err(error) => {
                tracing::warn!(error = %error, "failed to load persisted session");
                false
            }
        }
    }

    /// Begin a login attempt. No-op while logged in or while an attempt is live.
    pub async fn start_login(&self) {
        let (generation, cancel) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.identity.is_some() || inner.attempt.is_some() {
                tracing::debug!("start_login ignored: already logged in or attempt in progress");
                return;
            }
            let generation = inner.next_generation();
            let attempt = LoginAttempt::new(
                generation,
                self.shared.config.account_id,
                LoginState::AwaitingProviderRedirect,
            );
            tracing::info!(
                attempt_id = %attempt.id,
                generation,
                account_id = attempt.account_id,
                launcher = %self.shared.launcher.kind(),
                "login attempt started"
            );
            let cancel = attempt.cancel.clone();
            inner.attempt = Some(attempt);
            inner.status_message = STATUS_OPENING.to_string();
            self.shared.publish(&inner);
            (generation, cancel)
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_attempt(generation, cancel).await });
    }

    /// Abandon the live attempt. Safe to call at any time, any number of times.
    pub async fn cancel_login(&self) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(attempt) = inner.discard_attempt() {
            tracing::info!(attempt_id = %attempt.id, "login attempt cancelled");
            inner.status_message = STATUS_CANCELLED.to_string();
            self.shared.publish(&inner);
        }
    }

    /// Check link status now, outside the polling timer.
    ///
    /// Works while the browser is opening, while waiting for a callback and
    /// after polling has timed out.
    /// Does not count towards the poll bound.
    pub async fn manual_check_status(&self) {
        let generation = {
            let inner = self.shared.inner.lock().await;
            match &inner.attempt {
                Some(attempt) if attempt.state.accepts_completion() => attempt.generation,
                _ => {
                    tracing::debug!("manual status check ignored: no attempt is waiting");
                    return;
                }
            }
        };
        self.check_status(generation, CheckTrigger::Manual).await;
    }

    /// Sign out: clear identity and feature flag, drop any attempt and the persisted session.
    pub async fn logout(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.discard_attempt();
        inner.next_generation();
        let account_id = inner.identity.take().map(|identity| identity.id);
        inner.degraded = false;
        inner.feature_active = false;
        inner.refreshing = false;
        inner.status_message.clear();
        if let Some(account_id) = account_id {
            tracing::info!(account_id, "logged out");
        }
        self.shared.publish(&inner);

        let _io = self.shared.store_io.lock().await;
        drop(inner);
        self.shared.write_store(None);
    }

    /// Flip the feature flag. Ignored while logged out.
    pub async fn toggle_feature_active(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.identity.is_none() {
            return;
        }
        inner.feature_active = !inner.feature_active;
        self.shared.publish(&inner);
    }

    /// Deliver an inbound deep link.
    ///
    /// URLs that are not the registered callback are ignored, as are callbacks
    /// that arrive when no attempt is waiting for one.
    pub async fn handle_callback_url(&self, url: &str) {
        if !self.is_callback(url) {
            tracing::debug!(url, "ignoring URL that is not the login callback");
            return;
        }
        let generation = {
            let inner = self.shared.inner.lock().await;
            match &inner.attempt {
                Some(attempt) if attempt.state.accepts_completion() => attempt.generation,
                _ => {
                    tracing::debug!("callback ignored: no attempt is waiting for one");
                    return;
                }
            }
        };
        self.apply_callback(generation, parse_callback_url(url)).await;
    }

    /// Complete a login from the URL the host was (re)opened with.
    ///
    /// With a live attempt this behaves like [`Self::handle_callback_url`].
    /// Without one (a web host after a full-page redirect, or a process started
    /// by the deep link) a successful callback starts and resolves an attempt
    /// directly. A URL without callback parameters is ignored.
    pub async fn complete_from_redirect(&self, url: &str) {
        if !self.is_callback(url) {
            return;
        }
        let result = parse_callback_url(url);
        let generation = {
            let mut inner = self.shared.inner.lock().await;
            if inner.identity.is_some() {
                return;
            }
            let live = inner
                .attempt
                .as_ref()
                .map(|attempt| (attempt.generation, attempt.state.accepts_completion()));
            match live {
                Some((generation, true)) => generation,
                Some((_, false)) => return,
                None => match &result {
                    CallbackResult::Success { account_id } => {
                        let generation = inner.next_generation();
                        let attempt =
                            LoginAttempt::new(generation, *account_id, LoginState::AwaitingCallback);
                        tracing::info!(
                            attempt_id = %attempt.id,
                            account_id,
                            "completing login from redirect"
                        );
                        inner.attempt = Some(attempt);
                        self.shared.publish(&inner);
                        generation
                    }
                    CallbackResult::Malformed { code: Some(code) } => {
                        tracing::warn!(code = %code, "login redirect reported an error");
                        inner.status_message = status_failed_with(Some(code));
                        self.shared.publish(&inner);
                        return;
                    }
                    _ => return,
                },
            }
        };
        self.apply_callback(generation, result).await;
    }

    /// Process the URL that launched the host, if any.
    pub async fn handle_initial_url(&self, url: Option<&str>) {
        if let Some(url) = url {
            self.complete_from_redirect(url).await;
        }
    }

    /// Retry profile enrichment for a degraded identity.
    ///
    /// The identity is only replaced by a fresh (non-degraded) profile.
    pub async fn refresh_identity(&self) {
        let (generation, account_id) = {
            let mut inner = self.shared.inner.lock().await;
            let Some(account_id) = inner.identity.as_ref().map(|identity| identity.id) else {
                return;
            };
            if !inner.degraded || inner.refreshing {
                return;
            }
            inner.refreshing = true;
            (inner.generation, account_id)
        };

        let resolved = self.fetch_identity(account_id).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            tracing::debug!(account_id, "discarding identity refresh from a previous session");
            return;
        }
        inner.refreshing = false;
        if resolved.degraded {
            tracing::debug!(account_id, "profile still unavailable, keeping current identity");
            return;
        }
        inner.identity = Some(resolved.identity);
        inner.degraded = false;
        self.shared.publish(&inner);

        let session = inner.stored_session();
        let _io = self.shared.store_io.lock().await;
        drop(inner);
        self.shared.write_store(session);
    }

    fn is_callback(&self, url: &str) -> bool {
        self.shared
            .target
            .as_ref()
            .is_some_and(|target| target.matches_str(url))
    }

    async fn fetch_identity(&self, account_id: i64) -> ResolvedIdentity {
        resolve_identity(
            self.shared.backend.as_ref(),
            account_id,
            self.shared.config.request_timeout,
        )
        .await
    }

    async fn run_attempt(self, generation: u64, cancel: CancellationToken) {
        let shared = &self.shared;
        let account_id = shared.config.account_id;

        let started = tokio::select! {
            _ = cancel.cancelled() => return,
            result = with_timeout::<_, AuthError>(
                shared.config.request_timeout,
                shared.backend.start_authorization(account_id),
            ) => result,
        };
        let url = match started {
            Ok(url) => url,
            Err(error) => return self.fail_start(generation, error).await,
        };
        {
            let mut inner = shared.inner.lock().await;
            let Some(attempt) = inner.live_attempt_mut(generation) else {
                return;
            };
            attempt.authorization_url = Some(url.clone());
            shared.publish(&inner);
        }

        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.launcher.open(&url, &shared.config.callback_url) => result,
        };
        let session = match opened {
            Ok(session) => session,
            Err(error) => return self.fail_start(generation, error).await,
        };
        {
            let mut inner = shared.inner.lock().await;
            let Some(attempt) = inner.live_attempt_mut(generation) else {
                return;
            };
            if attempt.resolving {
                return;
            }
            attempt.state = LoginState::AwaitingCallback;
            inner.status_message = STATUS_WAITING.to_string();
            shared.publish(&inner);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = session.finished() => outcome,
        };
        tracing::debug!(generation, ?outcome, "browser session finished");
        match outcome {
            BrowserOutcome::Callback(url) if self.is_callback(&url) => {
                self.apply_callback(generation, parse_callback_url(&url)).await;
            }
            BrowserOutcome::Callback(_) | BrowserOutcome::Dismissed => {
                self.poll_link_status(generation, cancel).await;
            }
            BrowserOutcome::Cancelled => {
                let mut inner = shared.inner.lock().await;
                if inner.can_abandon(generation) {
                    inner.discard_attempt();
                    inner.status_message = STATUS_CANCELLED.to_string();
                    shared.publish(&inner);
                }
            }
            BrowserOutcome::HandedOff => {}
        }
    }

    async fn fail_start(&self, generation: u64, error: AuthError) {
        tracing::warn!(generation, error = %error, "could not start login");
        let mut inner = self.shared.inner.lock().await;
        if inner.can_abandon(generation) {
            inner.discard_attempt();
            inner.status_message = status_start_failed(&error);
            self.shared.publish(&inner);
        }
    }

    async fn apply_callback(&self, generation: u64, result: CallbackResult) {
        match result {
            CallbackResult::Success { account_id } => self.resolve(generation, account_id).await,
            CallbackResult::Pending => {}
            CallbackResult::Denied => {
                let mut inner = self.shared.inner.lock().await;
                if inner.can_abandon(generation) {
                    tracing::info!(generation, "user declined authorization");
                    inner.discard_attempt();
                    inner.status_message.clear();
                    self.shared.publish(&inner);
                }
            }
            CallbackResult::Malformed { code } => {
                let mut inner = self.shared.inner.lock().await;
                if inner.can_abandon(generation) {
                    tracing::warn!(generation, code = ?code, "malformed login callback");
                    inner.discard_attempt();
                    inner.status_message = status_failed_with(code.as_deref());
                    self.shared.publish(&inner);
                }
            }
        }
    }

    async fn poll_link_status(&self, generation: u64, cancel: CancellationToken) {
        {
            let mut inner = self.shared.inner.lock().await;
            let Some(attempt) = inner.live_attempt_mut(generation) else {
                return;
            };
            if attempt.resolving {
                return;
            }
            attempt.state = LoginState::Polling;
            attempt.poll_attempt_count = 0;
            attempt.timed_out = false;
            inner.status_message = STATUS_CHECKING.to_string();
            self.shared.publish(&inner);
        }

        let interval = self.shared.config.poll_interval;
        while self.check_status(generation, CheckTrigger::Timer).await {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::debug!(generation, "polling stopped");
    }

    /// One link-status check. Returns whether the timer should keep going.
    async fn check_status(&self, generation: u64, trigger: CheckTrigger) -> bool {
        let max_attempts = self.shared.config.max_poll_attempts;
        let (account_id, cancel) = {
            let mut inner = self.shared.inner.lock().await;
            let Some(attempt) = inner.live_attempt_mut(generation) else {
                return false;
            };
            if attempt.resolving {
                return true;
            }
            if trigger == CheckTrigger::Timer && attempt.timed_out {
                return false;
            }
            let account_id = attempt.account_id;
            let cancel = attempt.cancel.clone();
            if trigger == CheckTrigger::Timer {
                attempt.poll_attempt_count += 1;
                let count = attempt.poll_attempt_count;
                inner.status_message = status_polling(count, max_attempts);
                self.shared.publish(&inner);
            }
            (account_id, cancel)
        };

        let checked = tokio::select! {
            _ = cancel.cancelled() => return false,
            result = with_timeout::<_, AuthError>(
                self.shared.config.request_timeout,
                self.shared.backend.link_status(account_id),
            ) => result,
        };
        match checked.map(|status| parse_link_status(&status, account_id)) {
            Ok(CallbackResult::Success { account_id }) => {
                tracing::info!(generation, account_id, ?trigger, "account linked");
                self.resolve(generation, account_id).await;
                return false;
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(generation, ?trigger, error = %error, "link status check failed");
            }
        }

        let mut inner = self.shared.inner.lock().await;
        let Some(attempt) = inner.live_attempt_mut(generation) else {
            return false;
        };
        if attempt.resolving {
            return false;
        }
        match trigger {
            CheckTrigger::Timer if attempt.poll_attempt_count >= max_attempts => {
                tracing::info!(generation, max_attempts, "polling timed out, waiting for manual check");
                attempt.timed_out = true;
                inner.status_message = STATUS_TIMED_OUT.to_string();
                self.shared.publish(&inner);
                false
            }
            CheckTrigger::Timer => true,
            CheckTrigger::Manual => {
                if !attempt.timed_out {
                    inner.status_message = STATUS_NOT_LINKED.to_string();
                    self.shared.publish(&inner);
                }
                true
            }
        }
    }

    /// Resolve the identity for a linked account and finish the attempt.
    ///
    /// First resolution wins; a second one for the same attempt is a no-op.
    async fn resolve(&self, generation: u64, account_id: i64) {
        let cancel = {
            let mut inner = self.shared.inner.lock().await;
            if inner
                .identity
                .as_ref()
                .is_some_and(|identity| identity.id == account_id)
            {
                return;
            }
            let Some(attempt) = inner.live_attempt_mut(generation) else {
                tracing::debug!(generation, "ignoring result for a finished attempt");
                return;
            };
            if attempt.resolving {
                return;
            }
            attempt.resolving = true;
            let cancel = attempt.cancel.clone();
            inner.status_message = STATUS_SIGNING_IN.to_string();
            self.shared.publish(&inner);
            cancel
        };

        let resolved = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(generation, "identity resolution superseded");
                return;
            }
            resolved = self.fetch_identity(account_id) => resolved,
        };

        let mut inner = self.shared.inner.lock().await;
        if inner.live_attempt_mut(generation).is_none() {
            tracing::debug!(generation, "discarding stale identity");
            return;
        }
        if let Some(attempt) = inner.discard_attempt() {
            let elapsed = Utc::now() - attempt.started_at;
            tracing::info!(
                attempt_id = %attempt.id,
                account_id,
                degraded = resolved.degraded,
                elapsed_ms = elapsed.num_milliseconds(),
                "login complete"
            );
        }
        inner.identity = Some(resolved.identity);
        inner.degraded = resolved.degraded;
        inner.feature_active = false;
        inner.status_message.clear();
        self.shared.publish(&inner);

        let session = inner.stored_session();
        let _io = self.shared.store_io.lock().await;
        drop(inner);
        self.shared.write_store(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::callback::LinkStatus;
    use crate::auth::identity::IdentityFetch;
    use crate::auth::launcher::{BrowserSession, SystemBrowserLauncher};
    use crate::auth::store::MemorySessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Unlinked {
        status_calls: AtomicU32,
    }

    #[async_trait]
    impl AuthBackend for Unlinked {
        async fn start_authorization(&self, account_id: i64) -> Result<String, AuthError> {
            Ok(format!("https://backend.test/v1/oauth/x/start?user_id={account_id}"))
        }

        async fn link_status(&self, _account_id: i64) -> Result<LinkStatus, AuthError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(LinkStatus {
                user_id: None,
                linked: false,
                scopes: None,
            })
        }

        async fn fetch_identity(&self, _account_id: i64) -> Result<IdentityFetch, AuthError> {
            Ok(IdentityFetch::default())
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl BrowserLauncher for FailingLauncher {
        fn kind(&self) -> LauncherKind {
            LauncherKind::SystemBrowser
        }

        async fn open(&self, _url: &str, _callback_url: &str) -> Result<BrowserSession, AuthError> {
            Err(AuthError::Browser("no browser".into()))
        }
    }

    /// Launcher whose `open` never returns, like an opener waiting on the browser.
    struct StalledLauncher;

    #[async_trait]
    impl BrowserLauncher for StalledLauncher {
        fn kind(&self) -> LauncherKind {
            LauncherKind::SystemBrowser
        }

        async fn open(&self, _url: &str, _callback_url: &str) -> Result<BrowserSession, AuthError> {
            std::future::pending().await
        }
    }

    /// Records, for every write, whether the state lock was free at the time.
    #[derive(Default)]
    struct LockCheckingStore {
        shared: std::sync::OnceLock<std::sync::Weak<Shared>>,
        writes: std::sync::Mutex<Vec<bool>>,
    }

    impl LockCheckingStore {
        fn record(&self) {
            let free = self
                .shared
                .get()
                .and_then(std::sync::Weak::upgrade)
                .is_some_and(|shared| shared.inner.try_lock().is_ok());
            self.writes.lock().unwrap().push(free);
        }
    }

    impl SessionStore for LockCheckingStore {
        fn load(&self) -> Result<Option<StoredSession>, AuthError> {
            Ok(None)
        }

        fn save(&self, _session: &StoredSession) -> Result<(), AuthError> {
            self.record();
            Ok(())
        }

        fn clear(&self) -> Result<(), AuthError> {
            self.record();
            Ok(())
        }
    }

    fn coordinator(launcher: Arc<dyn BrowserLauncher>) -> (AuthCoordinator, Arc<Unlinked>) {
        let backend = Arc::new(Unlinked {
            status_calls: AtomicU32::new(0),
        });
        let config = ClientConfig::default().with_max_poll_attempts(2);
        let coordinator = AuthCoordinator::new(
            config,
            backend.clone(),
            launcher,
            Arc::new(MemorySessionStore::new()),
        );
        (coordinator, backend)
    }

    #[tokio::test]
    async fn toggle_is_ignored_while_logged_out() {
        let (coordinator, _) = coordinator(Arc::new(SystemBrowserLauncher::manual()));
        coordinator.toggle_feature_active().await;
        assert!(!coordinator.snapshot().feature_active);
    }

    #[tokio::test]
    async fn launcher_failure_returns_to_idle_with_status() {
        let (coordinator, _) = coordinator(Arc::new(FailingLauncher));
        let mut rx = coordinator.subscribe();
        coordinator.start_login().await;
        let snapshot = rx
            .wait_for(|s| !s.is_logging_in && !s.status_message.is_empty() && s.status_message != STATUS_OPENING)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.state, LoginState::Idle);
        assert_eq!(snapshot.status_message, "Could not start login: Browser error: no browser");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_poll_bound_waits_for_manual_check() {
        let (coordinator, backend) = coordinator(Arc::new(SystemBrowserLauncher::manual()));
        let mut rx = coordinator.subscribe();
        coordinator.start_login().await;
        let snapshot = rx.wait_for(|s| s.timed_out).await.unwrap().clone();
        assert_eq!(snapshot.state, LoginState::Polling);
        assert_eq!(snapshot.poll_attempt_count, 2);
        assert_eq!(snapshot.status_message, STATUS_TIMED_OUT);

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 2);

        coordinator.manual_check_status().await;
        assert_eq!(backend.status_calls.load(Ordering::SeqCst), 3);
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.poll_attempt_count, 2);
        assert!(snapshot.timed_out);
    }

    #[tokio::test]
    async fn callbacks_without_attempt_are_ignored() {
        let (coordinator, _) = coordinator(Arc::new(SystemBrowserLauncher::manual()));
        coordinator
            .handle_callback_url("ibtikar://oauth/callback?success=true&user_id=1")
            .await;
        let snapshot = coordinator.snapshot();
        assert!(snapshot.identity.is_none());
        assert_eq!(snapshot.state, LoginState::Idle);
    }

    #[tokio::test]
    async fn redirect_without_params_is_ignored() {
        let config = ClientConfig::default().with_web_origin("http://localhost:8081");
        let coordinator = AuthCoordinator::new(
            config,
            Arc::new(Unlinked {
                status_calls: AtomicU32::new(0),
            }),
            Arc::new(SystemBrowserLauncher::manual()),
            Arc::new(MemorySessionStore::new()),
        );
        coordinator.complete_from_redirect("http://localhost:8081/").await;
        assert_eq!(coordinator.snapshot(), AuthSnapshot::default());

        coordinator
            .complete_from_redirect("http://localhost:8081/?error=token_exchange_failed")
            .await;
        assert_eq!(
            coordinator.snapshot().status_message,
            "Login failed, please retry (token_exchange_failed)"
        );
    }

    #[tokio::test]
    async fn callback_lands_while_browser_is_still_opening() {
        let (coordinator, _) = coordinator(Arc::new(StalledLauncher));
        let mut rx = coordinator.subscribe();
        coordinator.start_login().await;
        let opening = rx
            .wait_for(|s| s.authorization_url.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(opening.state, LoginState::AwaitingProviderRedirect);

        coordinator
            .handle_callback_url("ibtikar://oauth/callback?success=true&user_id=1")
            .await;

        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.identity.map(|identity| identity.id), Some(1));
        assert_eq!(snapshot.state, LoginState::Resolved);
        assert!(!snapshot.is_logging_in);
    }

    #[tokio::test]
    async fn store_writes_happen_outside_the_state_lock() {
        let store = Arc::new(LockCheckingStore::default());
        let coordinator = AuthCoordinator::new(
            ClientConfig::default(),
            Arc::new(Unlinked {
                status_calls: AtomicU32::new(0),
            }),
            Arc::new(SystemBrowserLauncher::manual()),
            store.clone(),
        );
        let _ = store.shared.set(Arc::downgrade(&coordinator.shared));

        coordinator
            .complete_from_redirect("ibtikar://oauth/callback?success=true&user_id=1")
            .await;
        assert!(coordinator.snapshot().identity.is_some());
        coordinator.logout().await;

        assert_eq!(*store.writes.lock().unwrap(), vec![true, true]);
    }
}
