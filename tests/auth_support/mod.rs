#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch, Notify};

use ibtikar::auth::{
    AuthBackend, AuthCoordinator, AuthError, AuthSnapshot, BrowserLauncher, BrowserOutcome,
    BrowserSession, IdentityFetch, LauncherKind, LinkStatus, MemorySessionStore, Profile,
};
use ibtikar::config::ClientConfig;

pub const CALLBACK_OK: &str = "ibtikar://oauth/callback?success=true&user_id=1";
pub const CALLBACK_DENIED: &str = "ibtikar://oauth/callback?error=access_denied";

/// One scripted identity response.
#[derive(Clone)]
pub enum IdentityReply {
    Fetch(IdentityFetch),
    Fail(String),
}

pub fn profile(name: &str, username: &str) -> Profile {
    Profile {
        id: "1234567890".to_string(),
        name: name.to_string(),
        username: Some(username.to_string()),
        profile_image_url: Some(format!("https://pbs.example/{username}.png")),
    }
}

pub fn fresh(name: &str, username: &str) -> IdentityReply {
    IdentityReply::Fetch(IdentityFetch {
        data: Some(profile(name, username)),
        ..Default::default()
    })
}

pub fn cached(name: &str, username: &str) -> IdentityReply {
    IdentityReply::Fetch(IdentityFetch {
        data: Some(profile(name, username)),
        rate_limited: true,
        cached: true,
        resource: Some("users_me".to_string()),
        reset: None,
    })
}

/// Backend fake with scripted link-status and identity responses.
pub struct ScriptedBackend {
    linked_from_call: u32,
    identities: Mutex<VecDeque<IdentityReply>>,
    gated: bool,
    pub identity_started: Notify,
    pub identity_release: Notify,
    pub start_calls: AtomicU32,
    pub link_calls: AtomicU32,
    pub identity_calls: AtomicU32,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Never linked; identity resolves to a fresh profile.
    pub fn new() -> Self {
        Self {
            linked_from_call: u32::MAX,
            identities: Mutex::new(VecDeque::from([fresh("Alex Doe", "alex")])),
            gated: false,
            identity_started: Notify::new(),
            identity_release: Notify::new(),
            start_calls: AtomicU32::new(0),
            link_calls: AtomicU32::new(0),
            identity_calls: AtomicU32::new(0),
        }
    }

    /// Link status reports linked from the `call`-th check onwards (1-based).
    pub fn linked_from(mut self, call: u32) -> Self {
        self.linked_from_call = call;
        self
    }

    /// Identity replies in order; the last one repeats.
    pub fn identities(self, replies: Vec<IdentityReply>) -> Self {
        *self.identities.lock().expect("identities lock") = replies.into();
        self
    }

    /// Identity fetches block until `identity_release` is notified.
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn link_call_count(&self) -> u32 {
        self.link_calls.load(Ordering::SeqCst)
    }

    pub fn identity_call_count(&self) -> u32 {
        self.identity_calls.load(Ordering::SeqCst)
    }

    fn next_identity(&self) -> IdentityReply {
        let mut queue = self.identities.lock().expect("identities lock");
        if queue.len() > 1 {
            queue.pop_front().expect("non-empty queue")
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or(IdentityReply::Fail("no identity scripted".into()))
        }
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn start_authorization(&self, account_id: i64) -> Result<String, AuthError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://backend.test/v1/oauth/x/start?user_id={account_id}"
        ))
    }

    async fn link_status(&self, account_id: i64) -> Result<LinkStatus, AuthError> {
        let call = self.link_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LinkStatus {
            user_id: Some(account_id),
            linked: call >= self.linked_from_call,
            scopes: None,
        })
    }

    async fn fetch_identity(&self, _account_id: i64) -> Result<IdentityFetch, AuthError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated {
            self.identity_started.notify_one();
            self.identity_release.notified().await;
        }
        match self.next_identity() {
            IdentityReply::Fetch(fetch) => Ok(fetch),
            IdentityReply::Fail(message) => Err(AuthError::Network(message)),
        }
    }
}

/// Launcher fake that records opened URLs.
///
/// Sessions either end immediately with a fixed outcome, or stay open until
/// the test calls [`RecordingLauncher::finish`].
pub struct RecordingLauncher {
    outcome: Option<BrowserOutcome>,
    opened: Mutex<Vec<String>>,
    held: Mutex<Vec<oneshot::Sender<BrowserOutcome>>>,
}

impl RecordingLauncher {
    pub fn held() -> Self {
        Self {
            outcome: None,
            opened: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn finishing(outcome: BrowserOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Self::held()
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().expect("opened lock").len()
    }

    /// End the most recent held session.
    pub fn finish(&self, outcome: BrowserOutcome) {
        if let Some(tx) = self.held.lock().expect("held lock").pop() {
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl BrowserLauncher for RecordingLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::ExternalSession
    }

    async fn open(&self, url: &str, _callback_url: &str) -> Result<BrowserSession, AuthError> {
        self.opened.lock().expect("opened lock").push(url.to_string());
        match &self.outcome {
            Some(outcome) => Ok(BrowserSession::finished_with(outcome.clone())),
            None => {
                let (tx, session) = BrowserSession::pending();
                self.held.lock().expect("held lock").push(tx);
                Ok(session)
            }
        }
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_base_url("https://backend.test")
        .with_poll_interval(Duration::from_secs(3))
        .with_max_poll_attempts(20)
        .with_request_timeout(Duration::from_secs(5))
}

pub struct Harness {
    pub auth: AuthCoordinator,
    pub backend: Arc<ScriptedBackend>,
    pub launcher: Arc<RecordingLauncher>,
    pub store: Arc<MemorySessionStore>,
    pub updates: watch::Receiver<AuthSnapshot>,
}

pub fn harness(backend: ScriptedBackend, launcher: RecordingLauncher) -> Harness {
    harness_with(test_config(), backend, launcher)
}

pub fn harness_with(
    config: ClientConfig,
    backend: ScriptedBackend,
    launcher: RecordingLauncher,
) -> Harness {
    let backend = Arc::new(backend);
    let launcher = Arc::new(launcher);
    let store = Arc::new(MemorySessionStore::new());
    let auth = AuthCoordinator::new(config, backend.clone(), launcher.clone(), store.clone());
    let updates = auth.subscribe();
    Harness {
        auth,
        backend,
        launcher,
        store,
        updates,
    }
}

impl Harness {
    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&AuthSnapshot) -> bool) -> AuthSnapshot {
        tokio::time::timeout(Duration::from_secs(600), self.updates.wait_for(predicate))
            .await
            .expect("timed out waiting for coordinator state")
            .expect("coordinator dropped")
            .clone()
    }
}
