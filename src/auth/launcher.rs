//! Browser-launch strategies.
//!
//! Each host environment gets one [`BrowserLauncher`], chosen when the
//! coordinator is built:
//! - [`SystemBrowserLauncher`] hands the URL to the OS browser. It cannot see
//!   the browser close, so the session ends as [`BrowserOutcome::Dismissed`]
//!   and the coordinator falls back to polling.
//! - [`ExternalSessionLauncher`] forwards the URL to a host-owned auth session
//!   (an embedded web view or platform auth sheet) that reports how it ended.
//! - [`RedirectLauncher`] navigates the current page away. The process never
//!   sees the result; the reloaded page completes the login from its URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::Display;
use tokio::sync::{mpsc, oneshot};

use super::error::AuthError;

/// How a browser session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserOutcome {
    /// The session finished on the registered callback URL.
    Callback(String),
    /// The user closed the browser on purpose.
    Cancelled,
    /// The browser went away without a detectable callback.
    Dismissed,
    /// Control moved to a full-page redirect.
    HandedOff,
}

/// Environment a launcher targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LauncherKind {
    SystemBrowser,
    ExternalSession,
    Redirect,
}

/// An open browser session; resolves once with its outcome.
#[derive(Debug)]
pub struct BrowserSession {
    outcome: oneshot::Receiver<BrowserOutcome>,
}

impl BrowserSession {
    /// Session whose outcome is reported later through the returned sender.
    pub fn pending() -> (oneshot::Sender<BrowserOutcome>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { outcome: rx })
    }

    /// Session that has already ended.
    pub fn finished_with(outcome: BrowserOutcome) -> Self {
        let (tx, session) = Self::pending();
        let _ = tx.send(outcome);
        session
    }

    /// Wait for the session to end. A dropped reporter counts as dismissed.
    pub async fn finished(self) -> BrowserOutcome {
        self.outcome.await.unwrap_or(BrowserOutcome::Dismissed)
    }
}

/// Opens an authorization URL in whatever browser context the host has.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn kind(&self) -> LauncherKind;

    /// Open `url`. Returns once the browser is showing it.
    async fn open(&self, url: &str, callback_url: &str) -> Result<BrowserSession, AuthError>;
}

// ---------------------------------------------------------------------------
// System browser
// ---------------------------------------------------------------------------

/// Opens the URL with the platform opener (`open`, `xdg-open`, `start`).
#[derive(Debug, Clone)]
pub struct SystemBrowserLauncher {
    spawn_opener: bool,
    callback_grace: Duration,
}

impl Default for SystemBrowserLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBrowserLauncher {
    pub fn new() -> Self {
        Self {
            spawn_opener: true,
            callback_grace: Duration::ZERO,
        }
    }

    /// Do not spawn anything; the host shows the URL to the user itself.
    pub fn manual() -> Self {
        Self {
            spawn_opener: false,
            ..Self::new()
        }
    }

    /// Wait this long for a deep link before reporting the session as dismissed.
    pub fn with_callback_grace(mut self, grace: Duration) -> Self {
        self.callback_grace = grace;
        self
    }

    /// Start the platform opener. Its exit is watched in the background:
    /// some openers (`xdg-open` with certain browsers) only return once the
    /// browser closes.
    fn spawn(url: &str) -> Result<(), AuthError> {
        let (program, args) = opener_command(url);
        let mut child = tokio::process::Command::new(program)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| AuthError::Browser(format!("failed to run {program}: {e}")))?;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(program, %status, "browser opener exited with an error");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(program, error = %error, "browser opener failed"),
            }
        });
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    ("open", vec![url.to_string()])
}

#[cfg(target_os = "windows")]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    (
        "cmd",
        vec!["/C".into(), "start".into(), String::new(), url.to_string()],
    )
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener_command(url: &str) -> (&'static str, Vec<String>) {
    ("xdg-open", vec![url.to_string()])
}

#[async_trait]
impl BrowserLauncher for SystemBrowserLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::SystemBrowser
    }

    async fn open(&self, url: &str, _callback_url: &str) -> Result<BrowserSession, AuthError> {
        if self.spawn_opener {
            Self::spawn(url)?;
        }
        if self.callback_grace.is_zero() {
            return Ok(BrowserSession::finished_with(BrowserOutcome::Dismissed));
        }
        let (tx, session) = BrowserSession::pending();
        let grace = self.callback_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(BrowserOutcome::Dismissed);
        });
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Host-driven auth session
// ---------------------------------------------------------------------------

/// A request for the host to run an auth session.
#[derive(Debug)]
pub struct SessionRequest {
    pub url: String,
    pub callback_url: String,
    reply: oneshot::Sender<BrowserOutcome>,
}

impl SessionRequest {
    /// Report how the session ended.
    pub fn finish(self, outcome: BrowserOutcome) {
        let _ = self.reply.send(outcome);
    }
}

/// Forwards URLs to a host-owned auth session over a channel.
///
/// Hosts that cannot guarantee callback delivery should finish with
/// [`BrowserOutcome::Dismissed`] when the session closes without a URL.
#[derive(Debug, Clone)]
pub struct ExternalSessionLauncher {
    requests: mpsc::Sender<SessionRequest>,
}

impl ExternalSessionLauncher {
    /// Create the launcher and the receiver the host listens on.
    pub fn channel() -> (Self, mpsc::Receiver<SessionRequest>) {
        let (tx, rx) = mpsc::channel(4);
        (Self { requests: tx }, rx)
    }
}

#[async_trait]
impl BrowserLauncher for ExternalSessionLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::ExternalSession
    }

    async fn open(&self, url: &str, callback_url: &str) -> Result<BrowserSession, AuthError> {
        let (reply, session) = BrowserSession::pending();
        self.requests
            .send(SessionRequest {
                url: url.to_string(),
                callback_url: callback_url.to_string(),
                reply,
            })
            .await
            .map_err(|_| AuthError::Browser("no auth session host is listening".into()))?;
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Full-page redirect
// ---------------------------------------------------------------------------

/// Navigation hook supplied by a web host.
pub type NavigateFn = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Navigates the current page to the authorization URL.
#[derive(Clone)]
pub struct RedirectLauncher {
    navigate: NavigateFn,
}

impl std::fmt::Debug for RedirectLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectLauncher").finish_non_exhaustive()
    }
}

impl RedirectLauncher {
    pub fn new(navigate: NavigateFn) -> Self {
        Self { navigate }
    }
}

#[async_trait]
impl BrowserLauncher for RedirectLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Redirect
    }

    async fn open(&self, url: &str, _callback_url: &str) -> Result<BrowserSession, AuthError> {
        (self.navigate)(url).map_err(AuthError::Browser)?;
        Ok(BrowserSession::finished_with(BrowserOutcome::HandedOff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn dropped_reporter_counts_as_dismissed() {
        let (tx, session) = BrowserSession::pending();
        drop(tx);
        assert_eq!(session.finished().await, BrowserOutcome::Dismissed);
    }

    #[tokio::test]
    async fn manual_system_launcher_dismisses_immediately() {
        let launcher = SystemBrowserLauncher::manual();
        let session = launcher
            .open("https://example.test/start", "ibtikar://oauth/callback")
            .await
            .unwrap();
        assert_eq!(session.finished().await, BrowserOutcome::Dismissed);
        assert_eq!(launcher.kind().to_string(), "system-browser");
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_delays_dismissal() {
        let launcher = SystemBrowserLauncher::manual().with_callback_grace(Duration::from_secs(10));
        let session = launcher.open("https://example.test", "ibtikar://oauth/callback").await.unwrap();
        let started = tokio::time::Instant::now();
        assert_eq!(session.finished().await, BrowserOutcome::Dismissed);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn external_session_round_trip() {
        let (launcher, mut requests) = ExternalSessionLauncher::channel();
        let host = tokio::spawn(async move {
            let request = requests.recv().await.expect("session request");
            assert_eq!(request.url, "https://example.test/start");
            assert_eq!(request.callback_url, "ibtikar://oauth/callback");
            request.finish(BrowserOutcome::Callback(
                "ibtikar://oauth/callback?success=true&user_id=1".into(),
            ));
        });

        let session = launcher
            .open("https://example.test/start", "ibtikar://oauth/callback")
            .await
            .unwrap();
        assert_eq!(
            session.finished().await,
            BrowserOutcome::Callback("ibtikar://oauth/callback?success=true&user_id=1".into())
        );
        host.await.unwrap();
    }

    #[tokio::test]
    async fn external_session_without_host_is_an_error() {
        let (launcher, requests) = ExternalSessionLauncher::channel();
        drop(requests);
        let err = launcher
            .open("https://example.test", "ibtikar://oauth/callback")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Browser(_)));
    }

    #[tokio::test]
    async fn redirect_launcher_navigates_and_hands_off() {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let sink = visited.clone();
        let launcher = RedirectLauncher::new(Arc::new(move |url: &str| {
            sink.lock().unwrap().push(url.to_string());
            Ok(())
        }));

        let session = launcher.open("https://example.test/start", "ibtikar://oauth/callback").await.unwrap();
        assert_eq!(session.finished().await, BrowserOutcome::HandedOff);
        assert_eq!(*visited.lock().unwrap(), vec!["https://example.test/start".to_string()]);
    }

    #[tokio::test]
    async fn redirect_failure_is_reported() {
        let launcher = RedirectLauncher::new(Arc::new(|_: &str| Err("popup blocked".to_string())));
        let err = launcher.open("https://example.test", "x://y").await.unwrap_err();
        assert!(matches!(err, AuthError::Browser(msg) if msg == "popup blocked"));
    }
}
