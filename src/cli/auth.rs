//! CLI auth command handlers for login, status, and logout.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::BackendClient;
use crate::auth::session::STATUS_CANCELLED;
use crate::auth::{
    AuthCoordinator, AuthError, AuthSnapshot, BrowserLauncher, FileSessionStore,
    SystemBrowserLauncher,
};
use crate::config::ClientConfig;
use crate::error::{IbtikarError, Result};

/// Config from an explicit file, or the default layered lookup.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::load_file(path),
        None => ClientConfig::load(),
    }
}

fn coordinator(
    config: ClientConfig,
    launcher: Arc<dyn BrowserLauncher>,
) -> Result<AuthCoordinator> {
    let backend = Arc::new(BackendClient::new(&config)?);
    Ok(AuthCoordinator::new(
        config,
        backend,
        launcher,
        Arc::new(FileSessionStore::new_default()),
    ))
}

/// Handle `ibtikar auth login`.
pub async fn handle_login(config: ClientConfig, no_browser: bool) -> Result<()> {
    let launcher: Arc<dyn BrowserLauncher> = if no_browser {
        Arc::new(SystemBrowserLauncher::manual())
    } else {
        Arc::new(SystemBrowserLauncher::new())
    };
    let auth = coordinator(config, launcher)?;

    if auth.restore().await {
        print_identity(&auth.snapshot());
        println!("Run `ibtikar auth logout` to sign in with a different account.");
        return Ok(());
    }

    let mut updates = auth.subscribe();
    auth.start_login().await;
    println!("Type `check` once you have approved access, `cancel` to stop,");
    println!("or paste the ibtikar:// link your browser tried to open.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shown_url: Option<String> = None;
    let mut last_status = String::new();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Err(IbtikarError::InvalidState("login coordinator stopped".into()));
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(url) = &snapshot.authorization_url {
                    if shown_url.as_ref() != Some(url) {
                        println!("🔗 Sign in at: {url}");
                        shown_url = Some(url.clone());
                    }
                }
                if snapshot.status_message != last_status {
                    if !snapshot.status_message.is_empty() {
                        println!("⏳ {}", snapshot.status_message);
                    }
                    last_status = snapshot.status_message.clone();
                }
                if snapshot.identity.is_some() {
                    print_identity(&snapshot);
                    return Ok(());
                }
                if !snapshot.is_logging_in {
                    return match snapshot.status_message.as_str() {
                        "" => Err(AuthError::AccessDenied.into()),
                        STATUS_CANCELLED => Ok(()),
                        other => Err(IbtikarError::Authentication(other.to_string())),
                    };
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    None => {
                        stdin_open = false;
                        auth.cancel_login().await;
                    }
                    Some(line) => match line.trim() {
                        "" => {}
                        "check" | "c" => auth.manual_check_status().await,
                        "cancel" | "q" | "quit" => auth.cancel_login().await,
                        url => auth.handle_callback_url(url).await,
                    },
                }
            }
        }
    }
}

/// Handle `ibtikar auth status`.
///
/// A degraded identity gets one enrichment retry before it is shown.
pub async fn handle_status(config: ClientConfig) -> Result<()> {
    let backend = BackendClient::new(&config)?;
    let auth = coordinator(config, Arc::new(SystemBrowserLauncher::manual()))?;
    if !auth.restore().await {
        println!("Not signed in");
        return Ok(());
    }
    if auth.snapshot().degraded {
        auth.refresh_identity().await;
    }

    let snapshot = auth.snapshot();
    print_identity(&snapshot);
    let Some(identity) = snapshot.identity else {
        return Ok(());
    };

    match backend.get_link_status(identity.id).await {
        Ok(status) if status.linked => {
            let scopes = status.scopes.as_deref().unwrap_or("-");
            println!("✅ X account linked (scopes: {scopes})");
        }
        Ok(_) => println!("⚠️  X account is no longer linked; run `ibtikar auth login`"),
        Err(e) => {
            tracing::warn!(error = %e, "link status check failed");
            println!("⚠️  Could not reach the backend: {e}");
        }
    }
    Ok(())
}

/// Handle `ibtikar auth logout`.
pub async fn handle_logout(config: ClientConfig) -> Result<()> {
    let auth = coordinator(config, Arc::new(SystemBrowserLauncher::manual()))?;
    let was_signed_in = auth.restore().await;
    auth.logout().await;
    if was_signed_in {
        println!("✅ Signed out");
    } else {
        println!("Not signed in");
    }
    Ok(())
}

fn print_identity(snapshot: &AuthSnapshot) {
    let Some(identity) = &snapshot.identity else {
        return;
    };
    match &identity.handle {
        Some(handle) => println!("✅ Signed in as {} (@{handle})", identity.display_name),
        None => println!("✅ Signed in as {}", identity.display_name),
    }
    if let Some(note) = degraded_note(snapshot) {
        println!("   {note}");
    }
}

fn degraded_note(snapshot: &AuthSnapshot) -> Option<&'static str> {
    let identity = snapshot.identity.as_ref()?;
    if !snapshot.degraded {
        return None;
    }
    Some(if identity.is_placeholder() {
        "Profile details are unavailable right now (X rate limit); using a placeholder."
    } else {
        "Showing your last known profile; X is rate limiting profile lookups."
    })
}
