//! Observable login state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::identity::Identity;

pub(crate) const STATUS_WAITING: &str = "Waiting for authorization…";
pub(crate) const STATUS_CHECKING: &str = "Checking login status…";
pub(crate) const STATUS_CANCELLED: &str = "Login cancelled";
pub(crate) const STATUS_FAILED: &str = "Login failed, please retry";
pub(crate) const STATUS_TIMED_OUT: &str =
    "Still waiting for authorization. Tap \"check now\" once you have approved access.";

pub(crate) fn status_polling(attempt: u32, max: u32) -> String {
    format!("Waiting for authorization… (check {attempt}/{max})")
}

pub(crate) fn status_start_failed(error: &impl std::fmt::Display) -> String {
    format!("Could not start login: {error}")
}

pub(crate) fn status_failed_with(code: Option<&str>) -> String {
    match code {
        Some(code) => format!("{STATUS_FAILED} ({code})"),
        None => STATUS_FAILED.to_string(),
    }
}

/// Where the coordinator is in the login flow.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoginState {
    /// Logged out, nothing in flight.
    #[default]
    Idle,
    /// Fetching the authorization URL and opening the browser.
    AwaitingProviderRedirect,
    /// Browser is open; waiting for the callback or for the browser to close.
    AwaitingCallback,
    /// Browser closed without a callback; checking link status.
    Polling,
    /// Logged in.
    Resolved,
}

impl LoginState {
    /// Whether a login attempt in this state can still be completed by a callback or status check.
    ///
    /// Includes the launch phase: a deep link can land before the launcher returns.
    pub fn accepts_completion(self) -> bool {
        matches!(
            self,
            Self::AwaitingProviderRedirect | Self::AwaitingCallback | Self::Polling
        )
    }
}

/// Point-in-time view of the coordinator, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub feature_active: bool,
    pub is_logging_in: bool,
    pub status_message: String,
    pub state: LoginState,
    pub poll_attempt_count: u32,
    /// The poll bound was hit; only a manual check can complete the attempt now.
    pub timed_out: bool,
    /// The identity is a placeholder or cached copy.
    pub degraded: bool,
    /// URL handed to the browser for the live attempt, if any.
    pub authorization_url: Option<String>,
    pub attempt_started_at: Option<DateTime<Utc>>,
}

impl AuthSnapshot {
    pub fn is_logged_in(&self) -> bool {
        self.identity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn login_state_names_are_snake_case() {
        assert_eq!(LoginState::AwaitingProviderRedirect.to_string(), "awaiting_provider_redirect");
        assert_eq!(LoginState::from_str("polling").unwrap(), LoginState::Polling);
    }

    #[test]
    fn only_in_flight_states_accept_completion() {
        assert!(LoginState::AwaitingProviderRedirect.accepts_completion());
        assert!(LoginState::AwaitingCallback.accepts_completion());
        assert!(LoginState::Polling.accepts_completion());
        assert!(!LoginState::Idle.accepts_completion());
        assert!(!LoginState::Resolved.accepts_completion());
    }

    #[test]
    fn failure_status_carries_backend_code() {
        assert_eq!(status_failed_with(None), STATUS_FAILED);
        assert_eq!(
            status_failed_with(Some("token_exchange_failed")),
            "Login failed, please retry (token_exchange_failed)"
        );
    }

    #[test]
    fn default_snapshot_is_logged_out() {
        let snapshot = AuthSnapshot::default();
        assert!(!snapshot.is_logged_in());
        assert_eq!(snapshot.state, LoginState::Idle);
    }
}
