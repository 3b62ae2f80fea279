//! Callback and link-status parsing.
//!
//! Everything here is pure: no I/O, no panics, and every input maps to exactly
//! one [`CallbackResult`].

use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Error code the provider reports when the user declines the consent screen.
pub const ACCESS_DENIED: &str = "access_denied";

/// Outcome carried by a callback URL or a link-status response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// The provider linked the account.
    Success { account_id: i64 },
    /// The user declined authorization. Not a failure to report.
    Denied,
    /// Present but unusable. `code` keeps the backend's error code, if any.
    Malformed { code: Option<String> },
    /// Nothing to act on yet (status responses only).
    Pending,
}

impl CallbackResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Response of the Session Status Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub linked: bool,
    #[serde(default)]
    pub scopes: Option<String>,
}

/// Parse callback query parameters.
///
/// Recognised keys are `success`, `user_id` and `error`; anything else is
/// ignored. When a key repeats, the first value wins, except that any
/// `error=access_denied` always yields [`CallbackResult::Denied`].
pub fn parse_callback<I, K, V>(pairs: I) -> CallbackResult
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut success: Option<String> = None;
    let mut user_id: Option<String> = None;
    let mut error: Option<String> = None;
    let mut denied = false;

    for (key, value) in pairs {
        let value = value.as_ref().trim();
        match key.as_ref() {
            "success" => {
                success.get_or_insert_with(|| value.to_string());
            }
            "user_id" => {
                user_id.get_or_insert_with(|| value.to_string());
            }
            "error" => {
                if value == ACCESS_DENIED {
                    denied = true;
                }
                error.get_or_insert_with(|| value.to_string());
            }
            _ => {}
        }
    }

    if denied {
        return CallbackResult::Denied;
    }
    if let Some(code) = error {
        return CallbackResult::Malformed {
            code: (!code.is_empty()).then_some(code),
        };
    }
    let succeeded = success.as_deref().is_some_and(parse_flag);
    match user_id.and_then(|raw| raw.parse::<i64>().ok()) {
        Some(account_id) if succeeded => CallbackResult::Success { account_id },
        _ => CallbackResult::Malformed { code: None },
    }
}

/// Parse the query of a callback URL. An unparseable URL is [`CallbackResult::Malformed`].
pub fn parse_callback_url(url: &str) -> CallbackResult {
    match Url::parse(url) {
        Ok(parsed) => parse_callback(parsed.query_pairs()),
        Err(_) => CallbackResult::Malformed { code: None },
    }
}

/// Map a link-status response for `account_id` into a callback outcome.
pub fn parse_link_status(status: &LinkStatus, account_id: i64) -> CallbackResult {
    if status.linked {
        CallbackResult::Success {
            account_id: status.user_id.unwrap_or(account_id),
        }
    } else {
        CallbackResult::Pending
    }
}

fn parse_flag(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true") || raw == "1" || raw.eq_ignore_ascii_case("yes")
}

/// Registered locations a callback can arrive on.
///
/// The deep link must match scheme, host and path. The web origin (for builds
/// that complete login with a full-page redirect) matches scheme, host and port;
/// any path on that origin is accepted.
#[derive(Debug, Clone)]
pub struct CallbackTarget {
    deep_link: Url,
    web_origin: Option<Url>,
}

impl CallbackTarget {
    pub fn new(deep_link: Url, web_origin: Option<Url>) -> Self {
        Self {
            deep_link,
            web_origin,
        }
    }

    /// Build from configured strings; unparseable values never match anything.
    pub fn from_strings(deep_link: &str, web_origin: Option<&str>) -> Option<Self> {
        let deep_link = Url::parse(deep_link).ok()?;
        let web_origin = web_origin.and_then(|origin| Url::parse(origin).ok());
        Some(Self::new(deep_link, web_origin))
    }

    pub fn deep_link(&self) -> &Url {
        &self.deep_link
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.matches_deep_link(url) || self.matches_web_origin(url)
    }

    pub fn matches_str(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|parsed| self.matches(&parsed))
    }

    fn matches_deep_link(&self, url: &Url) -> bool {
        url.scheme() == self.deep_link.scheme()
            && url.host_str() == self.deep_link.host_str()
            && url.path().trim_end_matches('/') == self.deep_link.path().trim_end_matches('/')
    }

    fn matches_web_origin(&self, url: &Url) -> bool {
        self.web_origin.as_ref().is_some_and(|origin| {
            url.scheme() == origin.scheme()
                && url.host_str() == origin.host_str()
                && url.port_or_known_default() == origin.port_or_known_default()
        })
    }
}
