//! Client configuration (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::IbtikarError;

/// Production backend used when nothing else is configured.
pub const DEFAULT_BACKEND_URL: &str = "https://ibtikar-backend.onrender.com";
/// Deep link the backend redirects to once the provider handshake finishes.
pub const DEFAULT_CALLBACK_URL: &str = "ibtikar://oauth/callback";
/// The backend provisions account 1 for single-user installs.
pub const DEFAULT_ACCOUNT_ID: i64 = 1;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 20;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Runtime configuration for the backend client and the login coordinator.
///
/// Resolution order (later wins):
/// 1. Built-in defaults
/// 2. `config.toml` in the platform config directory (or an explicit path)
/// 3. Environment variables (`IBTIKAR_*`, plus the Expo `EXPO_PUBLIC_BACKEND_URL`)
/// 4. `with_*` overrides in code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub account_id: i64,
    pub callback_url: String,
    /// Origin of the web build; the backend redirects browsers there instead of the deep link.
    pub web_origin: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            account_id: DEFAULT_ACCOUNT_ID,
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
            web_origin: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    account_id: Option<i64>,
    callback_url: Option<String>,
    web_origin: Option<String>,
    poll_interval_secs: Option<u64>,
    max_poll_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Defaults, then the default config file (if present), then the environment.
    pub fn load() -> Result<Self, IbtikarError> {
        let mut config = Self::default();
        if let Some(path) = default_config_path().filter(|p| p.exists()) {
            config = config.merge_file(&path)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables on top of defaults (`.env` is honoured).
    pub fn from_env() -> Result<Self, IbtikarError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file on top of defaults.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, IbtikarError> {
        let config = Self::default().merge_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IBTIKAR_*` overrides using an arbitrary variable lookup.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), IbtikarError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("IBTIKAR_BACKEND_URL").or_else(|| lookup("EXPO_PUBLIC_BACKEND_URL")) {
            self.base_url = url;
        }
        if let Some(raw) = lookup("IBTIKAR_ACCOUNT_ID") {
            self.account_id = parse_var("IBTIKAR_ACCOUNT_ID", &raw)?;
        }
        if let Some(url) = lookup("IBTIKAR_CALLBACK_URL") {
            self.callback_url = url;
        }
        if let Some(origin) = lookup("IBTIKAR_WEB_ORIGIN") {
            self.web_origin = Some(origin);
        }
        if let Some(raw) = lookup("IBTIKAR_POLL_INTERVAL_SECS") {
            self.poll_interval = Duration::from_secs(parse_var("IBTIKAR_POLL_INTERVAL_SECS", &raw)?);
        }
        if let Some(raw) = lookup("IBTIKAR_MAX_POLL_ATTEMPTS") {
            self.max_poll_attempts = parse_var("IBTIKAR_MAX_POLL_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("IBTIKAR_REQUEST_TIMEOUT_SECS") {
            self.request_timeout =
                Duration::from_secs(parse_var("IBTIKAR_REQUEST_TIMEOUT_SECS", &raw)?);
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), IbtikarError> {
        let _ = dotenvy::dotenv();
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn merge_file(mut self, path: &Path) -> Result<Self, IbtikarError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)?;
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.account_id {
            self.account_id = v;
        }
        if let Some(v) = file.callback_url {
            self.callback_url = v;
        }
        if file.web_origin.is_some() {
            self.web_origin = file.web_origin;
        }
        if let Some(v) = file.poll_interval_secs {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.max_poll_attempts {
            self.max_poll_attempts = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        Ok(self)
    }

    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), IbtikarError> {
        Url::parse(&self.base_url).map_err(|e| {
            IbtikarError::Configuration(format!("invalid backend url {}: {e}", self.base_url))
        })?;
        Url::parse(&self.callback_url).map_err(|e| {
            IbtikarError::Configuration(format!("invalid callback url {}: {e}", self.callback_url))
        })?;
        if let Some(origin) = &self.web_origin {
            Url::parse(origin).map_err(|e| {
                IbtikarError::Configuration(format!("invalid web origin {origin}: {e}"))
            })?;
        }
        if self.poll_interval.is_zero() {
            return Err(IbtikarError::Configuration(
                "poll interval must be greater than zero".into(),
            ));
        }
        if self.max_poll_attempts == 0 {
            return Err(IbtikarError::Configuration(
                "max poll attempts must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(IbtikarError::Configuration(
                "request timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_account_id(mut self, account_id: i64) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = url.into();
        self
    }

    pub fn with_web_origin(mut self, origin: impl Into<String>) -> Self {
        self.web_origin = Some(origin.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, IbtikarError> {
    raw.trim()
        .parse()
        .map_err(|_| IbtikarError::Configuration(format!("{key} has an invalid value: {raw}")))
}

/// Platform config directory for the client (e.g. `~/.config/ibtikar`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("net", "ibtikar", "ibtikar")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of `config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
