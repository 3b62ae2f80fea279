use thiserror::Error;

use crate::error::IbtikarError;

/// Normalized authentication errors surfaced by backends, launchers and stores.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Access denied")]
    AccessDenied,
    #[error("Rate limited")]
    RateLimited {
        resource: Option<String>,
        reset: Option<String>,
    },
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Whether a later attempt at the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<IbtikarError> for AuthError {
    fn from(error: IbtikarError) -> Self {
        match error {
            IbtikarError::RateLimited { resource, reset } => Self::RateLimited { resource, reset },
            IbtikarError::Timeout(ms) => Self::Timeout(ms),
            IbtikarError::Network(e) => Self::Network(e.to_string()),
            IbtikarError::Io(e) => Self::Io(e.to_string()),
            IbtikarError::Serialization(e) => Self::Serialization(e.to_string()),
            IbtikarError::Api { status: 401 | 403, .. } => Self::NotLoggedIn,
            IbtikarError::Api { status, message } if status >= 500 => {
                Self::Network(format!("server error {status}: {message}"))
            }
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

impl From<AuthError> for IbtikarError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::RateLimited { resource, reset } => IbtikarError::RateLimited { resource, reset },
            AuthError::Timeout(ms) => IbtikarError::Timeout(ms),
            other => IbtikarError::Authentication(other.to_string()),
        }
    }
}
