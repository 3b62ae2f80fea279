//! Authenticated identity and profile enrichment.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::backend::AuthBackend;
use crate::util::timeout::with_timeout;

/// The signed-in user as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend account id; every follow-up request is scoped to it.
    pub id: i64,
    pub display_name: String,
    pub handle: Option<String>,
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Minimal identity used when the profile cannot be fetched.
    pub fn placeholder(account_id: i64) -> Self {
        Self {
            id: account_id,
            display_name: format!("User {account_id}"),
            handle: None,
            avatar_url: None,
        }
    }

    pub fn from_profile(account_id: i64, profile: &Profile) -> Self {
        let handle = profile
            .username
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        let display_name = match profile.name.trim() {
            "" => handle
                .as_ref()
                .map(|h| format!("@{h}"))
                .unwrap_or_else(|| format!("User {account_id}")),
            name => name.to_string(),
        };
        Self {
            id: account_id,
            display_name,
            handle,
            avatar_url: profile
                .profile_image_url
                .clone()
                .filter(|url| !url.is_empty()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder(self.id)
    }
}

/// Provider profile returned by the Identity Fetch Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Provider-side id; the backend forwards it as a string, older builds as a number.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// Response of the Identity Fetch Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFetch {
    #[serde(default)]
    pub data: Option<Profile>,
    #[serde(default)]
    pub rate_limited: bool,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub reset: Option<String>,
}

/// Result of [`resolve_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    /// Stale (cached) or placeholder data; enrichment can be retried later.
    pub degraded: bool,
}

/// Fetch and map the profile for `account_id`.
///
/// Never fails: once the provider has confirmed the link, the user is signed
/// in. A rate-limited response with a cached profile uses that profile; any
/// other failure falls back to [`Identity::placeholder`]. Both cases are
/// reported as degraded.
pub async fn resolve_identity(
    backend: &dyn AuthBackend,
    account_id: i64,
    timeout: Duration,
) -> ResolvedIdentity {
    match with_timeout(timeout, backend.fetch_identity(account_id)).await {
        Ok(IdentityFetch {
            data: Some(profile),
            rate_limited,
            cached,
            ..
        }) => {
            if rate_limited || cached {
                tracing::info!(account_id, rate_limited, cached, "using cached profile");
            }
            ResolvedIdentity {
                identity: Identity::from_profile(account_id, &profile),
                degraded: rate_limited || cached,
            }
        }
        Ok(fetch) => {
            tracing::warn!(
                account_id,
                rate_limited = fetch.rate_limited,
                resource = fetch.resource.as_deref().unwrap_or("-"),
                "identity response had no profile, using placeholder"
            );
            placeholder(account_id)
        }
        Err(error) => {
            tracing::warn!(account_id, error = %error, "identity fetch failed, using placeholder");
            placeholder(account_id)
        }
    }
}

fn placeholder(account_id: i64) -> ResolvedIdentity {
    ResolvedIdentity {
        identity: Identity::placeholder(account_id),
        degraded: true,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for profile id, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::callback::LinkStatus;
    use crate::auth::error::AuthError;
    use async_trait::async_trait;

    struct FixedIdentity(Result<IdentityFetch, fn() -> AuthError>);

    #[async_trait]
    impl AuthBackend for FixedIdentity {
        async fn start_authorization(&self, _account_id: i64) -> Result<String, AuthError> {
            Err(AuthError::Unsupported("not used".into()))
        }

        async fn link_status(&self, _account_id: i64) -> Result<LinkStatus, AuthError> {
            Err(AuthError::Unsupported("not used".into()))
        }

        async fn fetch_identity(&self, _account_id: i64) -> Result<IdentityFetch, AuthError> {
            match &self.0 {
                Ok(fetch) => Ok(fetch.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn profile(name: &str) -> Profile {
        Profile {
            id: "1234".into(),
            name: name.into(),
            username: Some("alex".into()),
            profile_image_url: Some("https://pbs.example/alex.png".into()),
        }
    }

    #[tokio::test]
    async fn fresh_profile_is_not_degraded() {
        let backend = FixedIdentity(Ok(IdentityFetch {
            data: Some(profile("Alex")),
            ..Default::default()
        }));
        let resolved = resolve_identity(&backend, 42, Duration::from_secs(1)).await;
        assert!(!resolved.degraded);
        assert_eq!(resolved.identity.id, 42);
        assert_eq!(resolved.identity.display_name, "Alex");
        assert_eq!(resolved.identity.handle.as_deref(), Some("alex"));
    }

    #[tokio::test]
    async fn rate_limited_cached_profile_is_degraded_success() {
        let backend = FixedIdentity(Ok(IdentityFetch {
            data: Some(profile("Alex")),
            rate_limited: true,
            cached: true,
            ..Default::default()
        }));
        let resolved = resolve_identity(&backend, 42, Duration::from_secs(1)).await;
        assert!(resolved.degraded);
        assert_eq!(resolved.identity.display_name, "Alex");
    }

    #[tokio::test]
    async fn rate_limited_without_profile_falls_back_to_placeholder() {
        let backend = FixedIdentity(Ok(IdentityFetch {
            rate_limited: true,
            ..Default::default()
        }));
        let resolved = resolve_identity(&backend, 42, Duration::from_secs(1)).await;
        assert!(resolved.degraded);
        assert_eq!(resolved.identity, Identity::placeholder(42));
    }

    #[tokio::test]
    async fn transport_error_falls_back_to_placeholder() {
        let backend = FixedIdentity(Err(|| AuthError::Network("connection reset".into())));
        let resolved = resolve_identity(&backend, 9, Duration::from_secs(1)).await;
        assert!(resolved.degraded);
        assert!(resolved.identity.is_placeholder());
        assert_eq!(resolved.identity.id, 9);
    }

    #[test]
    fn blank_name_uses_handle() {
        let identity = Identity::from_profile(3, &profile("  "));
        assert_eq!(identity.display_name, "@alex");
    }

    #[test]
    fn profile_id_accepts_string_or_number() {
        let from_string: Profile = serde_json::from_str(r#"{"id": "42", "name": "Alex"}"#).unwrap();
        let from_number: Profile = serde_json::from_str(r#"{"id": 42, "name": "Alex"}"#).unwrap();
        assert_eq!(from_string.id, "42");
        assert_eq!(from_number.id, "42");
        assert!(serde_json::from_str::<Profile>(r#"{"id": null}"#).is_err());
    }

    #[test]
    fn identity_fetch_defaults_missing_flags() {
        let fetch: IdentityFetch = serde_json::from_str(r#"{"data": {"id": "1", "name": "A"}}"#).unwrap();
        assert!(!fetch.rate_limited);
        assert!(!fetch.cached);
        assert!(fetch.data.is_some());
    }
}
