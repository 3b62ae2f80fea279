//! HTTP client for the Ibtikar backend.

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;

use super::wire::{classify_error, decode_body};
use crate::auth::{AuthBackend, AuthError, IdentityFetch, LinkStatus};
use crate::config::ClientConfig;
use crate::error::IbtikarError;
use crate::posts::{AnalysisSummary, PostsClient, PostsPage, PostsPayload, PostsQuery};

const OAUTH_START_PATH: &str = "/v1/oauth/x/start";
const LINK_STATUS_PATH: &str = "/v1/me/link-status";
const IDENTITY_PATH: &str = "/v1/x/me";
const POSTS_PATH: &str = "/v1/analysis/posts";
const PREVIEW_PATH: &str = "/v1/analysis/preview";

/// Backend client. Implements [`AuthBackend`] and [`PostsClient`].
///
/// # Example
/// ```no_run
/// use ibtikar::api::BackendClient;
/// use ibtikar::config::ClientConfig;
///
/// # async fn example() -> ibtikar::error::Result<()> {
/// let client = BackendClient::new(&ClientConfig::default())?;
/// let status = client.get_link_status(1).await?;
/// println!("linked: {}", status.linked);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, IbtikarError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_http(config, http)
    }

    /// Use a preconfigured `reqwest::Client`.
    pub fn with_http(config: &ClientConfig, http: reqwest::Client) -> Result<Self, IbtikarError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| {
            IbtikarError::Configuration(format!("invalid backend url {base_url}: {e}"))
        })?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL that starts the provider handshake for `account_id`.
    ///
    /// The backend answers it with a redirect to the provider, so it is opened
    /// in a browser as-is.
    pub fn oauth_start_url(&self, account_id: i64) -> Result<Url, IbtikarError> {
        self.endpoint(OAUTH_START_PATH, &[("user_id", account_id.to_string())])
    }

    pub async fn get_link_status(&self, account_id: i64) -> Result<LinkStatus, IbtikarError> {
        let url = self.endpoint(LINK_STATUS_PATH, &[("user_id", account_id.to_string())])?;
        self.get_json(url).await
    }

    /// Provider profile. Upstream rate limits arrive either as a 200 with
    /// `rate_limited: true` or as a 429 [`IbtikarError::RateLimited`].
    pub async fn get_identity(&self, account_id: i64) -> Result<IdentityFetch, IbtikarError> {
        let url = self.endpoint(IDENTITY_PATH, &[("user_id", account_id.to_string())])?;
        let fetch: IdentityFetch = self.get_json(url).await?;
        if fetch.rate_limited {
            tracing::info!(
                account_id,
                resource = fetch.resource.as_deref().unwrap_or("-"),
                cached = fetch.data.is_some(),
                "identity endpoint is rate limited"
            );
        }
        Ok(fetch)
    }

    pub async fn get_posts(
        &self,
        account_id: i64,
        query: &PostsQuery,
    ) -> Result<PostsPage, IbtikarError> {
        let url = self.endpoint(POSTS_PATH, &query.to_pairs(account_id))?;
        let payload: PostsPayload = self.get_json(url).await?;
        Ok(payload.into_page())
    }

    /// Ask the backend to pull the latest posts from X and classify them.
    ///
    /// Fails with [`IbtikarError::RateLimited`] while X throttles the account.
    pub async fn run_preview(&self, account_id: i64) -> Result<AnalysisSummary, IbtikarError> {
        let url = self.endpoint(PREVIEW_PATH, &[("user_id", account_id.to_string())])?;
        tracing::debug!(path = url.path(), "POST");
        let resp = self.http.post(url).send().await?;
        Self::read_json(resp).await
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, IbtikarError> {
        let raw = format!("{}{path}", self.base_url);
        Url::parse_with_params(&raw, query)
            .map_err(|e| IbtikarError::Configuration(format!("invalid endpoint {raw}: {e}")))
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, IbtikarError>
    where
        T: DeserializeOwned + Default,
    {
        tracing::debug!(path = url.path(), "GET");
        let resp = self.http.get(url).send().await?;
        Self::read_json(resp).await
    }

    async fn read_json<T>(resp: reqwest::Response) -> Result<T, IbtikarError>
    where
        T: DeserializeOwned + Default,
    {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &body));
        }
        decode_body(&body)
    }
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn start_authorization(&self, account_id: i64) -> Result<String, AuthError> {
        Ok(self.oauth_start_url(account_id)?.to_string())
    }

    async fn link_status(&self, account_id: i64) -> Result<LinkStatus, AuthError> {
        Ok(self.get_link_status(account_id).await?)
    }

    async fn fetch_identity(&self, account_id: i64) -> Result<IdentityFetch, AuthError> {
        Ok(self.get_identity(account_id).await?)
    }
}

#[async_trait]
impl PostsClient for BackendClient {
    async fn fetch_posts(
        &self,
        account_id: i64,
        query: &PostsQuery,
    ) -> Result<PostsPage, IbtikarError> {
        self.get_posts(account_id, query).await
    }

    async fn run_analysis(&self, account_id: i64) -> Result<AnalysisSummary, IbtikarError> {
        self.run_preview(account_id).await
    }
}
