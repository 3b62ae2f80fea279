//! Backend seam used by the login coordinator.

use async_trait::async_trait;

use super::callback::LinkStatus;
use super::error::AuthError;
use super::identity::IdentityFetch;

/// The three backend services a login needs.
///
/// [`crate::api::BackendClient`] implements this over HTTP; tests and
/// embedders can supply their own.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// OAuth Gateway: the URL to open in a browser for `account_id`.
    async fn start_authorization(&self, account_id: i64) -> Result<String, AuthError>;

    /// Session Status Service: whether the provider account is linked yet.
    async fn link_status(&self, account_id: i64) -> Result<LinkStatus, AuthError>;

    /// Identity Fetch Service: the provider profile for a linked account.
    async fn fetch_identity(&self, account_id: i64) -> Result<IdentityFetch, AuthError>;
}
