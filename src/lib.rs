//! Ibtikar client core.
//!
//! Signs a user in with X (brokered by the Ibtikar backend) when the OAuth
//! callback cannot be relied on to arrive, and loads the feed of posts the
//! backend has analysed for them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ibtikar::api::BackendClient;
//! use ibtikar::auth::{AuthCoordinator, FileSessionStore, SystemBrowserLauncher};
//! use ibtikar::config::ClientConfig;
//!
//! # async fn example() -> ibtikar::error::Result<()> {
//! let config = ClientConfig::load()?;
//! let backend = Arc::new(BackendClient::new(&config)?);
//! let auth = AuthCoordinator::new(
//!     config,
//!     backend.clone(),
//!     Arc::new(SystemBrowserLauncher::new()),
//!     Arc::new(FileSessionStore::new_default()),
//! );
//! if !auth.restore().await {
//!     auth.start_login().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod posts;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
