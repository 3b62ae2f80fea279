//! OAuth login: callback parsing, identity resolution, browser launch and the
//! coordinator that ties them together.

pub mod backend;
pub mod callback;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod launcher;
pub mod session;
pub mod store;

pub use backend::AuthBackend;
pub use callback::{
    parse_callback, parse_callback_url, parse_link_status, CallbackResult, CallbackTarget,
    LinkStatus, ACCESS_DENIED,
};
pub use coordinator::AuthCoordinator;
pub use error::AuthError;
pub use identity::{resolve_identity, Identity, IdentityFetch, Profile, ResolvedIdentity};
pub use launcher::{
    BrowserLauncher, BrowserOutcome, BrowserSession, ExternalSessionLauncher, LauncherKind,
    NavigateFn, RedirectLauncher, SessionRequest, SystemBrowserLauncher,
};
pub use session::{AuthSnapshot, LoginState};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoredSession};
