use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::identity::Identity;

const SESSION_FILE_VERSION: u32 = 1;

/// Signed-in state that survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub identity: Identity,
    #[serde(default)]
    pub degraded: bool,
}

/// Storage abstraction for the signed-in session.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>, AuthError>;
    fn save(&self, session: &StoredSession) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// File-backed session store using a single TOML file.
///
/// # Example
/// ```no_run
/// use ibtikar::auth::{FileSessionStore, Identity, SessionStore, StoredSession};
///
/// let store = FileSessionStore::new_default();
/// store.save(&StoredSession {
///     identity: Identity::placeholder(1),
///     degraded: true,
/// })?;
/// # Ok::<(), ibtikar::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.toml` in the platform config directory.
    pub fn new_default() -> Self {
        Self::new(default_session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<StoredSession>, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: SessionFile = toml::from_str(&raw)?;
        if file.version != SESSION_FILE_VERSION {
            return Err(AuthError::Serialization(format!(
                "unsupported session file version {}",
                file.version
            )));
        }
        Ok(Some(file.session))
    }

    fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        Self::ensure_parent(&self.path)?;
        let file = SessionFile {
            version: SESSION_FILE_VERSION,
            session: session.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<StoredSession>, AuthError> {
        let guard = self
            .session
            .lock()
            .map_err(|_| AuthError::Io("session store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| AuthError::Io("session store lock poisoned".into()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| AuthError::Io("session store lock poisoned".into()))?;
        *guard = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    session: StoredSession,
    saved_at: DateTime<Utc>,
}

fn default_session_path() -> PathBuf {
    crate::config::config_dir()
        .unwrap_or_else(|| PathBuf::from(".ibtikar"))
        .join("session.toml")
}
