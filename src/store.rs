use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::langpt::supabase::AuthSession;
use crate::langpt::types::TutorSettings;

const SESSION_FILE: &str = "session.json";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Local files kept between CLI invocations: the signed-in session and,
/// when no backend is configured, the tutoring settings.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/langpt`
    pub fn open_default() -> Result<Self, StoreError> {
        let base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
        Ok(Self::new(base.join("langpt")))
    }

    pub fn load_session(&self) -> Result<Option<AuthSession>, StoreError> {
        self.read_json(SESSION_FILE)
    }

    pub fn save_session(&self, session: &AuthSession) -> Result<(), StoreError> {
        self.write_json(SESSION_FILE, session)
    }

    pub fn clear_session(&self) -> Result<(), StoreError> {
        let path = self.dir.join(SESSION_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Stored settings, or the all-off defaults when nothing was saved yet.
    pub fn load_settings(&self) -> Result<TutorSettings, StoreError> {
        Ok(self.read_json(SETTINGS_FILE)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &TutorSettings) -> Result<(), StoreError> {
        self.write_json(SETTINGS_FILE, settings)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        // Atomic write: write to tmp file, then rename
        let tmp = self.dir.join(format!("{}.tmp", name));
        write_private(&tmp, json.as_bytes()).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;

        tracing::debug!("Wrote {}", name);
        Ok(())
    }
}

/// Writes `contents` with owner-only permissions on unix. The session file holds tokens.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    // mode() only applies on creation; a stale tmp file keeps its old bits
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}
