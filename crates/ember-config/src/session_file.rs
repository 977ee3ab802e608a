// ── File-backed session cache ──
//
// The local-storage equivalent: one TOML snapshot (connected device ids
// + manual-disconnect flag) in the platform state directory. Writes go
// through a temp file and rename so a crash mid-write never leaves a
// half snapshot behind.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;

use ember_core::{CoreError, SessionSnapshot, SessionStore};

/// Session store persisting to a TOML file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the canonical platform location.
    pub fn at_default_path() -> Self {
        Self::new(default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Canonical session cache path (state dir where the platform has one,
/// local data dir otherwise).
pub fn default_path() -> PathBuf {
    ProjectDirs::from("dev", "mvoss", "ember").map_or_else(
        || PathBuf::from(".ember-session.toml"),
        |dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .join("session.toml")
        },
    )
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<SessionSnapshot, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| CoreError::SessionStore {
                message: format!("corrupt session cache at {}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no session cache yet");
                Ok(SessionSnapshot::default())
            }
            Err(e) => Err(CoreError::SessionStore {
                message: format!("cannot read {}: {e}", self.path.display()),
            }),
        }
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CoreError> {
        let io_err = |e: std::io::Error| CoreError::SessionStore {
            message: format!("cannot write {}: {e}", self.path.display()),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let raw = toml::to_string_pretty(snapshot).map_err(|e| CoreError::SessionStore {
            message: format!("cannot serialize session cache: {e}"),
        })?;

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, raw).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_core::DeviceId;

    #[test]
    fn round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.toml"));

        let snapshot = SessionSnapshot {
            connected: vec![DeviceId::new(), DeviceId::new()],
            manual_disconnect: true,
        };
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("absent.toml"));

        let snapshot = store.load().unwrap();
        assert!(snapshot.connected.is_empty());
        assert!(!snapshot.manual_disconnect);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let store = FileSessionStore::new(path);
        assert!(matches!(
            store.load(),
            Err(CoreError::SessionStore { .. })
        ));
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/state/session.toml"));

        store.save(&SessionSnapshot::default()).unwrap();
        assert!(store.path().exists());
    }
}
