// ── Session cache boundary ──
//
// The connected-device set and the manual-disconnect flag are the only
// state shared across page loads. They live in one snapshot that is
// always read and written whole — partial updates would lose writes
// between the session manager and a widget-triggered disconnect.
//
// The cache is best-effort: the registry stays authoritative for device
// existence.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::DeviceId;

/// Persisted session state, restored on the next page load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Device ids considered connected, in connect order.
    #[serde(default)]
    pub connected: Vec<DeviceId>,
    /// While set, the auto-reconnect sweep is suppressed. Cleared by the
    /// next explicit connect.
    #[serde(default)]
    pub manual_disconnect: bool,
}

/// Storage for the session snapshot (local-storage equivalent).
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<SessionSnapshot, CoreError>;
    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CoreError>;
}

/// A shared store handle is a store — lets two sessions (e.g. across a
/// simulated reload) see the same cache.
impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn load(&self) -> Result<SessionSnapshot, CoreError> {
        (**self).load()
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CoreError> {
        (**self).save(snapshot)
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    snapshot: Mutex<SessionSnapshot>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<SessionSnapshot, CoreError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CoreError> {
        *self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot.clone();
        Ok(())
    }
}
