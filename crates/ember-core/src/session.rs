// ── Connection session manager ──
//
// Owns the set of "connected" device ids for the current session. A
// connection here is a client-side concept: the device answered /info
// recently enough that we treat it as live. The set is mirrored into the
// session store so a page reload can attempt to restore it.
//
// Explicit connects surface failures; the reconnect sweep swallows them.
// Devices that are merely offline at boot must not shout at the user.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use ember_api::{DeviceInfo, Transport};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{Device, DeviceId, MacAddress, UserId, parse_ip_batch};
use crate::registry::{DeviceRegistry, DeviceUpdate};
use crate::session_store::{SessionSnapshot, SessionStore};

// ── ConnectionState ─────────────────────────────────────────────────

/// Per-device connection state observable by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    /// User-initiated: failures are surfaced.
    Explicit,
    /// Page-load sweep: failures are logged and the id is dropped from
    /// the restored set.
    Reconnect,
}

// ── SessionManager ──────────────────────────────────────────────────

/// The session-lifecycle entry point. Cheaply cloneable.
pub struct SessionManager<R> {
    inner: Arc<SessionInner<R>>,
}

impl<R> Clone for SessionManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<R> {
    registry: Arc<R>,
    transport: Transport,
    store: Box<dyn SessionStore>,
    owner: UserId,
    /// Persisted view: reconnect candidates + manual-disconnect flag.
    /// Mutated only whole (read-modify-write) under this lock.
    session: Mutex<SessionSnapshot>,
    states: DashMap<DeviceId, ConnectionState>,
    /// Live connected set for this session. Restored ids become live
    /// only once the reconnect sweep actually reaches them.
    connected_tx: watch::Sender<Arc<HashSet<DeviceId>>>,
    reconnecting_tx: watch::Sender<bool>,
}

impl<R: DeviceRegistry> SessionManager<R> {
    /// Restore the persisted session and build a manager. Does not
    /// connect anything — call [`reconnect_all`](Self::reconnect_all)
    /// to re-drive the restored set.
    pub fn new(
        registry: Arc<R>,
        transport: Transport,
        store: Box<dyn SessionStore>,
        owner: UserId,
    ) -> Self {
        let restored = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "session cache unreadable — starting fresh");
            SessionSnapshot::default()
        });

        let (connected_tx, _) = watch::channel(Arc::new(HashSet::new()));
        let (reconnecting_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                registry,
                transport,
                store,
                owner,
                session: Mutex::new(restored),
                states: DashMap::new(),
                connected_tx,
                reconnecting_tx,
            }),
        }
    }

    pub fn owner(&self) -> UserId {
        self.inner.owner
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.inner.registry
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to live connected-set changes.
    pub fn connected(&self) -> watch::Receiver<Arc<HashSet<DeviceId>>> {
        self.inner.connected_tx.subscribe()
    }

    pub fn connected_snapshot(&self) -> Arc<HashSet<DeviceId>> {
        self.inner.connected_tx.borrow().clone()
    }

    pub fn is_connected(&self, id: DeviceId) -> bool {
        self.inner.connected_tx.borrow().contains(&id)
    }

    pub fn connection_state(&self, id: DeviceId) -> ConnectionState {
        self.inner
            .states
            .get(&id)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    /// Subscribe to the page-load reconnect super-state.
    pub fn reconnecting(&self) -> watch::Receiver<bool> {
        self.inner.reconnecting_tx.subscribe()
    }

    pub fn manual_disconnect(&self) -> bool {
        self.lock_session().manual_disconnect
    }

    // ── Connect / disconnect protocol ────────────────────────────────

    /// Explicit, user-initiated connect.
    ///
    /// Validates the address, probes `/info`, records the connection in
    /// the registry (reported MAC + timestamp), adds the id to the
    /// persisted set, and clears the manual-disconnect flag.
    pub async fn connect(&self, device: &Device) -> Result<DeviceInfo, CoreError> {
        self.connect_inner(device, ConnectMode::Explicit).await
    }

    async fn connect_inner(
        &self,
        device: &Device,
        mode: ConnectMode,
    ) -> Result<DeviceInfo, CoreError> {
        let ip = match device.ipv4() {
            Ok(ip) => ip,
            Err(e) => {
                if mode == ConnectMode::Reconnect {
                    // A stored address that stopped parsing is stale
                    // data, not a user mistake — drop it quietly.
                    debug!(device = %device.name, error = %e, "invalid stored address");
                    self.drop_candidate(device.id);
                }
                return Err(e);
            }
        };

        self.inner.states.insert(device.id, ConnectionState::Connecting);

        match self.inner.transport.info(ip).await {
            Ok(device_info) => {
                let mac = device_info.mac.as_deref().map(MacAddress::new);
                // Registry failures always surface, even on reconnect:
                // the record and reality would otherwise drift.
                if let Err(e) = self.inner.registry.record_connection(device.id, mac).await {
                    self.inner
                        .states
                        .insert(device.id, ConnectionState::Disconnected);
                    return Err(e);
                }

                self.inner.states.insert(device.id, ConnectionState::Connected);
                self.add_connected(device.id);
                info!(device = %device.name, %ip, "device connected");
                Ok(device_info)
            }
            Err(e) => {
                self.inner
                    .states
                    .insert(device.id, ConnectionState::Disconnected);
                match mode {
                    ConnectMode::Explicit => Err(CoreError::ConnectionFailed {
                        name: device.name.clone(),
                        reason: e.to_string(),
                    }),
                    ConnectMode::Reconnect => {
                        debug!(device = %device.name, error = %e, "reconnect attempt failed");
                        self.drop_candidate(device.id);
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Remove the device from the live and persisted sets. When
    /// `manual` is set and this was the last connected device, the
    /// manual-disconnect flag suppresses future reconnect sweeps.
    pub fn disconnect(&self, id: DeviceId, manual: bool) {
        self.inner.states.insert(id, ConnectionState::Disconnected);

        self.inner.connected_tx.send_modify(|set| {
            if set.contains(&id) {
                let mut next = (**set).clone();
                next.remove(&id);
                *set = Arc::new(next);
            }
        });

        let mut session = self.lock_session();
        session.connected.retain(|c| *c != id);
        if manual && session.connected.is_empty() {
            session.manual_disconnect = true;
        }
        self.persist(&session);
        debug!(%id, manual, "device disconnected");
    }

    /// Drop connected ids whose device no longer exists in `devices`.
    /// Idempotent: the surviving set is exactly the intersection with
    /// the fresh list. Returns the ids that were dropped.
    pub fn reconcile(&self, devices: &[Device]) -> Vec<DeviceId> {
        let ids: HashSet<DeviceId> = devices.iter().map(|d| d.id).collect();
        let mut dropped: Vec<DeviceId> = Vec::new();

        {
            let mut session = self.lock_session();
            session.connected.retain(|id| {
                let keep = ids.contains(id);
                if !keep {
                    dropped.push(*id);
                }
                keep
            });
            self.persist(&session);
        }

        self.inner.connected_tx.send_modify(|set| {
            if set.iter().any(|id| !ids.contains(id)) {
                let mut next = (**set).clone();
                next.retain(|id| {
                    let keep = ids.contains(id);
                    if !keep && !dropped.contains(id) {
                        dropped.push(*id);
                    }
                    keep
                });
                *set = Arc::new(next);
            }
        });

        for id in &dropped {
            self.inner.states.remove(id);
            debug!(id = %id, "connected device no longer exists — dropped");
        }
        dropped
    }

    /// Re-drive `connect` for every id restored from the session cache.
    /// No-op while the manual-disconnect flag is set. Returns how many
    /// connections were attempted.
    pub async fn reconnect_all(&self) -> usize {
        let (candidates, suppressed) = {
            let session = self.lock_session();
            (session.connected.clone(), session.manual_disconnect)
        };

        if suppressed {
            debug!("manual disconnect set — skipping reconnect sweep");
            return 0;
        }
        if candidates.is_empty() {
            return 0;
        }

        self.inner.reconnecting_tx.send_replace(true);
        let mut attempted = 0;

        for id in candidates {
            match self.inner.registry.get_device(id).await {
                Ok(Some(device)) => {
                    if device.ip_address.is_none() {
                        debug!(device = %device.name, "no IP on record — skipped");
                        continue;
                    }
                    attempted += 1;
                    // Errors are already logged and handled inside.
                    let _ = self.connect_inner(&device, ConnectMode::Reconnect).await;
                }
                Ok(None) => {
                    debug!(%id, "restored device no longer exists — dropped");
                    self.drop_candidate(id);
                }
                Err(e) => {
                    warn!(%id, error = %e, "registry lookup failed during reconnect");
                }
            }
        }

        self.inner.reconnecting_tx.send_replace(false);
        attempted
    }

    /// Connect every listed device that has an IP and is not already
    /// connected, in list order. No atomicity: a partial failure leaves
    /// already-processed devices connected. Returns per-device failures.
    pub async fn connect_all(&self, devices: &[Device]) -> Vec<(DeviceId, CoreError)> {
        let mut failures = Vec::new();
        for device in devices {
            if self.is_connected(device.id) || device.ip_address.is_none() {
                continue;
            }
            if let Err(e) = self.connect_inner(device, ConnectMode::Explicit).await {
                failures.push((device.id, e));
            }
        }
        failures
    }

    /// Disconnect every connected device, in connect order.
    pub fn disconnect_all(&self, manual: bool) {
        let live = self.connected_snapshot();
        let ordered: Vec<DeviceId> = {
            let session = self.lock_session();
            session
                .connected
                .iter()
                .copied()
                .filter(|id| live.contains(id))
                .collect()
        };
        for id in ordered {
            self.disconnect(id, manual);
        }
    }

    // ── Registry passthroughs with session semantics ─────────────────

    /// Load the owner's devices and reconcile the connected set against
    /// them.
    pub async fn load_devices(&self) -> Result<Vec<Device>, CoreError> {
        let devices = self.inner.registry.list_devices(self.inner.owner).await?;
        self.reconcile(&devices);
        Ok(devices)
    }

    /// Register one device by IP. The address is validated before the
    /// registry is touched.
    pub async fn register_device(
        &self,
        name: Option<String>,
        ip: &str,
    ) -> Result<Device, CoreError> {
        let parsed: std::net::Ipv4Addr =
            ip.trim().parse().map_err(|_| CoreError::InvalidAddress {
                address: ip.trim().to_owned(),
            })?;

        let count = self.inner.registry.list_devices(self.inner.owner).await?.len();
        let name = name.unwrap_or_else(|| format!("ESP32 Device {}", count + 1));

        self.inner
            .registry
            .create_device(Device::new(self.inner.owner, name, Some(parsed.to_string())))
            .await
    }

    /// Register a batch of devices from a newline/comma-separated IP
    /// list. The whole input is validated before anything is created.
    pub async fn register_batch(
        &self,
        base_name: Option<&str>,
        input: &str,
    ) -> Result<Vec<Device>, CoreError> {
        let ips = parse_ip_batch(input)?;
        let existing = self.inner.registry.list_devices(self.inner.owner).await?.len();

        let mut created = Vec::with_capacity(ips.len());
        for (i, ip) in ips.iter().enumerate() {
            let name = match base_name {
                Some(base) => format!("{base} {}", i + 1),
                None => format!("ESP32 Device {}", existing + i + 1),
            };
            created.push(
                self.inner
                    .registry
                    .create_device(Device::new(self.inner.owner, name, Some(ip.to_string())))
                    .await?,
            );
        }
        Ok(created)
    }

    /// Register (or fetch) the built-in simulated device so it can be
    /// connected through the same paths as real hardware.
    pub async fn register_simulated(&self) -> Result<Device, CoreError> {
        if self.inner.transport.simulator().is_none() {
            warn!("registering simulated device on a transport without a simulator");
        }

        let mac = MacAddress::new(ember_api::SIMULATED_MAC);
        if let Some(existing) = self
            .inner
            .registry
            .find_device_by_mac(self.inner.owner, mac)
            .await?
        {
            return Ok(existing);
        }

        self.inner
            .registry
            .create_device(Device::simulated(self.inner.owner))
            .await
    }

    /// Update name/IP/favorite. A connected device is re-probed after
    /// an edit so the session reflects the new address.
    pub async fn update_device(
        &self,
        id: DeviceId,
        update: DeviceUpdate,
    ) -> Result<Device, CoreError> {
        let device = self.inner.registry.update_device(id, update).await?;
        if self.is_connected(id) {
            self.connect_inner(&device, ConnectMode::Explicit).await?;
        }
        Ok(device)
    }

    pub async fn toggle_favorite(&self, id: DeviceId) -> Result<Device, CoreError> {
        let device = self
            .inner
            .registry
            .get_device(id)
            .await?
            .ok_or(CoreError::DeviceNotFound { id })?;
        self.inner
            .registry
            .update_device(
                id,
                DeviceUpdate {
                    is_favorite: Some(!device.is_favorite),
                    ..DeviceUpdate::default()
                },
            )
            .await
    }

    /// Delete a device, forcing disconnection first.
    pub async fn delete_device(&self, id: DeviceId) -> Result<(), CoreError> {
        if self.is_connected(id) {
            self.disconnect(id, true);
        } else {
            self.drop_candidate(id);
        }
        self.inner.registry.delete_device(id).await
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock_session(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a device live and persisted-connected; clears the
    /// manual-disconnect flag (any successful connect does).
    fn add_connected(&self, id: DeviceId) {
        self.inner.connected_tx.send_modify(|set| {
            if !set.contains(&id) {
                let mut next = (**set).clone();
                next.insert(id);
                *set = Arc::new(next);
            }
        });

        let mut session = self.lock_session();
        if !session.connected.contains(&id) {
            session.connected.push(id);
        }
        session.manual_disconnect = false;
        self.persist(&session);
    }

    /// Remove an id from the persisted candidates only (the live set is
    /// untouched — the id was never live this session).
    fn drop_candidate(&self, id: DeviceId) {
        let mut session = self.lock_session();
        session.connected.retain(|c| *c != id);
        self.persist(&session);
    }

    /// Best-effort write-through of the persisted snapshot.
    fn persist(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.inner.store.save(snapshot) {
            warn!(error = %e, "failed to persist session cache");
        }
    }
}
