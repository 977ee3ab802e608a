#![allow(clippy::unwrap_used)]
// Integration tests for `SessionManager` against the in-memory registry
// and the simulated device.

use std::sync::Arc;

use ember_api::{SimulatedDevice, Transport, TransportConfig};
use pretty_assertions::assert_eq;
use ember_core::{
    ConnectionState, CoreError, Device, DeviceId, DeviceRegistry, MacAddress, MemoryRegistry,
    MemorySessionStore, SessionManager, SessionStore, UserId,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    registry: Arc<MemoryRegistry>,
    store: Arc<MemorySessionStore>,
    sim: SimulatedDevice,
    owner: UserId,
}

impl Harness {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let sim = SimulatedDevice::new();
        sim.freeze();
        Self {
            registry: Arc::new(MemoryRegistry::new()),
            store: Arc::new(MemorySessionStore::new()),
            sim,
            owner: UserId::new(),
        }
    }

    /// A fresh manager over the shared registry/store — calling this a
    /// second time is a simulated page reload.
    fn session(&self) -> SessionManager<MemoryRegistry> {
        let transport = Transport::new(&TransportConfig {
            timeout: std::time::Duration::from_millis(300),
            ..TransportConfig::default()
        })
        .unwrap()
        .with_simulator(self.sim.clone());

        SessionManager::new(
            Arc::clone(&self.registry),
            transport,
            Box::new(Arc::clone(&self.store)),
            self.owner,
        )
    }

    async fn simulated_device(&self, session: &SessionManager<MemoryRegistry>) -> Device {
        session.register_simulated().await.unwrap()
    }
}

// ── Connect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_marks_device_connected_and_records_mac() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;

    let info = session.connect(&device).await.unwrap();
    assert_eq!(info.mac.as_deref(), Some(ember_api::SIMULATED_MAC));

    assert!(session.is_connected(device.id));
    assert_eq!(
        session.connection_state(device.id),
        ConnectionState::Connected
    );

    let stored = harness
        .registry
        .get_device(device.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.last_connected_at.is_some());

    let snapshot = harness.store.load().unwrap();
    assert_eq!(snapshot.connected, vec![device.id]);
    assert!(!snapshot.manual_disconnect);
}

#[tokio::test]
async fn connect_rejects_invalid_address_locally() {
    let harness = Harness::new();
    let session = harness.session();
    let device = Device::new(harness.owner, "bad", Some("999.1.2.3".into()));

    let before = harness.sim.info_call_count();
    let err = session.connect(&device).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidAddress { .. }));
    assert!(!session.is_connected(device.id));
    // Never reached any device.
    assert_eq!(harness.sim.info_call_count(), before);
}

#[tokio::test]
async fn explicit_connect_failure_names_the_device() {
    let harness = Harness::new();
    let session = harness.session();
    // Nothing is listening here.
    let device = Device::new(harness.owner, "Greenhouse ESP32", Some("127.0.0.1".into()));

    let err = session.connect(&device).await.unwrap_err();
    match err {
        CoreError::ConnectionFailed { ref name, .. } => assert_eq!(name, "Greenhouse ESP32"),
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    assert_eq!(
        session.connection_state(device.id),
        ConnectionState::Disconnected
    );
}

// ── Reconcile ───────────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_drops_vanished_ids_and_is_idempotent() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    // Device deleted elsewhere: fresh list no longer contains it.
    let fresh: Vec<Device> = Vec::new();
    let dropped = session.reconcile(&fresh);
    assert_eq!(dropped, vec![device.id]);
    assert!(!session.is_connected(device.id));
    assert!(harness.store.load().unwrap().connected.is_empty());

    // Second pass over the same list changes nothing.
    assert!(session.reconcile(&fresh).is_empty());
}

#[tokio::test]
async fn reconcile_keeps_ids_present_in_the_list() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    let dropped = session.reconcile(std::slice::from_ref(&device));
    assert!(dropped.is_empty());
    assert!(session.is_connected(device.id));
}

// ── Disconnect and manual-disconnect suppression ────────────────────

#[tokio::test]
async fn manual_disconnect_of_last_device_suppresses_reconnect() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    session.disconnect(device.id, true);
    assert!(!session.is_connected(device.id));
    assert!(harness.store.load().unwrap().manual_disconnect);

    // Reload: the sweep must attempt nothing.
    let reloaded = harness.session();
    let before = harness.sim.info_call_count();
    assert_eq!(reloaded.reconnect_all().await, 0);
    assert_eq!(harness.sim.info_call_count(), before);

    // Any explicit connect clears the flag and sweeps resume.
    reloaded.connect(&device).await.unwrap();
    assert!(!harness.store.load().unwrap().manual_disconnect);

    let after_reload = harness.session();
    assert_eq!(after_reload.reconnect_all().await, 1);
    assert!(after_reload.is_connected(device.id));
}

#[tokio::test]
async fn automatic_disconnect_does_not_set_the_flag() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    session.disconnect(device.id, false);
    assert!(!harness.store.load().unwrap().manual_disconnect);
}

// ── Reconnect sweep ─────────────────────────────────────────────────

#[tokio::test]
async fn reconnect_restores_the_persisted_set() {
    let harness = Harness::new();
    let first = harness.session();
    let device = harness.simulated_device(&first).await;
    first.connect(&device).await.unwrap();

    let reloaded = harness.session();
    assert!(!reloaded.is_connected(device.id));

    assert_eq!(reloaded.reconnect_all().await, 1);
    assert!(reloaded.is_connected(device.id));
}

#[tokio::test]
async fn reconnect_drops_devices_that_no_longer_exist() {
    let harness = Harness::new();
    let ghost = DeviceId::new();
    harness
        .store
        .save(&ember_core::SessionSnapshot {
            connected: vec![ghost],
            manual_disconnect: false,
        })
        .unwrap();

    let session = harness.session();
    assert_eq!(session.reconnect_all().await, 0);
    assert!(harness.store.load().unwrap().connected.is_empty());
}

#[tokio::test]
async fn reconnect_skips_devices_without_an_ip() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness
        .registry
        .create_device(Device::new(harness.owner, "no-ip", None))
        .await
        .unwrap();
    harness
        .store
        .save(&ember_core::SessionSnapshot {
            connected: vec![device.id],
            manual_disconnect: false,
        })
        .unwrap();

    let reloaded = harness.session();
    assert_eq!(reloaded.reconnect_all().await, 0);
    // Skipped, not dropped: still a candidate for a later sweep.
    assert_eq!(harness.store.load().unwrap().connected, vec![device.id]);
}

#[tokio::test]
async fn reconnect_swallows_unreachable_devices_and_drops_them() {
    let harness = Harness::new();
    let session = harness.session();
    let dead = harness
        .registry
        .create_device(Device::new(harness.owner, "dead", Some("127.0.0.1".into())))
        .await
        .unwrap();
    harness
        .store
        .save(&ember_core::SessionSnapshot {
            connected: vec![dead.id],
            manual_disconnect: false,
        })
        .unwrap();

    let reloaded = harness.session();
    // Attempted, failed silently, dropped from the candidate set.
    assert_eq!(reloaded.reconnect_all().await, 1);
    assert!(!reloaded.is_connected(dead.id));
    assert!(harness.store.load().unwrap().connected.is_empty());
}

// ── Batch operations ────────────────────────────────────────────────

#[tokio::test]
async fn connect_all_is_per_device_and_partial() {
    let harness = Harness::new();
    let session = harness.session();
    let good = harness.simulated_device(&session).await;
    let bad = harness
        .registry
        .create_device(Device::new(harness.owner, "bad", Some("127.0.0.1".into())))
        .await
        .unwrap();

    let failures = session.connect_all(&[good.clone(), bad.clone()]).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, bad.id);
    assert!(session.is_connected(good.id));
    assert!(!session.is_connected(bad.id));
}

#[tokio::test]
async fn disconnect_all_manual_suppresses_future_sweeps() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    session.disconnect_all(true);
    assert!(session.connected_snapshot().is_empty());
    assert!(harness.store.load().unwrap().manual_disconnect);
}

// ── Registration flows ──────────────────────────────────────────────

#[tokio::test]
async fn register_batch_validates_before_creating_anything() {
    let harness = Harness::new();
    let session = harness.session();

    let err = session
        .register_batch(Some("Bench"), "192.168.1.10\nnot-an-ip")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidAddress { .. }));
    assert!(session.load_devices().await.unwrap().is_empty());

    let created = session
        .register_batch(Some("Bench"), "192.168.1.10, 192.168.1.11")
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].name, "Bench 1");
    assert_eq!(created[1].name, "Bench 2");
}

#[tokio::test]
async fn register_simulated_is_idempotent() {
    let harness = Harness::new();
    let session = harness.session();

    let first = session.register_simulated().await.unwrap();
    let second = session.register_simulated().await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.mac, MacAddress::new(ember_api::SIMULATED_MAC));
}

#[tokio::test]
async fn delete_device_forces_disconnection() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;
    session.connect(&device).await.unwrap();

    session.delete_device(device.id).await.unwrap();
    assert!(!session.is_connected(device.id));
    assert!(harness.registry.get_device(device.id).await.unwrap().is_none());
    assert!(harness.store.load().unwrap().connected.is_empty());
}

// ── Observation ─────────────────────────────────────────────────────

#[tokio::test]
async fn connected_watch_sees_changes() {
    let harness = Harness::new();
    let session = harness.session();
    let device = harness.simulated_device(&session).await;

    let mut rx = session.connected();
    session.connect(&device).await.unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow().contains(&device.id));

    session.disconnect(device.id, false);
    rx.changed().await.unwrap();
    assert!(rx.borrow().is_empty());
}
