// ── Persistence boundary ──
//
// The hosted backend is an external collaborator: core talks to it only
// through `DeviceRegistry`. Methods return `Send` futures so engine
// tasks can hold a registry across `tokio::spawn`.
//
// `MemoryRegistry` is the in-process implementation used by tests and
// by embedders that want a dashboard without a hosted backend.

use std::future::{Future, ready};

use dashmap::DashMap;

use crate::error::CoreError;
use crate::model::{Device, DeviceId, MacAddress, UserId, Widget, WidgetId, WidgetKind};

/// Partial device update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    pub is_favorite: Option<bool>,
}

/// CRUD facade over persisted device and widget records.
///
/// Implementations enforce MAC uniqueness per owner
/// ([`CoreError::MacConflict`] on violation) and stamp `updated_at`.
pub trait DeviceRegistry: Send + Sync {
    // ── Devices ──────────────────────────────────────────────────────

    fn list_devices(
        &self,
        owner: UserId,
    ) -> impl Future<Output = Result<Vec<Device>, CoreError>> + Send;

    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, CoreError>> + Send;

    fn find_device_by_mac(
        &self,
        owner: UserId,
        mac: MacAddress,
    ) -> impl Future<Output = Result<Option<Device>, CoreError>> + Send;

    fn create_device(
        &self,
        device: Device,
    ) -> impl Future<Output = Result<Device, CoreError>> + Send;

    fn update_device(
        &self,
        id: DeviceId,
        update: DeviceUpdate,
    ) -> impl Future<Output = Result<Device, CoreError>> + Send;

    fn delete_device(&self, id: DeviceId) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Record a successful connection: bumps `last_connected_at` and,
    /// when the device reported one, replaces the stored MAC.
    fn record_connection(
        &self,
        id: DeviceId,
        mac: Option<MacAddress>,
    ) -> impl Future<Output = Result<(), CoreError>> + Send;

    // ── Widgets ──────────────────────────────────────────────────────

    fn list_widgets(
        &self,
        owner: UserId,
    ) -> impl Future<Output = Result<Vec<Widget>, CoreError>> + Send;

    fn widgets_for_device(
        &self,
        owner: UserId,
        mac: MacAddress,
    ) -> impl Future<Output = Result<Vec<Widget>, CoreError>> + Send;

    fn get_widget(
        &self,
        id: WidgetId,
    ) -> impl Future<Output = Result<Option<Widget>, CoreError>> + Send;

    fn create_widget(
        &self,
        widget: Widget,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send;

    /// Replace a widget's kind (and with it, its configuration map).
    fn update_widget_kind(
        &self,
        id: WidgetId,
        kind: WidgetKind,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send;

    fn update_widget_pin(
        &self,
        id: WidgetId,
        pin: Option<u8>,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send;

    fn delete_widget(&self, id: WidgetId) -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── In-memory implementation ────────────────────────────────────────

/// Concurrent in-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: DashMap<DeviceId, Device>,
    widgets: DashMap<WidgetId, Widget>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mac_taken(&self, owner: UserId, mac: &MacAddress, except: DeviceId) -> bool {
        self.devices
            .iter()
            .any(|r| r.owner == owner && r.mac == *mac && r.id != except)
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn list_devices(
        &self,
        owner: UserId,
    ) -> impl Future<Output = Result<Vec<Device>, CoreError>> + Send {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.clone())
            .collect();
        crate::model::sort_for_display(&mut devices);
        ready(Ok(devices))
    }

    fn get_device(
        &self,
        id: DeviceId,
    ) -> impl Future<Output = Result<Option<Device>, CoreError>> + Send {
        ready(Ok(self.devices.get(&id).map(|r| r.clone())))
    }

    fn find_device_by_mac(
        &self,
        owner: UserId,
        mac: MacAddress,
    ) -> impl Future<Output = Result<Option<Device>, CoreError>> + Send {
        let found = self
            .devices
            .iter()
            .find(|r| r.owner == owner && r.mac == mac)
            .map(|r| r.clone());
        ready(Ok(found))
    }

    fn create_device(
        &self,
        device: Device,
    ) -> impl Future<Output = Result<Device, CoreError>> + Send {
        let result = if self.mac_taken(device.owner, &device.mac, device.id) {
            Err(CoreError::MacConflict {
                mac: device.mac.clone(),
            })
        } else {
            self.devices.insert(device.id, device.clone());
            Ok(device)
        };
        ready(result)
    }

    fn update_device(
        &self,
        id: DeviceId,
        update: DeviceUpdate,
    ) -> impl Future<Output = Result<Device, CoreError>> + Send {
        let result = match self.devices.get_mut(&id) {
            Some(mut entry) => {
                if let Some(name) = update.name {
                    entry.name = name;
                }
                if let Some(ip) = update.ip_address {
                    entry.ip_address = Some(ip);
                }
                if let Some(fav) = update.is_favorite {
                    entry.is_favorite = fav;
                }
                entry.updated_at = chrono::Utc::now();
                Ok(entry.clone())
            }
            None => Err(CoreError::DeviceNotFound { id }),
        };
        ready(result)
    }

    fn delete_device(&self, id: DeviceId) -> impl Future<Output = Result<(), CoreError>> + Send {
        let result = if self.devices.remove(&id).is_some() {
            Ok(())
        } else {
            Err(CoreError::DeviceNotFound { id })
        };
        ready(result)
    }

    fn record_connection(
        &self,
        id: DeviceId,
        mac: Option<MacAddress>,
    ) -> impl Future<Output = Result<(), CoreError>> + Send {
        // Conflict check happens before taking the write guard: holding
        // a shard guard while iterating the map would deadlock.
        if let Some(ref mac) = mac {
            let owner = self.devices.get(&id).map(|r| r.owner);
            match owner {
                None => return ready(Err(CoreError::DeviceNotFound { id })),
                Some(owner) if self.mac_taken(owner, mac, id) => {
                    return ready(Err(CoreError::MacConflict { mac: mac.clone() }));
                }
                Some(_) => {}
            }
        }

        let result = match self.devices.get_mut(&id) {
            Some(mut entry) => {
                if let Some(mac) = mac {
                    entry.mac = mac;
                }
                entry.last_connected_at = Some(chrono::Utc::now());
                entry.updated_at = chrono::Utc::now();
                Ok(())
            }
            None => Err(CoreError::DeviceNotFound { id }),
        };
        ready(result)
    }

    fn list_widgets(
        &self,
        owner: UserId,
    ) -> impl Future<Output = Result<Vec<Widget>, CoreError>> + Send {
        let mut widgets: Vec<Widget> = self
            .widgets
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.clone())
            .collect();
        widgets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ready(Ok(widgets))
    }

    fn widgets_for_device(
        &self,
        owner: UserId,
        mac: MacAddress,
    ) -> impl Future<Output = Result<Vec<Widget>, CoreError>> + Send {
        let mut widgets: Vec<Widget> = self
            .widgets
            .iter()
            .filter(|r| r.owner == owner && r.device_mac == mac)
            .map(|r| r.clone())
            .collect();
        widgets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ready(Ok(widgets))
    }

    fn get_widget(
        &self,
        id: WidgetId,
    ) -> impl Future<Output = Result<Option<Widget>, CoreError>> + Send {
        ready(Ok(self.widgets.get(&id).map(|r| r.clone())))
    }

    fn create_widget(
        &self,
        widget: Widget,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send {
        self.widgets.insert(widget.id, widget.clone());
        ready(Ok(widget))
    }

    fn update_widget_kind(
        &self,
        id: WidgetId,
        kind: WidgetKind,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send {
        let result = match self.widgets.get_mut(&id) {
            Some(mut entry) => {
                entry.kind = kind;
                entry.updated_at = chrono::Utc::now();
                Ok(entry.clone())
            }
            None => Err(CoreError::WidgetNotFound { id }),
        };
        ready(result)
    }

    fn update_widget_pin(
        &self,
        id: WidgetId,
        pin: Option<u8>,
    ) -> impl Future<Output = Result<Widget, CoreError>> + Send {
        let result = match self.widgets.get_mut(&id) {
            Some(mut entry) => {
                entry.pin = pin;
                entry.updated_at = chrono::Utc::now();
                Ok(entry.clone())
            }
            None => Err(CoreError::WidgetNotFound { id }),
        };
        ready(result)
    }

    fn delete_widget(&self, id: WidgetId) -> impl Future<Output = Result<(), CoreError>> + Send {
        let result = if self.widgets.remove(&id).is_some() {
            Ok(())
        } else {
            Err(CoreError::WidgetNotFound { id })
        };
        ready(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SessionDefaults;

    #[tokio::test]
    async fn mac_uniqueness_enforced_per_owner() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();

        let mut first = Device::new(owner, "one", Some("192.168.1.10".into()));
        first.mac = MacAddress::new("a4:cf:12:00:00:01");
        registry.create_device(first).await.unwrap();

        let mut dup = Device::new(owner, "two", Some("192.168.1.11".into()));
        dup.mac = MacAddress::new("A4-CF-12-00-00-01");
        let err = registry.create_device(dup).await.unwrap_err();
        assert!(matches!(err, CoreError::MacConflict { .. }));

        // Same MAC under a different owner is fine.
        let mut other = Device::new(UserId::new(), "theirs", None);
        other.mac = MacAddress::new("a4:cf:12:00:00:01");
        registry.create_device(other).await.unwrap();
    }

    #[tokio::test]
    async fn record_connection_updates_mac_and_timestamp() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let device = registry
            .create_device(Device::new(owner, "node", Some("192.168.1.10".into())))
            .await
            .unwrap();
        assert!(device.last_connected_at.is_none());

        registry
            .record_connection(device.id, Some(MacAddress::new("a4:cf:12:0f:3b:9e")))
            .await
            .unwrap();

        let stored = registry.get_device(device.id).await.unwrap().unwrap();
        assert!(stored.last_connected_at.is_some());
        assert_eq!(stored.mac, MacAddress::new("a4:cf:12:0f:3b:9e"));
    }

    #[tokio::test]
    async fn widgets_found_by_device_mac() {
        let registry = MemoryRegistry::new();
        let owner = UserId::new();
        let mac = MacAddress::new("a4:cf:12:0f:3b:9e");
        let defaults = SessionDefaults::default();

        registry
            .create_widget(Widget::new(
                owner,
                mac.clone(),
                "Soil",
                WidgetKind::moisture(&defaults),
            ))
            .await
            .unwrap();
        registry
            .create_widget(Widget::new(
                owner,
                MacAddress::new("a4:cf:12:00:00:99"),
                "Other",
                WidgetKind::light(&defaults),
            ))
            .await
            .unwrap();

        let widgets = registry.widgets_for_device(owner, mac).await.unwrap();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].name, "Soil");
    }

    #[tokio::test]
    async fn deleting_missing_widget_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry.delete_widget(WidgetId::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::WidgetNotFound { .. }));
    }
}
