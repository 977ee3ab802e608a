// ── Widget automation engine ──
//
// One recurring task per stateful widget: pure sensor widgets poll on
// their configured cadence, closed-loop widgets read a sensor and drive
// an actuator through hysteresis with an optional hard shutoff. Tasks
// are cancelled (and awaited) when their widget stops or its device
// disconnects — a timer that fires after its widget is gone is a bug.
//
// Every actuator transition goes to the device first; the widget record
// changes only after the device acknowledges. The displayed state is
// the last device-confirmed state, never the requested one.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ember_api::{BoundingBox, SensorKind, Transport, find_reading};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::automation::policy::{LoopState, ThresholdPolicy};
use crate::config::SessionDefaults;
use crate::error::CoreError;
use crate::model::{
    IrrigationConfig, LightingConfig, PollConfig, SwitchConfig, WebcamConfig, Widget, WidgetId,
    WidgetKind,
};
use crate::registry::DeviceRegistry;

// ── Status ──────────────────────────────────────────────────────────

/// Live status of one running widget task, published through `watch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetStatus {
    /// Latest normalized readings. Replaced each tick; no history is kept.
    pub readings: Vec<ember_api::SensorReading>,
    /// Latest inference detections (webcam widgets).
    pub detections: Vec<BoundingBox>,
    /// Last device-confirmed actuator state (closed-loop widgets).
    pub actuator_on: Option<bool>,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    /// Wall-clock projection of the armed auto-shutoff deadline.
    pub shutoff_at: Option<DateTime<Utc>>,
    /// Last fetch/command failure. Cleared by the next success; the
    /// task itself keeps running through transient errors.
    pub last_error: Option<String>,
}

struct WidgetTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: watch::Receiver<WidgetStatus>,
    device_ip: Ipv4Addr,
}

// ── Engine ──────────────────────────────────────────────────────────

/// Per-widget recurring task manager.
pub struct AutomationEngine<R> {
    inner: Arc<EngineInner<R>>,
}

impl<R> Clone for AutomationEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<R> {
    registry: Arc<R>,
    transport: Transport,
    defaults: SessionDefaults,
    tasks: Mutex<HashMap<WidgetId, WidgetTask>>,
    cancel: CancellationToken,
}

enum TaskSpec {
    Sensor(Vec<SensorKind>),
    Inference,
    ClosedLoop(LoopParams),
}

#[derive(Debug, Clone, Copy)]
struct LoopParams {
    policy: ThresholdPolicy,
    sensor: SensorKind,
    check_interval: Duration,
    /// Hard shutoff bound for automation-started runs.
    shutoff: Option<Duration>,
    pin: Option<u8>,
}

impl<R: DeviceRegistry> AutomationEngine<R> {
    pub fn new(registry: Arc<R>, transport: Transport, defaults: SessionDefaults) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                transport,
                defaults,
                tasks: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Task lifecycle ───────────────────────────────────────────────

    /// Start (or restart) the recurring task for a widget on a device.
    ///
    /// Kinds with no periodic behavior in their current configuration
    /// (plain LED control, webcam without overlay, closed-loop widgets
    /// in manual mode) get no task; any previous task is still stopped.
    pub async fn start(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
    ) -> Option<watch::Receiver<WidgetStatus>> {
        self.stop(widget.id).await;

        let band = self.inner.defaults.hysteresis_band_pct;
        let spec = match &widget.kind {
            WidgetKind::Moisture(_) => Some(TaskSpec::Sensor(vec![SensorKind::SoilMoisture])),
            WidgetKind::TemperatureHumidity(_) => Some(TaskSpec::Sensor(vec![
                SensorKind::Temperature,
                SensorKind::Humidity,
            ])),
            WidgetKind::Light(_) => Some(TaskSpec::Sensor(vec![SensorKind::Light])),
            WidgetKind::Webcam(c) if c.streaming && c.ml_overlay => Some(TaskSpec::Inference),
            WidgetKind::WaterPump(c) if c.auto_mode => Some(TaskSpec::ClosedLoop(LoopParams {
                policy: ThresholdPolicy::new(c.min_moisture_level, band),
                sensor: SensorKind::SoilMoisture,
                check_interval: Duration::from_secs(c.check_interval.max(1) * 60),
                shutoff: Some(Duration::from_secs(c.pump_duration.max(1))),
                pin: widget.pin,
            })),
            WidgetKind::LightControl(c) if c.auto_mode => Some(TaskSpec::ClosedLoop(LoopParams {
                policy: ThresholdPolicy::new(c.light_threshold, band),
                sensor: SensorKind::Light,
                check_interval: Duration::from_secs(c.check_interval.max(1) * 60),
                shutoff: None,
                pin: widget.pin,
            })),
            WidgetKind::LedControl(_)
            | WidgetKind::Webcam(_)
            | WidgetKind::WaterPump(_)
            | WidgetKind::LightControl(_) => None,
        }?;

        let (status_tx, status_rx) = watch::channel(WidgetStatus::default());
        let cancel = self.inner.cancel.child_token();
        let transport = self.inner.transport.clone();
        let widget_id = widget.id;

        let handle = match spec {
            TaskSpec::Sensor(kinds) => {
                let period = widget
                    .kind
                    .poll_interval()
                    .unwrap_or(Duration::from_secs(10));
                tokio::spawn(sensor_poll_task(
                    transport,
                    ip,
                    kinds,
                    period,
                    status_tx,
                    cancel.clone(),
                ))
            }
            TaskSpec::Inference => {
                let period = widget
                    .kind
                    .poll_interval()
                    .unwrap_or(Duration::from_millis(250));
                tokio::spawn(inference_poll_task(
                    transport,
                    ip,
                    period,
                    status_tx,
                    cancel.clone(),
                ))
            }
            TaskSpec::ClosedLoop(params) => tokio::spawn(closed_loop_task(
                transport,
                widget_id,
                ip,
                params,
                status_tx,
                cancel.clone(),
            )),
        };

        self.inner.tasks.lock().await.insert(
            widget_id,
            WidgetTask {
                cancel,
                handle,
                status: status_rx.clone(),
                device_ip: ip,
            },
        );
        debug!(widget = %widget_id, %ip, "widget task started");
        Some(status_rx)
    }

    /// Start tasks for every widget of a freshly connected device.
    pub async fn start_widgets(&self, widgets: &[Widget], ip: Ipv4Addr) {
        for widget in widgets {
            if widget.is_active {
                self.start(widget, ip).await;
            }
        }
    }

    /// Cancel a widget's task and wait for it to wind down. Returns
    /// whether a task was actually running.
    pub async fn stop(&self, id: WidgetId) -> bool {
        let task = self.inner.tasks.lock().await.remove(&id);
        match task {
            Some(task) => {
                task.cancel.cancel();
                if let Err(e) = task.handle.await {
                    warn!(widget = %id, error = %e, "widget task panicked");
                }
                debug!(widget = %id, "widget task stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every task polling the given device — called when the
    /// device disconnects or its IP is cleared.
    pub async fn stop_device(&self, ip: Ipv4Addr) {
        let ids: Vec<WidgetId> = self
            .inner
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(_, t)| t.device_ip == ip)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.stop(id).await;
        }
    }

    /// Cancel everything. The engine is spent afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<WidgetTask> = self
            .inner
            .tasks
            .lock()
            .await
            .drain()
            .map(|(_, t)| t)
            .collect();
        for task in tasks {
            let _ = task.handle.await;
        }
    }

    pub async fn is_running(&self, id: WidgetId) -> bool {
        self.inner.tasks.lock().await.contains_key(&id)
    }

    /// Subscribe to a running widget's status.
    pub async fn status(&self, id: WidgetId) -> Option<watch::Receiver<WidgetStatus>> {
        self.inner.tasks.lock().await.get(&id).map(|t| t.status.clone())
    }

    // ── Manual actuator control ──────────────────────────────────────

    /// Manually switch a control widget's actuator. Write-through: the
    /// device is commanded first, the record updated only on ack.
    pub async fn set_actuator(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        on: bool,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::LedControl(_) => {
                let ack = self.inner.transport.set_led(ip, on, widget.pin).await?;
                WidgetKind::LedControl(SwitchConfig { state: ack.state })
            }
            WidgetKind::WaterPump(cfg) => {
                if cfg.auto_mode {
                    return Err(manual_locked());
                }
                let ack = self.inner.transport.set_relay(ip, on, widget.pin).await?;
                WidgetKind::WaterPump(IrrigationConfig {
                    state: ack.state,
                    ..*cfg
                })
            }
            WidgetKind::LightControl(cfg) => {
                if cfg.auto_mode {
                    return Err(manual_locked());
                }
                let ack = self.inner.transport.set_relay(ip, on, widget.pin).await?;
                WidgetKind::LightControl(LightingConfig {
                    state: ack.state,
                    ..*cfg
                })
            }
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_actuator on a sensor widget".into(),
                });
            }
        };
        self.inner.registry.update_widget_kind(widget.id, kind).await
    }

    /// One-shot actuator resync for a freshly connected device: the
    /// stored widget state is reconciled to what the device reports.
    pub async fn sync_actuator_states(&self, widgets: &[Widget], ip: Ipv4Addr) {
        let transport = &self.inner.transport;
        let probes = widgets.iter().filter_map(|widget| {
            let (stored, uses_led) = match &widget.kind {
                WidgetKind::LedControl(c) => (c.state, true),
                WidgetKind::WaterPump(c) if !c.auto_mode => (c.state, false),
                WidgetKind::LightControl(c) if !c.auto_mode => (c.state, false),
                _ => return None,
            };
            Some(async move {
                let actual = if uses_led {
                    transport.led_state(ip).await
                } else {
                    transport.relay_state(ip).await
                };
                (widget, stored, actual)
            })
        });

        for (widget, stored, actual) in futures_util::future::join_all(probes).await {
            match actual {
                Ok(actual) if actual.state != stored => {
                    let kind = match &widget.kind {
                        WidgetKind::LedControl(_) => WidgetKind::LedControl(SwitchConfig {
                            state: actual.state,
                        }),
                        WidgetKind::WaterPump(c) => WidgetKind::WaterPump(IrrigationConfig {
                            state: actual.state,
                            ..*c
                        }),
                        WidgetKind::LightControl(c) => WidgetKind::LightControl(LightingConfig {
                            state: actual.state,
                            ..*c
                        }),
                        _ => continue,
                    };
                    if let Err(e) = self.inner.registry.update_widget_kind(widget.id, kind).await
                    {
                        warn!(widget = %widget.id, error = %e, "actuator resync persist failed");
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(widget = %widget.id, error = %e, "actuator resync skipped"),
            }
        }
    }

    // ── Mode switching ───────────────────────────────────────────────

    /// Switch a closed-loop widget between manual and automatic mode.
    ///
    /// The two modes keep independent actuator states; entering either
    /// mode forces the other mode's actuator OFF first so they never
    /// fight over the relay.
    pub async fn set_mode(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        auto: bool,
    ) -> Result<Widget, CoreError> {
        let (currently_auto, manual_on) = match &widget.kind {
            WidgetKind::WaterPump(c) => (c.auto_mode, c.state),
            WidgetKind::LightControl(c) => (c.auto_mode, c.state),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_mode on a non-automating widget".into(),
                });
            }
        };
        if currently_auto == auto {
            return Ok(widget.clone());
        }

        if auto {
            if manual_on {
                self.inner.transport.set_relay(ip, false, widget.pin).await?;
            }
            let kind = rebuild_mode(&widget.kind, true);
            let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;
            self.start(&updated, ip).await;
            Ok(updated)
        } else {
            self.stop(widget.id).await;
            // Automation may have left the actuator running.
            if let Err(e) = self.inner.transport.set_relay(ip, false, widget.pin).await {
                // Device still thinks it's automated — resume the loop
                // rather than leaving the relay unsupervised.
                self.start(widget, ip).await;
                return Err(e.into());
            }
            let kind = rebuild_mode(&widget.kind, false);
            self.inner.registry.update_widget_kind(widget.id, kind).await
        }
    }

    // ── Two-phase configuration commits ──────────────────────────────

    /// Move a widget to another GPIO pin. The device is reconfigured
    /// first; the record changes only on acknowledgement, so device and
    /// record never disagree.
    pub async fn set_pin(&self, widget: &Widget, ip: Ipv4Addr, pin: u8) -> Result<Widget, CoreError> {
        match &widget.kind {
            WidgetKind::LedControl(_) => {
                self.inner.transport.set_led_pin(ip, pin).await?;
            }
            WidgetKind::WaterPump(_) | WidgetKind::LightControl(_) => {
                self.inner.transport.set_relay_pin(ip, pin).await?;
            }
            WidgetKind::Moisture(_) => {
                self.inner.transport.set_moisture_pin(ip, pin).await?;
            }
            WidgetKind::TemperatureHumidity(_) => {
                self.inner.transport.set_dht_pin(ip, pin).await?;
            }
            WidgetKind::Light(_) => {
                self.inner.transport.set_light_pin(ip, pin).await?;
            }
            WidgetKind::Webcam(_) => {
                return Err(CoreError::Unsupported {
                    operation: "set_pin on a webcam widget".into(),
                });
            }
        }
        self.inner.registry.update_widget_pin(widget.id, Some(pin)).await
    }

    /// Change a sensor widget's poll cadence. Moisture has a matching
    /// device-side interval; the rest are client-side only.
    pub async fn set_refresh_interval(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        secs: u64,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::Moisture(_) => {
                self.inner
                    .transport
                    .set_moisture_interval(ip, secs.max(1) * 1_000)
                    .await?;
                WidgetKind::Moisture(PollConfig { refresh_rate: secs })
            }
            WidgetKind::TemperatureHumidity(_) => {
                WidgetKind::TemperatureHumidity(PollConfig { refresh_rate: secs })
            }
            WidgetKind::Light(_) => WidgetKind::Light(PollConfig { refresh_rate: secs }),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_refresh_interval on a non-polling widget".into(),
                });
            }
        };
        let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;
        self.restart_if_running(&updated, ip).await;
        Ok(updated)
    }

    /// Change a closed-loop widget's check cadence (minutes). The pump
    /// loop has a matching device-side interval.
    pub async fn set_check_interval(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        minutes: u64,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::WaterPump(cfg) => {
                self.inner
                    .transport
                    .set_pump_check_interval(ip, minutes.max(1) * 60_000)
                    .await?;
                WidgetKind::WaterPump(IrrigationConfig {
                    check_interval: minutes,
                    ..*cfg
                })
            }
            WidgetKind::LightControl(cfg) => WidgetKind::LightControl(LightingConfig {
                check_interval: minutes,
                ..*cfg
            }),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_check_interval on a non-automating widget".into(),
                });
            }
        };
        let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;
        self.restart_if_running(&updated, ip).await;
        Ok(updated)
    }

    /// Change the ON threshold for a closed-loop widget.
    pub async fn set_threshold(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        pct: f64,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::WaterPump(cfg) => WidgetKind::WaterPump(IrrigationConfig {
                min_moisture_level: pct,
                ..*cfg
            }),
            WidgetKind::LightControl(cfg) => WidgetKind::LightControl(LightingConfig {
                light_threshold: pct,
                ..*cfg
            }),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_threshold on a non-automating widget".into(),
                });
            }
        };
        let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;
        self.restart_if_running(&updated, ip).await;
        Ok(updated)
    }

    /// Change the pump's auto-shutoff bound (seconds).
    pub async fn set_pump_duration(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        secs: u64,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::WaterPump(cfg) => WidgetKind::WaterPump(IrrigationConfig {
                pump_duration: secs,
                ..*cfg
            }),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_pump_duration on a non-pump widget".into(),
                });
            }
        };
        let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;
        self.restart_if_running(&updated, ip).await;
        Ok(updated)
    }

    // ── Webcam streaming ─────────────────────────────────────────────

    /// Toggle a webcam widget's stream. Starting the stream (re)spawns
    /// the inference overlay task when the overlay is enabled; stopping
    /// it cancels the task.
    pub async fn set_streaming(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
        streaming: bool,
    ) -> Result<Widget, CoreError> {
        let kind = match &widget.kind {
            WidgetKind::Webcam(c) => WidgetKind::Webcam(WebcamConfig { streaming, ..*c }),
            _ => {
                return Err(CoreError::Unsupported {
                    operation: "set_streaming on a non-webcam widget".into(),
                });
            }
        };
        let updated = self.inner.registry.update_widget_kind(widget.id, kind).await?;

        match &updated.kind {
            WidgetKind::Webcam(c) if c.streaming && c.ml_overlay => {
                self.start(&updated, ip).await;
            }
            _ => {
                self.stop(updated.id).await;
            }
        }
        Ok(updated)
    }

    /// Fresh cache-busted stream URL, clearing stale consumers on the
    /// device first so a re-mounted viewer doesn't fight old ones.
    pub async fn start_stream(
        &self,
        widget: &Widget,
        ip: Ipv4Addr,
    ) -> Result<url::Url, CoreError> {
        if !matches!(widget.kind, WidgetKind::Webcam(_)) {
            return Err(CoreError::Unsupported {
                operation: "start_stream on a non-webcam widget".into(),
            });
        }
        if let Err(e) = self.inner.transport.reset_streams(ip).await {
            debug!(%ip, error = %e, "stream reset skipped");
        }
        Ok(self.inner.transport.stream_url(ip)?)
    }

    /// Delete a widget, cancelling its task first.
    pub async fn remove_widget(&self, id: WidgetId) -> Result<(), CoreError> {
        self.stop(id).await;
        self.inner.registry.delete_widget(id).await
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn restart_if_running(&self, widget: &Widget, ip: Ipv4Addr) {
        let running = self.inner.tasks.lock().await.contains_key(&widget.id);
        if running {
            self.start(widget, ip).await;
        }
    }
}

fn manual_locked() -> CoreError {
    CoreError::Validation {
        message: "manual control is disabled while automation is active".into(),
    }
}

fn rebuild_mode(kind: &WidgetKind, auto: bool) -> WidgetKind {
    match kind {
        WidgetKind::WaterPump(c) => WidgetKind::WaterPump(IrrigationConfig {
            auto_mode: auto,
            state: false,
            ..*c
        }),
        WidgetKind::LightControl(c) => WidgetKind::LightControl(LightingConfig {
            auto_mode: auto,
            state: false,
            ..*c
        }),
        other => other.clone(),
    }
}

// ── Recurring tasks ─────────────────────────────────────────────────

async fn sensor_poll_task(
    transport: Transport,
    ip: Ipv4Addr,
    kinds: Vec<SensorKind>,
    period: Duration,
    status_tx: watch::Sender<WidgetStatus>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match transport.sensors(ip).await {
                    Ok(payload) => {
                        let readings: Vec<ember_api::SensorReading> = kinds
                            .iter()
                            .filter_map(|k| find_reading(*k, &payload))
                            .collect();
                        let now = Utc::now();
                        status_tx.send_modify(|s| {
                            if readings.is_empty() {
                                s.last_error =
                                    Some("no matching sensor in device payload".into());
                            } else {
                                s.readings = readings;
                                s.last_error = None;
                            }
                            s.last_check = Some(now);
                            s.next_check = Some(now + period);
                        });
                    }
                    Err(e) => {
                        // Transient by design: the next tick self-heals.
                        debug!(%ip, error = %e, "sensor poll failed");
                        status_tx.send_modify(|s| s.last_error = Some(e.to_string()));
                    }
                }
            }
        }
    }
}

async fn inference_poll_task(
    transport: Transport,
    ip: Ipv4Addr,
    period: Duration,
    status_tx: watch::Sender<WidgetStatus>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                match transport.inference(ip).await {
                    Ok(resp) => {
                        let now = Utc::now();
                        status_tx.send_modify(|s| {
                            s.detections = if resp.has_results {
                                resp.bounding_boxes
                            } else {
                                Vec::new()
                            };
                            s.last_check = Some(now);
                            s.next_check = Some(now + period);
                            s.last_error = None;
                        });
                    }
                    Err(e) => {
                        debug!(%ip, error = %e, "inference poll failed");
                        status_tx.send_modify(|s| s.last_error = Some(e.to_string()));
                    }
                }
            }
        }
    }
}

async fn closed_loop_task(
    transport: Transport,
    widget_id: WidgetId,
    ip: Ipv4Addr,
    params: LoopParams,
    status_tx: watch::Sender<WidgetStatus>,
    cancel: CancellationToken,
) {
    // Seed from the device's confirmed actuator state — surviving an
    // automation run across a reload depends on this resync.
    let confirmed = match transport.relay_state(ip).await {
        Ok(s) => s.state,
        Err(e) => {
            debug!(widget = %widget_id, error = %e, "actuator state probe failed — assuming off");
            false
        }
    };
    let mut state = LoopState::new(confirmed);
    status_tx.send_modify(|s| s.actuator_on = Some(confirmed));

    let mut interval = tokio::time::interval(params.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Dummy deadline when disarmed; the branch below is disabled.
        let shutoff_at = state.auto_off_at.unwrap_or_else(Instant::now);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(shutoff_at), if state.auto_off_at.is_some() => {
                force_off(&transport, widget_id, ip, params.pin, &mut state, &status_tx).await;
            }
            _ = interval.tick() => {
                run_check(&transport, widget_id, ip, &params, &mut state, &status_tx).await;
            }
        }
    }
}

/// One closed-loop check: read the sensor, apply hysteresis, command
/// the actuator when a transition is due.
async fn run_check(
    transport: &Transport,
    widget_id: WidgetId,
    ip: Ipv4Addr,
    params: &LoopParams,
    state: &mut LoopState,
    status_tx: &watch::Sender<WidgetStatus>,
) {
    let now = Utc::now();

    let reading = match transport.sensors(ip).await {
        Ok(payload) => find_reading(params.sensor, &payload),
        Err(e) => {
            debug!(widget = %widget_id, error = %e, "automation sensor read failed");
            status_tx.send_modify(|s| {
                s.last_error = Some(e.to_string());
                s.last_check = Some(now);
                s.next_check = Some(now + params.check_interval);
            });
            return;
        }
    };

    let Some(reading) = reading else {
        status_tx.send_modify(|s| {
            s.last_error = Some("no matching sensor in device payload".into());
            s.last_check = Some(now);
            s.next_check = Some(now + params.check_interval);
        });
        return;
    };

    state.last_reading = Some(reading.value);
    state.last_check = Some(now);

    let mut last_error = None;
    if let Some(next) = params.policy.evaluate(reading.value, state.actuator_on) {
        match transport.set_relay(ip, next, params.pin).await {
            Ok(ack) => {
                state.actuator_on = ack.state;
                if ack.state {
                    if let Some(duration) = params.shutoff {
                        state.arm_shutoff(duration);
                    }
                } else {
                    state.disarm();
                }
                debug!(
                    widget = %widget_id,
                    reading = reading.value,
                    actuator_on = ack.state,
                    "automation transition"
                );
            }
            Err(e) => {
                // Confirmed state is not advanced on failure — the
                // display keeps what the device last acknowledged.
                warn!(widget = %widget_id, error = %e, "actuator command failed");
                last_error = Some(e.to_string());
            }
        }
    }

    let shutoff_at = state
        .auto_off_at
        .map(|at| now + at.saturating_duration_since(Instant::now()));
    let actuator_on = state.actuator_on;
    status_tx.send_modify(|s| {
        s.readings = vec![reading];
        s.actuator_on = Some(actuator_on);
        s.last_check = Some(now);
        s.next_check = Some(now + params.check_interval);
        s.shutoff_at = shutoff_at;
        s.last_error = last_error;
    });
}

/// The auto-shutoff deadline fired: force the actuator off regardless
/// of readings. Overrides the hysteresis OFF path.
async fn force_off(
    transport: &Transport,
    widget_id: WidgetId,
    ip: Ipv4Addr,
    pin: Option<u8>,
    state: &mut LoopState,
    status_tx: &watch::Sender<WidgetStatus>,
) {
    match transport.set_relay(ip, false, pin).await {
        Ok(_) => {
            state.actuator_on = false;
            state.disarm();
            debug!(widget = %widget_id, "auto-shutoff reached — actuator forced off");
            status_tx.send_modify(|s| {
                s.actuator_on = Some(false);
                s.shutoff_at = None;
                s.last_error = None;
            });
        }
        Err(e) => {
            // Retry shortly instead of spinning on the elapsed deadline.
            state.auto_off_at = Some(Instant::now() + Duration::from_secs(5));
            warn!(widget = %widget_id, error = %e, "auto-shutoff command failed — retrying");
            status_tx.send_modify(|s| s.last_error = Some(e.to_string()));
        }
    }
}
