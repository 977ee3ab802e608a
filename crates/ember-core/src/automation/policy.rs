// ── Closed-loop policy ──
//
// Pure decision logic for the auto-irrigation and auto-lighting loops,
// kept free of IO so the hysteresis behavior is testable on its own.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Hysteresis threshold policy.
///
/// The actuator turns ON when the reading drops below `threshold` and
/// OFF only once it rises above `threshold + band` — the band prevents
/// rapid toggling around the setpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    pub threshold: f64,
    pub band: f64,
}

impl ThresholdPolicy {
    pub fn new(threshold: f64, band: f64) -> Self {
        Self { threshold, band }
    }

    /// Decide the next actuator transition for a reading.
    ///
    /// `Some(true)` — turn ON, `Some(false)` — turn OFF, `None` — leave
    /// as-is.
    pub fn evaluate(&self, reading: f64, actuator_on: bool) -> Option<bool> {
        if reading < self.threshold && !actuator_on {
            Some(true)
        } else if reading > self.threshold + self.band && actuator_on {
            Some(false)
        } else {
            None
        }
    }
}

/// Owned timer state for one running closed-loop task.
///
/// Recomputed from the current clock on each tick — nothing here is
/// captured at timer-creation time, so there is no stale value to drift.
#[derive(Debug)]
pub struct LoopState {
    /// Last device-confirmed actuator state under automation.
    pub actuator_on: bool,
    /// Hard shutoff deadline for an automation-started run, when one is
    /// armed.
    pub auto_off_at: Option<Instant>,
    /// When the actuator was last turned on by automation.
    pub running_since: Option<DateTime<Utc>>,
    pub last_reading: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
}

impl LoopState {
    pub fn new(actuator_on: bool) -> Self {
        Self {
            actuator_on,
            auto_off_at: None,
            running_since: None,
            last_reading: None,
            last_check: None,
        }
    }

    /// Arm the auto-shutoff deadline for a freshly started run.
    pub fn arm_shutoff(&mut self, duration: std::time::Duration) {
        self.auto_off_at = Some(Instant::now() + duration);
        self.running_since = Some(Utc::now());
    }

    /// Disarm after the actuator went (or was forced) off.
    pub fn disarm(&mut self) {
        self.auto_off_at = None;
        self.running_since = None;
    }
}
