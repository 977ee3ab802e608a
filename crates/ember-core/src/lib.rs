// ember-core: session lifecycle and widget automation between
// ember-api and the embedding dashboard.

pub mod automation;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod session;
pub mod session_store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use automation::{AutomationEngine, ThresholdPolicy, WidgetStatus};
pub use config::SessionDefaults;
pub use error::CoreError;
pub use registry::{DeviceRegistry, DeviceUpdate, MemoryRegistry};
pub use session::{ConnectionState, SessionManager};
pub use session_store::{MemorySessionStore, SessionSnapshot, SessionStore};
pub use stream::StatusStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Device, DeviceId, IrrigationConfig, LightingConfig, MacAddress, PollConfig, Position,
    SwitchConfig, UserId, WebcamConfig, Widget, WidgetId, WidgetKind, WidgetType,
};
