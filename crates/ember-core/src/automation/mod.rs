pub mod engine;
pub mod policy;

pub use engine::{AutomationEngine, WidgetStatus};
pub use policy::{LoopState, ThresholdPolicy};
