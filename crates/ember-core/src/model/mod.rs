pub mod device;
pub mod ids;
pub mod widget;

pub use device::{Device, parse_ip_batch, sort_for_display};
pub use ids::{DeviceId, MacAddress, UserId, WidgetId};
pub use widget::{
    IrrigationConfig, LightingConfig, PollConfig, Position, SwitchConfig, WebcamConfig, Widget,
    WidgetKind, WidgetType,
};
