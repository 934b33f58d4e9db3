pub mod controller;
pub mod events;

pub use controller::MonitorController;
pub use events::MonitorEvent;
