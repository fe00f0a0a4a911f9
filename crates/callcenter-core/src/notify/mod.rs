//! Real-time notification fan-out to agent desktops and campaign dashboards

pub mod hub;
pub mod types;

pub use hub::{NotificationHub, NotificationStats};
pub use types::{Notification, NotificationKind, Topic};
