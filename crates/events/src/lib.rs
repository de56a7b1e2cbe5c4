//! In-process pub/sub for server and app events, fanned out to WebSocket
//! subscribers by the gateway.

pub mod bus;
pub mod types;

pub use bus::{EventBus, Subscription, Topic};
pub use types::{AppEvent, AppEventKind, BusEvent, ServerEvent, ServerEventKind};
