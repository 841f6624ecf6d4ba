//! Progress reporting
//!
//! Event types and the hub that fans them out to connected observers.

pub mod event;
pub mod hub;

pub use event::{AgentKind, AgentStatus, ProgressEvent};
pub use hub::{BroadcastHub, ChannelObserver, DeliveryError, Observer, ObserverId, ObserverMessage};
