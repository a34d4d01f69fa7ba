pub mod hub;
pub mod session;
pub mod sink;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use hub::{BroadcastHub, Hub, HubConfig, HubLoop};
pub use session::serve_subscriber;
pub use sink::{InboundFrame, SubscriberId, SubscriberSink};
pub use stats::{HubSnapshot, HubStats};

#[cfg(feature = "server")]
pub use sink::WsSink;
