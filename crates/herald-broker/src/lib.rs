//! Publish/subscribe bus used to fan change events out to stream sessions.
//!
//! [`Broker`] is the seam: producers call [`Broker::publish`], stream
//! sessions call [`Broker::subscribe`] and read data messages from the
//! returned [`EventSource`]. [`MemoryBroker`] is the shared in-process bus.

pub mod broker;
pub mod memory;
pub mod message;
pub mod source;

pub use broker::{Broker, BrokerConfig, BrokerStats};
pub use memory::MemoryBroker;
pub use message::{BrokerMessage, MessageKind, RawMessage};
pub use source::{EventSource, RawStream, SubscriptionHandle};
