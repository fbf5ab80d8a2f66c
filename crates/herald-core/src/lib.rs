pub mod channel;
pub mod errors;
pub mod event;
pub mod ids;
pub mod sse;

pub use channel::{Channel, ChannelRegistry};
pub use errors::{NotifyError, Result};
pub use event::Event;
pub use sse::Frame;
