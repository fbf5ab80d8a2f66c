//! HTTP surface of the notification fan-out: the SSE stream endpoint, the
//! producer publish endpoint and health, plus the per-stream controller and
//! subscription session behind them.

pub mod config;
pub mod controller;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod sink;

pub use config::ServerConfig;
pub use controller::{accepts_event_stream, CloseReason, StreamController, StreamState};
pub use server::{build_router, start, AppState, ServerHandle};
pub use session::SubscriptionSession;
pub use shutdown::ShutdownCoordinator;
pub use sink::{channel_sink, ChannelSink, FrameSink, SinkClosed};
