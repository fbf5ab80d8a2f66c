//! Server configuration.

use axum::http::header::{HeaderName, InvalidHeaderName};
use serde::{Deserialize, Serialize};

/// Configuration for the notification server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Header carrying the subscriber identity set by the auth layer.
    pub identity_header: String,
    /// Reject streams that carry no identity.
    pub require_identity: bool,
    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            identity_header: "x-subscriber-id".into(),
            require_identity: true,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The identity header as an HTTP header name. Fails for names no
    /// request could carry, e.g. ones containing spaces.
    pub fn identity_header_name(&self) -> Result<HeaderName, InvalidHeaderName> {
        HeaderName::from_bytes(self.identity_header.as_bytes())
    }
}
