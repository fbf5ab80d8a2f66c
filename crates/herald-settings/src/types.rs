//! Settings types. Every struct deserializes with defaults for missing keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    /// Channels clients are subscribed to, in order.
    pub channels: Vec<String>,
    pub logging: LoggingSettings,
}

impl Default for HeraldSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            channels: vec!["avatar".to_string(), "profile".to_string()],
            logging: LoggingSettings::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Header carrying the subscriber identity asserted by the auth layer.
    pub identity_header: String,
    /// Reject streams without an identity header.
    pub require_identity: bool,
    /// Upper bound on graceful shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            identity_header: "x-subscriber-id".to_string(),
            require_identity: true,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Broker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Messages buffered per subscriber connection.
    pub subscriber_buffer: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging settings. `RUST_LOG` still wins when set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    pub format: LogFormat,
    /// Per-module level overrides, e.g. `herald_broker = "debug"`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = HeraldSettings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.identity_header, "x-subscriber-id");
        assert!(settings.server.require_identity);
        assert_eq!(settings.broker.subscriber_buffer, 1024);
        assert_eq!(settings.channels, vec!["avatar", "profile"]);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(HeraldSettings::default()).unwrap();
        assert!(json["server"]["identityHeader"].is_string());
        assert!(json["broker"]["subscriberBuffer"].is_number());
        assert_eq!(json["logging"]["format"], "json");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: HeraldSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"logging":{"format":"pretty"}}"#)
                .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(settings.channels.len(), 2);
    }
}
