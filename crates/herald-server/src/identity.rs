use axum::http::HeaderMap;
use herald_core::ids::SubscriberId;
use herald_core::{NotifyError, Result};

use crate::config::ServerConfig;

/// Subscriber identity asserted by the upstream auth layer.
///
/// Missing or blank header: `Unauthenticated` when identity is required,
/// otherwise a fresh anonymous id.
pub fn resolve_subscriber(headers: &HeaderMap, config: &ServerConfig) -> Result<SubscriberId> {
    let asserted = headers
        .get(config.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match asserted {
        Some(id) => Ok(SubscriberId::from_raw(id)),
        None if config.require_identity => Err(NotifyError::Unauthenticated),
        None => Ok(SubscriberId::new()),
    }
}
