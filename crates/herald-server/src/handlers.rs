//! HTTP handlers: the notification stream, producer publish, health.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use herald_core::sse::EVENT_STREAM_MEDIA_TYPE;
use herald_core::{Channel, NotifyError};
use serde::Serialize;
use tracing::debug;

use crate::controller::StreamController;
use crate::health::health_check;
use crate::identity::resolve_subscriber;
use crate::server::AppState;
use crate::sink::channel_sink;

fn status_of(err: &NotifyError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Plain-text refusal for stream clients; they are not expected to parse JSON.
fn stream_error(err: &NotifyError) -> Response {
    (status_of(err), err.to_string()).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn json_error(err: &NotifyError) -> Response {
    let body = ErrorBody {
        error: err.error_kind(),
        message: err.to_string(),
    };
    (status_of(err), Json(body)).into_response()
}

/// `GET /notifications`: one long-lived event stream over every channel.
pub async fn stream_notifications(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut controller = StreamController::new(Arc::clone(&state.metrics), state.shutdown.token());

    let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok());
    if let Err(err) = controller.negotiate(accept) {
        return stream_error(&err);
    }

    let subscriber = match resolve_subscriber(&headers, &state.config) {
        Ok(subscriber) => subscriber,
        Err(err) => return stream_error(&controller.reject(err)),
    };

    let session = match controller
        .open_session(subscriber, state.broker.as_ref(), &state.registry)
        .await
    {
        Ok(session) => session,
        Err(err) => return stream_error(&err),
    };

    let (sink, body) = channel_sink();
    state.shutdown.spawn(async move {
        let _ = controller.run(session, sink).await;
    });

    (
        [
            (CONTENT_TYPE, EVENT_STREAM_MEDIA_TYPE),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct Published {
    channel: Channel,
    delivered: usize,
}

/// `POST /channels/{channel}/publish`: the raw body becomes the payload.
pub async fn publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    payload: String,
) -> Response {
    let result = match state.registry.resolve(&channel) {
        Ok(channel) => state
            .broker
            .publish(&channel, &payload)
            .await
            .map(|delivered| Published { channel, delivered }),
        Err(err) => Err(err),
    };
    state.metrics.record_publish(result.is_ok());

    match result {
        Ok(published) => {
            debug!(
                channel = %published.channel,
                delivered = published.delivered,
                bytes = payload.len(),
                "published"
            );
            (StatusCode::ACCEPTED, Json(published)).into_response()
        }
        Err(err) => {
            debug!(channel = %channel, error = %err, "publish refused");
            json_error(&err)
        }
    }
}

/// `GET /health`: 200 while the broker is reachable, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let channels = state
        .registry
        .all_channels()
        .iter()
        .map(|c| c.as_str().to_owned())
        .collect();
    let resp = health_check(
        state.started,
        state.started_at,
        state.broker.is_available(),
        state.broker.stats(),
        state.metrics.snapshot(),
        channels,
    );

    let status = if resp.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp)).into_response()
}
