//! Relay HTTP surface: cached reads, forwarded commands and the SSE channel.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    HttpResponse,
    http::{StatusCode, header},
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use rebar_core::{
    http::{HttpServerHandle, spawn_http_server},
    telemetry,
    wire::{ErrorResponse, ImageResponse, MessageResponse},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::{
    cache::RelayCache,
    client::{EdgeClient, Forwarded, RelayError},
    events::EventHub,
};

const NOT_CONNECTED: &str = "Not connected to Raspberry Pi";
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared state behind every relay handler.
#[derive(Clone)]
pub struct RelayState {
    pub cache: Arc<RelayCache>,
    pub client: Arc<dyn EdgeClient>,
    pub hub: EventHub,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/connection_status", web::get().to(connection_status_handler))
        .route("/api/latest_data", web::get().to(latest_data_handler))
        .route("/api/latest_image", web::get().to(latest_image_handler))
        .route("/api/trigger_capture", web::post().to(trigger_capture_handler))
        .route("/api/get_config", web::get().to(get_config_handler))
        .route("/api/set_config", web::post().to(set_config_handler))
        .route("/events", web::get().to(events_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

/// Bind `addr` and serve the relay on a new thread.
pub fn spawn_relay_server(state: RelayState, addr: SocketAddr) -> Result<HttpServerHandle> {
    spawn_http_server("relay-server", addr, move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(state.clone()));
        configure(cfg);
    })
    .with_context(|| format!("failed to start relay on {addr}"))
}

async fn connection_status_handler(state: web::Data<RelayState>) -> HttpResponse {
    HttpResponse::Ok().json(state.cache.connection_status())
}

async fn latest_data_handler(state: web::Data<RelayState>) -> HttpResponse {
    HttpResponse::Ok().json(state.cache.latest_data())
}

async fn latest_image_handler(state: web::Data<RelayState>) -> HttpResponse {
    match state.cache.image() {
        Some(image) => HttpResponse::Ok().json(ImageResponse { image }),
        None => HttpResponse::NotFound().json(ErrorResponse::new("No image available")),
    }
}

/// How a successful forward is rendered.
enum OnSuccess {
    Message(&'static str),
    PassThrough,
}

/// Run a blocking edge call and map its outcome onto the relay response.
async fn forward<F>(state: web::Data<RelayState>, on_success: OnSuccess, call: F) -> HttpResponse
where
    F: FnOnce(&dyn EdgeClient) -> Result<Forwarded, RelayError> + Send + 'static,
{
    if !state.cache.is_connected() {
        return HttpResponse::ServiceUnavailable().json(ErrorResponse::new(NOT_CONNECTED));
    }
    let client = state.client.clone();
    let result = match web::block(move || call(client.as_ref())).await {
        Ok(result) => result,
        Err(err) => {
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new(format!("Connection error: {err}")));
        }
    };
    forwarded_response(result, on_success)
}

fn forwarded_response(result: Result<Forwarded, RelayError>, on_success: OnSuccess) -> HttpResponse {
    let forwarded = match result {
        Ok(forwarded) => forwarded,
        Err(err) => {
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::new(format!("Connection error: {err}")));
        }
    };
    if !forwarded.is_ok() {
        let status =
            StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
        return HttpResponse::build(status)
            .json(ErrorResponse::new(format!("Error: {}", forwarded.body)));
    }
    match on_success {
        OnSuccess::Message(message) => HttpResponse::Ok().json(MessageResponse::new(message)),
        OnSuccess::PassThrough => match serde_json::from_str::<serde_json::Value>(&forwarded.body) {
            Ok(body) => HttpResponse::Ok().json(body),
            Err(err) => HttpResponse::InternalServerError()
                .json(ErrorResponse::new(format!("Connection error: {err}"))),
        },
    }
}

async fn trigger_capture_handler(state: web::Data<RelayState>) -> HttpResponse {
    forward(
        state,
        OnSuccess::Message("Capture triggered successfully"),
        |client| client.trigger_capture(),
    )
    .await
}

async fn get_config_handler(state: web::Data<RelayState>) -> HttpResponse {
    forward(state, OnSuccess::PassThrough, |client| client.get_config()).await
}

/// Connectivity is checked before the body is parsed, so a disconnected relay
/// answers 503 whatever it was sent.
async fn set_config_handler(state: web::Data<RelayState>, body: Bytes) -> HttpResponse {
    if !state.cache.is_connected() {
        return HttpResponse::ServiceUnavailable().json(ErrorResponse::new(NOT_CONNECTED));
    }
    let body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new(format!("Invalid JSON body: {err}")));
        }
    };
    forward(
        state,
        OnSuccess::Message("Configuration updated successfully"),
        move |client| client.set_config(&body),
    )
    .await
}

/// Push channel. A new subscriber first receives the current connection
/// status, then every event published after it subscribed.
async fn events_handler(state: web::Data<RelayState>) -> HttpResponse {
    let mut rx = state.hub.subscribe();
    let greeting = state.cache.connection_status_event();
    debug!("SSE client subscribed ({} active)", state.hub.subscriber_count());

    let stream = stream! {
        yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b"retry: 3000\n\n"));
        yield Ok::<Bytes, actix_web::Error>(Bytes::from(greeting.to_sse()));
        loop {
            match actix_web::rt::time::timeout(KEEP_ALIVE, rx.recv()).await {
                Ok(Ok(event)) => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(event.to_sse()));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    debug!("SSE client lagged, {skipped} events dropped");
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from_static(b": keep-alive\n\n"));
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream)
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().json(ErrorResponse::new("metrics disabled")),
    }
}
