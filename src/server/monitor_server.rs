// src/server/monitor_server.rs

//! The monitor HTTP surface: lists registered devices, relays control
//! commands to them and exposes Prometheus metrics.

use crate::core::ServerState;
use crate::core::dispatch::{DispatchOutcome, dispatch};
use crate::core::metrics::{self, gather_metrics};
use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// The envelope every monitor endpoint answers with.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn reply<T: Serialize>(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Response {
    let body = ApiResponse {
        code: status.as_u16(),
        message: message.into(),
        data,
    };
    (status, Json(body)).into_response()
}

/// Body of `POST /device/send`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    device_id: String,
    cmd: String,
}

/// Query string of `GET /device/send`.
#[derive(Deserialize)]
struct SendQuery {
    id: String,
    cmd: String,
}

async fn device_list(State(state): State<Arc<ServerState>>) -> Response {
    reply(StatusCode::OK, "success", Some(state.registry.list()))
}

async fn send_from_body(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<SendBody>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(body)) => send_command(&state, &body.device_id, &body.cmd).await,
        Err(e) => {
            debug!("Rejected command body: {}", e);
            reply::<()>(StatusCode::BAD_REQUEST, "invalid parameters", None)
        }
    }
}

async fn send_from_query(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<SendQuery>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(query)) => send_command(&state, &query.id, &query.cmd).await,
        Err(e) => {
            debug!("Rejected command query: {}", e);
            reply::<()>(StatusCode::BAD_REQUEST, "invalid parameters", None)
        }
    }
}

async fn send_command(state: &ServerState, device_id: &str, cmd: &str) -> Response {
    match dispatch(&state.registry, &state.config.commands, device_id, cmd).await {
        Ok(DispatchOutcome::Sent) => reply::<()>(StatusCode::OK, "success", None),
        Ok(DispatchOutcome::Queried(property)) => {
            reply(StatusCode::OK, "success", Some(property))
        }
        Err(e) if e.is_client_rejection() => {
            reply::<()>(StatusCode::BAD_REQUEST, e.to_string(), None)
        }
        Err(e) => {
            error!("Command '{}' for device '{}' failed: {}", cmd, device_id, e);
            reply::<()>(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None)
        }
    }
}

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    metrics::REGISTERED_DEVICES.set(state.registry.len() as f64);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Builds the monitor routes over the shared server state.
fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/deviceList", get(device_list))
        .route("/device/send", get(send_from_query).post(send_from_body))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serves the monitor routes on an already bound listener until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Monitor server shutting down.");
        })
        .await
}

/// Binds the configured monitor address and serves until shutdown.
pub async fn run_monitor_server(
    state: Arc<ServerState>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (host, port) = (state.config.monitor.host.clone(), state.config.monitor.port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind monitor server on {host}:{port}"))?;
    info!("Monitor server listening on http://{}:{}", host, port);
    serve(listener, state, shutdown_rx)
        .await
        .context("Monitor server failed")
}
