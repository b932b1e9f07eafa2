use anyhow::{anyhow, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use eventseed_config::ImportConfig;
use eventseed_core::{ImportRequest, Importer, SeedError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    importer: Importer,
    defaults: ImportConfig,
}

impl AppState {
    pub fn new(importer: Importer, defaults: ImportConfig) -> Self {
        Self { importer, defaults }
    }
}

/// Optional overrides accepted when starting an import over HTTP.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StartBody {
    time_range_days: Option<u32>,
    batch_size: Option<usize>,
    sleep_seconds: Option<f64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route(
            "/api/imports/:destination",
            get(api_poll).post(api_start).delete(api_cancel),
        )
        .route("/api/imports/:destination/snapshot", get(api_snapshot))
        .with_state(state)
}

pub async fn run(state: AppState, host: String, port: u16) -> Result<()> {
    let bind = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .map_err(|err| anyhow!("invalid bind address: {err}"))?;

    let listener = tokio::net::TcpListener::bind(bind).await.map_err(|error| {
        if error.kind() == ErrorKind::AddrInUse {
            anyhow!("failed to bind {bind}: address already in use. rerun with `eventseed serve --port <free-port>`")
        } else {
            anyhow!("failed to bind {bind}: {error}")
        }
    })?;

    info!("eventseed listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn json_response<T: Serialize>(payload: T, status: StatusCode) -> Response {
    let mut response = Json(payload).into_response();
    *response.status_mut() = status;
    response
}

fn unknown_destination(destination: &str) -> Response {
    json_response(
        json!({"ok": false, "message": format!("unknown destination: {destination}")}),
        StatusCode::NOT_FOUND,
    )
}

async fn api_health(State(state): State<AppState>) -> Response {
    json_response(
        json!({"ok": true, "destinations": state.importer.registry().ids()}),
        StatusCode::OK,
    )
}

async fn api_start(
    State(state): State<AppState>,
    Path(destination): Path<String>,
    body: Bytes,
) -> Response {
    let overrides = if body.iter().all(u8::is_ascii_whitespace) {
        StartBody::default()
    } else {
        match serde_json::from_slice::<StartBody>(&body) {
            Ok(overrides) => overrides,
            Err(error) => {
                return json_response(
                    json!({"ok": false, "message": format!("invalid request body: {error}")}),
                    StatusCode::BAD_REQUEST,
                )
            }
        }
    };

    let mut request = ImportRequest::from_config(&state.defaults);
    request.destination_id = destination.clone();
    if let Some(days) = overrides.time_range_days {
        request.time_range_days = days;
    }
    if let Some(batch_size) = overrides.batch_size {
        request.batch_size = batch_size;
    }
    if let Some(sleep) = overrides.sleep_seconds {
        request.sleep_seconds = sleep;
    }

    match state.importer.start_import(request) {
        Ok(_handle) => json_response(
            json!({"ok": true, "destination": destination, "started": true}),
            StatusCode::ACCEPTED,
        ),
        Err(error) => {
            let status = match &error {
                SeedError::AlreadyRunning(_) => StatusCode::CONFLICT,
                SeedError::UnknownDestination(_) => StatusCode::NOT_FOUND,
                SeedError::InvalidTimeRange(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            json_response(json!({"ok": false, "message": error.to_string()}), status)
        }
    }
}

async fn api_poll(State(state): State<AppState>, Path(destination): Path<String>) -> Response {
    if !state.importer.registry().contains(&destination) {
        return unknown_destination(&destination);
    }

    match state.importer.board().poll(&destination) {
        Ok(report) => json_response(
            json!({"ok": true, "total": report.total, "progress": report.progress}),
            StatusCode::OK,
        ),
        Err(message) => json_response(json!({"ok": false, "message": message}), StatusCode::OK),
    }
}

async fn api_snapshot(State(state): State<AppState>, Path(destination): Path<String>) -> Response {
    if !state.importer.registry().contains(&destination) {
        return unknown_destination(&destination);
    }
    json_response(state.importer.board().snapshot(&destination), StatusCode::OK)
}

async fn api_cancel(State(state): State<AppState>, Path(destination): Path<String>) -> Response {
    if !state.importer.registry().contains(&destination) {
        return unknown_destination(&destination);
    }
    let cancelled = state.importer.cancel(&destination);
    json_response(json!({"ok": true, "cancelled": cancelled}), StatusCode::OK)
}
