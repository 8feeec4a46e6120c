// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Health and status HTTP surface.
//!
//! `GET /health` answers 200 only while both the store and the stream are
//! live; unhealthy responses still carry the last-block freshness so an
//! operator can see which side is stuck. `GET /status` is a cheap overview,
//! `GET /metrics` exposes the prometheus registry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::service::{HealthReport, SettlerService, StatusReport};

pub const HEALTH_PATH: &str = "/health";
pub const STATUS_PATH: &str = "/status";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SettlerService>,
    pub registry: Arc<Registry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    database: DatabaseHealth,
    websocket: WebsocketHealth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseHealth {
    connected: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebsocketHealth {
    connected: bool,
    last_block_time: u64,
    block_age: u64,
}

impl From<&HealthReport> for HealthBody {
    fn from(report: &HealthReport) -> Self {
        Self {
            status: if report.healthy { "ok" } else { "unhealthy" },
            database: DatabaseHealth {
                connected: report.database_connected,
            },
            websocket: WebsocketHealth {
                connected: report.websocket_connected,
                last_block_time: report.last_block_time_ms,
                block_age: report.block_age_secs,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: &'static str,
    pending_bets: usize,
    start_time: u64,
    database_connected: bool,
}

impl From<&StatusReport> for StatusBody {
    fn from(report: &StatusReport) -> Self {
        Self {
            status: if report.running { "running" } else { "stopped" },
            pending_bets: report.pending_bets,
            start_time: report.start_time_ms,
            database_connected: report.database_connected,
        }
    }
}

pub fn make_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(STATUS_PATH, get(status))
        .route(METRICS_PATH, get(metrics))
        .with_state(state)
}

pub fn run_server(socket_address: &SocketAddr, state: AppState) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        info!("[Server] Listening on {}", socket_address);
        let listener = tokio::net::TcpListener::bind(socket_address).await.unwrap();
        axum::serve(listener, make_router(state).into_make_service())
            .await
            .unwrap();
    })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.service.health().await;
    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthBody::from(&report)))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.service.status().await;
    Json(StatusBody::from(&report))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        );
    }
    (
        StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
