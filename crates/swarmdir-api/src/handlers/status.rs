//! /status, /peers handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use swarmdir_services::PeerSummary;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub peers: usize,
    pub chunks: usize,
    pub files: usize,
    pub relays_in_flight: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let stats = state.registry.stats();
    Json(StatusResponse {
        peers: stats.peers,
        chunks: stats.chunks,
        files: stats.files,
        relays_in_flight: stats.relays_in_flight,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerSummary>,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.registry.peers(),
    })
}

// ── /peers/{name} ─────────────────────────────────────────────────────────────

pub async fn handle_peer(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<PeerSummary>, (StatusCode, String)> {
    state
        .registry
        .peers()
        .into_iter()
        .find(|p| p.name == name)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("unknown peer {name}")))
}
