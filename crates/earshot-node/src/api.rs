//! HTTP API for Earshot.
//!
//! `/sync` is called by the game server plugin on every position tick and
//! must answer immediately; voice-state updates come from the gateway relay.

use crate::node::NodeState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use earshot_core::{ChannelId, IdentityId, PlayerState, Position};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

type AppState = Arc<NodeState>;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/sync", post(sync))
        .route("/api/v1/voice-state", post(voice_state))
        .route("/api/v1/players", get(list_players))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> &'static str {
    "Earshot proximity voice node"
}

async fn health() -> &'static str {
    "OK"
}

// --- Position reports ---

#[derive(Debug, Deserialize)]
struct SyncRequest {
    name: Option<String>,
    x: Option<f64>,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

async fn sync(
    State(state): State<AppState>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> (StatusCode, &'static str) {
    let Ok(Json(req)) = body else {
        return (StatusCode::BAD_REQUEST, "invalid body");
    };
    let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing name");
    };
    let Some(x) = req.x else {
        return (StatusCode::BAD_REQUEST, "missing x");
    };

    state.engine.submit(name, Position::new(x, req.y, req.z));
    (StatusCode::OK, "OK")
}

// --- Voice state relay ---

#[derive(Debug, Deserialize)]
struct VoiceStateUpdate {
    identity: String,
    /// `null` when the member left voice
    channel: Option<String>,
}

async fn voice_state(
    State(state): State<AppState>,
    body: Result<Json<VoiceStateUpdate>, JsonRejection>,
) -> StatusCode {
    let Ok(Json(update)) = body else {
        return StatusCode::BAD_REQUEST;
    };
    if update.identity.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    state
        .voice
        .apply(
            IdentityId::from(update.identity.trim()),
            update.channel.map(ChannelId::from),
        )
        .await;
    StatusCode::NO_CONTENT
}

// --- Debug view ---

#[derive(Debug, Serialize)]
struct PlayerView {
    name: String,
    key: String,
    x: f64,
    y: f64,
    z: f64,
    identity: Option<IdentityId>,
    partner: Option<String>,
    age_ms: u64,
}

async fn list_players(State(state): State<AppState>) -> Json<Vec<PlayerView>> {
    let now = Instant::now();
    let players = state
        .engine
        .registry()
        .snapshot()
        .into_iter()
        .map(|p| {
            let partner = match state.engine.player_state(&p.key) {
                PlayerState::Paired(partner) => Some(partner.to_string()),
                PlayerState::Solo => None,
            };
            PlayerView {
                key: p.key.to_string(),
                x: p.position.x,
                y: p.position.y,
                z: p.position.z,
                age_ms: p.age(now).as_millis() as u64,
                name: p.name,
                identity: p.identity,
                partner,
            }
        })
        .collect();
    Json(players)
}
