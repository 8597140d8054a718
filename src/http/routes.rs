//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::game::GameSetup;
use crate::session::ServerStatus;
use crate::util::time::{started_at, uptime_secs};
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/game-types", get(game_types_handler))
        .route("/game-types/:game_type", get(game_type_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    started_at: Option<String>,
    open_sockets: usize,
    oldest_connection_at: Option<String>,
    messages_in: u64,
    rate_limited: u64,
    server: ServerStatus,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let (messages_in, rate_limited) = state.message_totals();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        started_at: started_at().map(|t| t.to_rfc3339()),
        open_sockets: state.connections.len(),
        oldest_connection_at: state.oldest_connection().map(|t| t.to_rfc3339()),
        messages_in,
        rate_limited,
        server: state.server.status(),
    })
}

// ============================================================================
// Game type presets
// ============================================================================

#[derive(Serialize)]
struct GameTypesResponse {
    default_game_type: String,
    game_types: Vec<String>,
}

async fn game_types_handler(State(state): State<AppState>) -> Json<GameTypesResponse> {
    Json(GameTypesResponse {
        default_game_type: state.config.default_game_type.clone(),
        game_types: state.presets.game_types(),
    })
}

async fn game_type_handler(
    State(state): State<AppState>,
    Path(game_type): Path<String>,
) -> Result<Json<GameSetup>, AppError> {
    state
        .presets
        .get(&game_type)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("game type '{game_type}'")))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
