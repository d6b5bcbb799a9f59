//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    arena: String,
    players: usize,
    sessions: usize,
    ticks: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        arena: state.config.arena_channel.clone(),
        players: state.world.player_count(),
        sessions: state.liveness.session_count(),
        ticks: state.ticker.tick_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fanout::LocalBroker;

    #[tokio::test]
    async fn health_reports_arena_counts() {
        let state = AppState::new(Config::default(), LocalBroker::shared());
        state.world.create_player("a1");
        state.ticker.tick_once();

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.arena, "game1");
        assert_eq!(health.players, 1);
        assert_eq!(health.sessions, 0);
        assert_eq!(health.ticks, 1);
    }
}
