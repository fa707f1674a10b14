pub mod api;
pub mod errors;
pub mod store;
pub mod sync_handler;
pub mod websocket;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use store::TaskStore;

#[derive(Clone, Default)]
pub struct AppState {
    pub store: Arc<TaskStore>,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open sync sockets.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Count a socket as open until the returned guard drops.
    pub fn track_connection(&self) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard(self.connections.clone())
    }
}

pub struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Full HTTP surface: the sync socket, health check and read-only task API.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(api::health))
        .route("/api/tasks", get(api::list_tasks))
        .route("/api/tasks/:id", get(api::get_task))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_websocket(socket, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard_tracks_open_sockets() {
        let state = AppState::new();
        let first = state.track_connection();
        let second = state.clone().track_connection();
        assert_eq!(state.connection_count(), 2);

        drop(first);
        assert_eq!(state.connection_count(), 1);
        drop(second);
        assert_eq!(state.connection_count(), 0);
    }
}
