//! InkRoom Server
//!
//! Room server for the InkRoom shared whiteboard. Clients connect over a
//! WebSocket, join one room for the lifetime of the connection and exchange
//! JSON events (see [`inkroom_core::protocol`]). The server owns each room's
//! operation history and global undo/redo; cursors and stroke previews are
//! relayed without being stored.
//!
//! ## Endpoints
//!
//! - `GET /`: banner
//! - `GET /health`: `ok`
//! - `GET /ws?room=<id>`: WebSocket, room defaults to `lobby`
//!
//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 3000)
//! - `DEFAULT_ROOM`: Room used when none is given (default: lobby)
//! - `CHANNEL_CAPACITY`: Broadcast buffer per room (default: 256)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins (default: any)

pub mod config;
pub mod rooms;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::{Router, http::HeaderValue, routing::get};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

pub use config::Config;
pub use rooms::Rooms;
pub use session::Session;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<Rooms>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Arc::new(Rooms::new(config.channel_capacity)),
            config: Arc::new(config),
        }
    }
}

/// Build the HTTP router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}

/// Index page
async fn index() -> &'static str {
    "InkRoom Server - Connect via WebSocket at /ws?room=<id>"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}
