/// HTTP endpoints for the chat and voice surfaces
pub mod chat;
pub mod voice;

use axum::Router;
use axum::http::{HeaderName, Method, header};
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;
use crate::repository_traits::Authenticator;
use crate::voice::VoiceProvider;

/// Shared, read-only state; requests never mutate it
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<dyn Authenticator>,
    pub voice: Arc<dyn VoiceProvider>,
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let voice_base = server.voice_path.trim_end_matches('/');
    Router::new()
        .route(&server.chat_path, post(chat::chat))
        .route(&format!("{voice_base}/tts"), post(voice::tts))
        .route(&format!("{voice_base}/stt"), post(voice::stt))
        .route("/health", get(|| async { "ok" }))
        .layer(cors())
        .with_state(state)
}

/// The browser UI calls every endpoint cross-origin
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}
