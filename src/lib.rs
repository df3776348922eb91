pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod repository;
pub mod repository_traits;
pub mod stream;
pub mod tax;
pub mod tools;
pub mod transport;
pub mod voice;

use reqwest::Client;
use std::sync::Arc;

use crate::config::Config;
use crate::handlers::AppState;
use crate::orchestrator::Orchestrator;
use crate::repository::{RestAuthenticator, RestRecordStore};
use crate::tax::TaxCalculator;
use crate::tools::ToolDispatcher;
use crate::transport::GatewayTransport;
use crate::voice::ElevenLabsVoice;

/// Wires the HTTP-backed implementations behind every seam
pub fn build_state(cfg: &Config, http: Client) -> AppState {
    let store = Arc::new(RestRecordStore::new(http.clone(), &cfg.store));
    let dispatcher = ToolDispatcher::new(store, TaxCalculator::default());
    let gateway = Arc::new(GatewayTransport::new(http.clone(), &cfg.gateway));

    AppState {
        orchestrator: Arc::new(Orchestrator::new(
            gateway,
            dispatcher,
            cfg.gateway.model.clone(),
        )),
        auth: Arc::new(RestAuthenticator::new(http.clone(), &cfg.store)),
        voice: Arc::new(ElevenLabsVoice::new(http, cfg.voice.clone())),
    }
}
