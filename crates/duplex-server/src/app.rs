//! Shared application state and router assembly: one `State<AppState>` axum
//! router with permissive CORS, wiring provider configuration into the
//! per-connection session graph.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use duplex_engine::perception::AsrProvider;
use duplex_engine::providers::{KokoroTtsProvider, OpenAiLlmProvider, StubAsrProvider, WhisperAsrProvider};
use duplex_engine::registry::SessionRegistry;
use duplex_engine::tools::{CalculatorTool, ToolRegistry};
use duplex_engine::tts_worker::TtsProvider;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<ServerConfig>,
    pub llm: Arc<OpenAiLlmProvider>,
    pub tts: Arc<KokoroTtsProvider>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);

        let llm = Arc::new(OpenAiLlmProvider::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        ));
        let tts = Arc::new(
            KokoroTtsProvider::new(config.tts_base_url.clone(), config.tts_voice.clone()).with_speed(config.tts_speed),
        );

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        let tools = Arc::new(registry);

        let registry = Arc::new(SessionRegistry::new(config.session_conflict.into()));

        Self {
            registry,
            config,
            llm,
            tts,
            tools,
        }
    }

    /// Every session gets its own ASR provider instance since implementations
    /// are inherently stateful per-utterance (§6.2).
    pub fn new_asr_provider(&self) -> Box<dyn AsrProvider> {
        match &self.config.asr_base_url {
            Some(base_url) => Box::new(WhisperAsrProvider::new(base_url.clone(), self.config.asr_model.clone())),
            None => Box::new(StubAsrProvider),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{session_id}", get(crate::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// Ensure the TTS/LLM trait objects actually satisfy the traits the engine
// workers require, independent of any one session's wiring.
#[allow(dead_code)]
fn assert_provider_bounds(llm: Arc<OpenAiLlmProvider>, tts: Arc<KokoroTtsProvider>) {
    fn takes_llm(_: Arc<dyn duplex_engine::brain::LlmProvider>) {}
    fn takes_tts(_: Arc<dyn TtsProvider>) {}
    takes_llm(llm);
    takes_tts(tts);
}
