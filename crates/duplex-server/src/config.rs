//! Process configuration (ambient stack): a single `clap` derive struct
//! covering bind address, provider endpoints, and the tunables the spec
//! leaves as implementation-defined (tool-loop cap, session conflict
//! policy), each overridable by environment variable.

use clap::Parser;

use duplex_engine::brain::{BrainConfig, DEFAULT_MAX_TOOL_ITERATIONS};
use duplex_engine::registry::SessionConflictPolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "duplex-server", about = "Real-time voice assistant backend")]
pub struct ServerConfig {
    /// Address the WebSocket server binds to.
    #[arg(long, env = "DUPLEX_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Base URL of the OpenAI-compatible chat completions endpoint.
    #[arg(long, env = "DUPLEX_LLM_BASE_URL", default_value = "http://localhost:11434/v1")]
    pub llm_base_url: String,

    /// API key for the LLM endpoint, if it requires one.
    #[arg(long, env = "DUPLEX_LLM_API_KEY", default_value = "")]
    pub llm_api_key: String,

    /// Model id to request from the LLM endpoint.
    #[arg(long, env = "DUPLEX_LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,

    /// Base URL of the Kokoro-compatible TTS endpoint.
    #[arg(long, env = "DUPLEX_TTS_BASE_URL", default_value = "http://localhost:8880/v1")]
    pub tts_base_url: String,

    /// Default TTS voice id.
    #[arg(long, env = "DUPLEX_TTS_VOICE", default_value = "af_heart")]
    pub tts_voice: String,

    /// Default TTS speaking rate.
    #[arg(long, env = "DUPLEX_TTS_SPEED", default_value_t = 1.0)]
    pub tts_speed: f32,

    /// Optional Whisper-compatible transcription endpoint. When unset,
    /// sessions use the null ASR provider (text-only deployments).
    #[arg(long, env = "DUPLEX_ASR_BASE_URL")]
    pub asr_base_url: Option<String>,

    /// Model name to pass to the transcription endpoint.
    #[arg(long, env = "DUPLEX_ASR_MODEL", default_value = "base")]
    pub asr_model: String,

    /// System prompt every session's conversation history starts from.
    #[arg(
        long,
        env = "DUPLEX_SYSTEM_PROMPT",
        default_value = "You are a helpful voice assistant. Keep responses concise and conversational."
    )]
    pub system_prompt: String,

    /// Number of user/assistant turn pairs retained in conversation history.
    #[arg(long, env = "DUPLEX_MAX_TURNS", default_value_t = 10)]
    pub max_turns: usize,

    /// Hard cap on tool-call loop iterations per turn (§9 Open Question).
    #[arg(long, env = "DUPLEX_MAX_TOOL_ITERATIONS", default_value_t = DEFAULT_MAX_TOOL_ITERATIONS)]
    pub max_tool_iterations: usize,

    /// What happens when a new connection claims an id already in use
    /// (§9 Open Question, resolved as configurable).
    #[arg(long, env = "DUPLEX_SESSION_CONFLICT", default_value = "take-over")]
    pub session_conflict: SessionConflictArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SessionConflictArg {
    TakeOver,
    Reject,
}

impl From<SessionConflictArg> for SessionConflictPolicy {
    fn from(arg: SessionConflictArg) -> Self {
        match arg {
            SessionConflictArg::TakeOver => SessionConflictPolicy::TakeOver,
            SessionConflictArg::Reject => SessionConflictPolicy::Reject,
        }
    }
}

impl ServerConfig {
    pub fn brain_config(&self) -> BrainConfig {
        BrainConfig {
            max_turns: self.max_turns,
            max_tool_iterations: self.max_tool_iterations,
            speech_interrupt_enabled: true,
        }
    }
}
