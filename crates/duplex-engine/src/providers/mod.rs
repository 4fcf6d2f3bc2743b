//! Production-grade default implementations of the engine's provider traits
//! (§6.3, §6.4, §6.2), plus a stub ASR provider for configurations without a
//! real speech recognizer.

pub mod asr_stub;
pub mod asr_whisper;
pub mod llm_openai;
pub mod tts_kokoro;

pub use asr_stub::StubAsrProvider;
pub use asr_whisper::WhisperAsrProvider;
pub use llm_openai::OpenAiLlmProvider;
pub use tts_kokoro::KokoroTtsProvider;
