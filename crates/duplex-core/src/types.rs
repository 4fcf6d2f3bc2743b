//! Shared wire/value types for the duplex voice assistant ecosystem.
//!
//! Mirrors spec.md §3 (DATA MODEL) exactly. Kept free of tokio/serde-runtime
//! dependencies beyond `serde` itself so `duplex-server` and `duplex-engine`
//! can both depend on it without pulling in the engine's worker plumbing.

use serde::{Deserialize, Serialize};

/// Free-form metadata carried alongside events and messages.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ─── Audio ──────────────────────────────────────────────────────────────

/// Mono PCM audio as produced by the audio ingest source and consumed once
/// by perception. Samples are 32-bit floats in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    /// Wall-clock arrival time, seconds since `UNIX_EPOCH`.
    pub timestamp_s: f64,
}

impl AudioFrame {
    pub fn new(pcm: Vec<f32>, sample_rate: u32, timestamp_s: f64) -> Self {
        Self {
            pcm,
            sample_rate,
            timestamp_s,
        }
    }
}

/// Raw little-endian signed 16-bit PCM produced by the TTS worker and
/// consumed by the audio sink. `None` in the `audio_chunk_queue` is the
/// end-of-stream sentinel (spec.md §3 AudioChunk).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }
}

// ─── TTS request ────────────────────────────────────────────────────────

/// A single utterance to be synthesized. Enqueued by the brain only once
/// its originating turn has finished emitting text (spec.md §3 invariant).
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub language: String,
    pub voice: Option<String>,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: "auto".to_string(),
            voice: None,
        }
    }
}

// ─── Brain input ────────────────────────────────────────────────────────

/// Origin of a [`BrainInputEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    Text,
    Audio,
    System,
}

/// One user turn handed to the brain orchestrator, from either perception
/// (audio) or the client channel adapter (keyboard text).
#[derive(Debug, Clone)]
pub struct BrainInputEvent {
    pub source: SourceKind,
    pub text: String,
    pub user: String,
    pub language: Option<String>,
    pub confidence: Option<f32>,
    pub timestamp_s: f64,
    pub metadata: Metadata,
}

impl BrainInputEvent {
    pub fn audio(text: impl Into<String>, user: impl Into<String>, timestamp_s: f64) -> Self {
        Self {
            source: SourceKind::Audio,
            text: text.into(),
            user: user.into(),
            language: None,
            confidence: None,
            timestamp_s,
            metadata: Metadata::new(),
        }
    }

    pub fn text(text: impl Into<String>, user: impl Into<String>, timestamp_s: f64) -> Self {
        Self {
            source: SourceKind::Text,
            text: text.into(),
            user: user.into(),
            language: None,
            confidence: None,
            timestamp_s,
            metadata: Metadata::new(),
        }
    }
}

// ─── UI-facing messages ─────────────────────────────────────────────────

/// Semantic role of a streaming delta (spec.md §3 UpdateKind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    Thought,
    ToolCall,
    ToolResult,
    Text,
}

/// One streamed piece of user transcript or assistant output.
#[derive(Debug, Clone)]
pub struct DisplayMessage {
    pub speaker: String,
    pub text: String,
    pub is_user: bool,
    pub is_final: bool,
    pub msg_id: Option<String>,
    pub update_kind: UpdateKind,
    pub metadata: Metadata,
}

impl DisplayMessage {
    pub fn user_transcript(speaker: impl Into<String>, text: impl Into<String>, is_final: bool, msg_id: String) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            is_user: true,
            is_final,
            msg_id: Some(msg_id),
            update_kind: UpdateKind::Text,
            metadata: Metadata::new(),
        }
    }

    pub fn assistant_delta(
        text: impl Into<String>,
        msg_id: String,
        update_kind: UpdateKind,
        metadata: Metadata,
    ) -> Self {
        Self {
            speaker: "Brain".to_string(),
            text: text.into(),
            is_user: false,
            is_final: false,
            msg_id: Some(msg_id),
            update_kind,
            metadata,
        }
    }

    pub fn assistant_final(msg_id: String) -> Self {
        Self {
            speaker: "Brain".to_string(),
            text: String::new(),
            is_user: false,
            is_final: true,
            msg_id: Some(msg_id),
            update_kind: UpdateKind::Text,
            metadata: Metadata::new(),
        }
    }
}

/// Closed set of signal tags (spec.md §3 SignalMessage / §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Ready,
    ProcessingStarted,
    ProcessingEnded,
    TtsEnded,
    Interrupt,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Ready => "ready",
            SignalKind::ProcessingStarted => "processing_started",
            SignalKind::ProcessingEnded => "processing_ended",
            SignalKind::TtsEnded => "tts_ended",
            SignalKind::Interrupt => "interrupt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub kind: SignalKind,
    pub msg_id: Option<String>,
    pub metadata: Metadata,
}

impl SignalMessage {
    pub fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            msg_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_msg_id(kind: SignalKind, msg_id: impl Into<String>) -> Self {
        Self {
            kind,
            msg_id: Some(msg_id.into()),
            metadata: Metadata::new(),
        }
    }
}

/// Everything that flows over the (unbounded) UI queue: either a display
/// message or a lifecycle signal. Replaces the original's duck-typed union
/// (spec.md §9) with a tagged sum type.
#[derive(Debug, Clone)]
pub enum UiMessage {
    Display(DisplayMessage),
    Signal(SignalMessage),
}

impl From<DisplayMessage> for UiMessage {
    fn from(m: DisplayMessage) -> Self {
        UiMessage::Display(m)
    }
}

impl From<SignalMessage> for UiMessage {
    fn from(m: SignalMessage) -> Self {
        UiMessage::Signal(m)
    }
}
