//! Client↔server wire protocol (§6.1): JSON text messages plus raw binary
//! PCM frames, multiplexed over one full-duplex connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use duplex_core::types::{DisplayMessage, Metadata, SignalMessage, UiMessage, UpdateKind};

fn update_kind_str(kind: UpdateKind) -> &'static str {
    match kind {
        UpdateKind::Thought => "THOUGHT",
        UpdateKind::ToolCall => "TOOL_CALL",
        UpdateKind::ToolResult => "TOOL_RESULT",
        UpdateKind::Text => "TEXT",
    }
}

/// One JSON text message, either direction (§6.1 field table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl WireMessage {
    fn new(msg_type: &str, content: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            content: content.into(),
            is_final: None,
            is_user: None,
            msg_id: None,
            session_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Server → client: `{type:"signal", content:"ready", session_id}` sent
/// immediately on accept (§6.1).
pub fn ready_message(session_id: &str) -> WireMessage {
    WireMessage::new("signal", "ready").with_session_id(session_id)
}

/// Converts an engine-internal [`UiMessage`] into the wire shape the client
/// expects, dispatching on whether it's a transcript/delta or a lifecycle
/// signal.
pub fn ui_message_to_wire(message: &UiMessage) -> WireMessage {
    match message {
        UiMessage::Display(display) => display_to_wire(display),
        UiMessage::Signal(signal) => signal_to_wire(signal),
    }
}

fn display_to_wire(display: &DisplayMessage) -> WireMessage {
    // User transcripts are "transcript"; assistant deltas are "text" for
    // plain TEXT updates and "update" for THOUGHT/TOOL_CALL/TOOL_RESULT,
    // matching §6.1's enumerated server→client type list.
    let msg_type = if display.is_user {
        "transcript"
    } else if display.update_kind == UpdateKind::Text {
        "text"
    } else {
        "update"
    };

    let mut metadata = display.metadata.clone();
    metadata.insert("update_type".to_string(), Value::String(update_kind_str(display.update_kind).to_string()));

    WireMessage {
        msg_type: msg_type.to_string(),
        content: display.text.clone(),
        is_final: Some(display.is_final),
        is_user: Some(display.is_user),
        msg_id: display.msg_id.clone(),
        session_id: None,
        metadata,
    }
}

fn signal_to_wire(signal: &SignalMessage) -> WireMessage {
    WireMessage {
        msg_type: "signal".to_string(),
        content: signal.kind.as_str().to_string(),
        is_final: None,
        is_user: None,
        msg_id: signal.msg_id.clone(),
        session_id: None,
        metadata: signal.metadata.clone(),
    }
}

/// What the client asked the session to do, parsed from an inbound
/// `WireMessage`. Anything else is bad input (§7) and is dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIntent {
    Interrupt,
    Input(String),
}

pub fn parse_client_intent(raw: &str) -> Option<ClientIntent> {
    let message: WireMessage = serde_json::from_str(raw).ok()?;
    match message.msg_type.as_str() {
        "signal" if message.content == "interrupt" => Some(ClientIntent::Interrupt),
        "input" => Some(ClientIntent::Input(message.content)),
        _ => None,
    }
}
