//! OpenAI-compatible streaming chat completion provider (§6.3).
//!
//! Grounded on the hand-rolled SSE parser pattern other agent code in this
//! ecosystem uses (`bytes_stream()` + manual `data: ` line buffering)
//! rather than an SSE crate, since the upstream APIs we target don't always
//! emit strictly compliant event framing.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use duplex_core::history::{HistoryMessage, Role};

use crate::brain::{DeltaStream, LlmDelta, LlmProvider, PendingToolCall};

pub struct OpenAiLlmProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiLlmProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

fn to_wire(message: &HistoryMessage) -> WireMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    WireMessage {
        role,
        content: message.content.clone(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn stream_turn(&self, history: &[HistoryMessage], tool_manifest: &[Value]) -> Result<DeltaStream, String> {
        let request = ChatRequest {
            model: &self.model,
            messages: history.iter().map(to_wire).collect(),
            stream: true,
            tools: if tool_manifest.is_empty() { None } else { Some(tool_manifest) },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("LLM API error ({status}): {body}"));
        }

        let byte_stream = response.bytes_stream();
        let state = SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            pending: VecDeque::new(),
            tool_fragments: BTreeMap::new(),
            done: false,
        };

        let stream = futures_util::stream::unfold(state, step);
        Ok(Box::pin(stream) as DeltaStream)
    }
}

struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    pending: VecDeque<Result<LlmDelta, String>>,
    tool_fragments: BTreeMap<u32, ToolCallBuilder>,
    done: bool,
}

async fn step(mut state: SseState) -> Option<(Result<LlmDelta, String>, SseState)> {
    loop {
        if let Some(item) = state.pending.pop_front() {
            return Some((item, state));
        }
        if state.done {
            return None;
        }

        match state.byte_stream.next().await {
            None => {
                state.done = true;
                let calls = drain_tool_calls(&mut state.tool_fragments);
                state.pending.push_back(Ok(LlmDelta::End { pending_tool_calls: calls }));
            }
            Some(Err(err)) => {
                state.done = true;
                return Some((Err(err.to_string()), state));
            }
            Some(Ok(bytes)) => {
                state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = state.buffer.find("\n\n") {
                    let event = state.buffer[..pos].to_string();
                    state.buffer.drain(..pos + 2);

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            let calls = drain_tool_calls(&mut state.tool_fragments);
                            state.pending.push_back(Ok(LlmDelta::End { pending_tool_calls: calls }));
                            state.done = true;
                            continue;
                        }
                        if let Ok(value) = serde_json::from_str::<Value>(data) {
                            push_deltas(&value, &mut state.tool_fragments, &mut state.pending);
                        }
                    }
                }
            }
        }
    }
}

fn push_deltas(
    value: &Value,
    tool_fragments: &mut BTreeMap<u32, ToolCallBuilder>,
    pending: &mut VecDeque<Result<LlmDelta, String>>,
) {
    let Some(delta) = value.pointer("/choices/0/delta") else { return };

    if let Some(content) = delta.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            pending.push_back(Ok(LlmDelta::Text(content.to_string())));
        }
    }
    if let Some(reasoning) = delta.get("reasoning").and_then(Value::as_str) {
        if !reasoning.is_empty() {
            pending.push_back(Ok(LlmDelta::Thought(reasoning.to_string())));
        }
    }

    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
            let entry = tool_fragments.entry(index).or_insert_with(|| ToolCallBuilder {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                entry.id = id.to_string();
            }
            let mut name = None;
            if let Some(function) = call.get("function") {
                if let Some(n) = function.get("name").and_then(Value::as_str) {
                    entry.name = n.to_string();
                    name = Some(n.to_string());
                }
                if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                    entry.arguments.push_str(args);
                }
            }
            let fragment = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            pending.push_back(Ok(LlmDelta::ToolCallFragment {
                index,
                name,
                arguments_fragment: fragment,
            }));
        }
    }
}

fn drain_tool_calls(tool_fragments: &mut BTreeMap<u32, ToolCallBuilder>) -> Vec<PendingToolCall> {
    std::mem::take(tool_fragments)
        .into_iter()
        .filter(|(_, builder)| !builder.name.is_empty())
        .map(|(index, builder)| PendingToolCall {
            index,
            id: if builder.id.is_empty() {
                format!("call_{index}")
            } else {
                builder.id
            },
            name: builder.name,
            arguments: if builder.arguments.is_empty() {
                "{}".to_string()
            } else {
                builder.arguments
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_deltas_extracts_text_content() {
        let value = json!({"choices": [{"delta": {"content": "hello"}}]});
        let mut tool_fragments = BTreeMap::new();
        let mut pending = VecDeque::new();
        push_deltas(&value, &mut tool_fragments, &mut pending);
        assert!(matches!(pending.pop_front(), Some(Ok(LlmDelta::Text(t))) if t == "hello"));
    }

    #[test]
    fn push_deltas_accumulates_tool_call_arguments_across_fragments() {
        let mut tool_fragments = BTreeMap::new();
        let mut pending = VecDeque::new();

        let first = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "function": {"name": "calculate", "arguments": "{\"expr"}}
        ]}}]});
        push_deltas(&first, &mut tool_fragments, &mut pending);

        let second = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "ession\": \"2+2\"}"}}
        ]}}]});
        push_deltas(&second, &mut tool_fragments, &mut pending);

        let calls = drain_tool_calls(&mut tool_fragments);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calculate");
        assert_eq!(calls[0].arguments, "{\"expression\": \"2+2\"}");
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn drain_tool_calls_skips_entries_with_no_name() {
        let mut tool_fragments = BTreeMap::new();
        tool_fragments.insert(
            0,
            ToolCallBuilder {
                id: "call_x".to_string(),
                name: String::new(),
                arguments: String::new(),
            },
        );
        assert!(drain_tool_calls(&mut tool_fragments).is_empty());
    }
}
