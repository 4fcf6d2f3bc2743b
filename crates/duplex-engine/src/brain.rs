//! Brain orchestrator (spec §4.4): the hardest subsystem. Consumes
//! brain-input events serially, runs a streaming LLM turn with a bounded
//! tool-call loop, and emits lifecycle signals plus delta messages under
//! the shared interrupt discipline.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use duplex_core::history::{ConversationHistory, HistoryMessage};
use duplex_core::types::{
    BrainInputEvent, DisplayMessage, Metadata, SignalKind, SignalMessage, TtsRequest, UiMessage,
    UpdateKind,
};

use crate::error::EngineError;
use crate::runtime::RuntimeContext;
use crate::session::InterruptController;
use crate::tools::{truncate_tool_result, ToolRegistry};

/// Truncation length for TOOL_RESULT deltas streamed to the UI (§4.4).
pub const TOOL_RESULT_DISPLAY_LEN: usize = 200;
/// Conservative bound on tool-call loop iterations (§9 Open Question).
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 8;

/// One fragment of a tool call the provider is still assembling; multiple
/// fragments with the same `index` belong to the same call.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    /// Fully assembled JSON-encoded argument object.
    pub arguments: String,
}

/// One item of the LLM's delta stream (§6.3).
#[derive(Debug, Clone)]
pub enum LlmDelta {
    Thought(String),
    Text(String),
    ToolCallFragment {
        index: u32,
        name: Option<String>,
        arguments_fragment: String,
    },
    /// End of this stream invocation; carries any tool calls that need
    /// executing before the orchestrator re-invokes the provider.
    End { pending_tool_calls: Vec<PendingToolCall> },
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<LlmDelta, String>> + Send>>;

/// §6.3: accepts conversation history and a tool manifest, returns an
/// asynchronous delta stream. Must honor cancellation promptly — the
/// orchestrator simply drops the stream when it decides to stop polling it.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream_turn(
        &self,
        history: &[HistoryMessage],
        tool_manifest: &[Value],
    ) -> Result<DeltaStream, String>;
}

enum TurnOutcome {
    Completed { full_text: String },
    Interrupted,
    Error(String),
}

pub struct BrainConfig {
    pub max_turns: usize,
    pub max_tool_iterations: usize,
    pub speech_interrupt_enabled: bool,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            speech_interrupt_enabled: true,
        }
    }
}

pub struct BrainOrchestrator {
    history: ConversationHistory,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: BrainConfig,
}

impl BrainOrchestrator {
    pub fn new(
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: BrainConfig,
    ) -> Self {
        Self {
            history: ConversationHistory::new(system_prompt, config.max_turns),
            llm,
            tools,
            config,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Consumes brain-input events until the queue closes. `exit_tx` is
    /// notified (rather than the brain closing the session itself) so that
    /// teardown happens from outside this worker's own task, avoiding a
    /// self-join deadlock.
    pub async fn run(
        mut self,
        runtime: Arc<RuntimeContext>,
        interrupt: InterruptController,
        exit_tx: mpsc::UnboundedSender<()>,
    ) {
        while let Some(event) = runtime.recv_brain_input().await {
            self.handle_turn(event, &runtime, &interrupt, &exit_tx).await;
        }
    }

    async fn handle_turn(
        &mut self,
        event: BrainInputEvent,
        runtime: &RuntimeContext,
        interrupt: &InterruptController,
        exit_tx: &mpsc::UnboundedSender<()>,
    ) {
        let text = event.text.trim();
        if text.is_empty() {
            return;
        }

        if text == "quit" || text == "exit" {
            interrupt.trigger().await;
            let _ = exit_tx.send(());
            return;
        }

        // Step 2: clear the flag — a fresh turn is a fresh speaking context.
        interrupt.flag.clear();
        self.history.push(HistoryMessage::user(text));

        let assistant_msg_id = format!("assistant_{}", Uuid::new_v4().simple());
        let ui_tx = runtime.ui_tx();
        let _ = ui_tx.send(UiMessage::from(SignalMessage::with_msg_id(
            SignalKind::ProcessingStarted,
            assistant_msg_id.clone(),
        )));

        let outcome = self.run_streaming_turn(&assistant_msg_id, &ui_tx, interrupt).await;

        // Each arm pushes its own closing DisplayMessage first; only once
        // the visual block is actually closed does processing_ended fire,
        // in a deferred-cleanup path that runs on every outcome.
        match outcome {
            TurnOutcome::Completed { full_text } => {
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_final(
                    assistant_msg_id.clone(),
                )));
                if !full_text.is_empty() {
                    self.history.push(HistoryMessage::assistant(full_text.clone()));
                    let _ = runtime.audio_output_tx().send(TtsRequest::new(full_text));
                }
            }
            TurnOutcome::Interrupted => {
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_final(
                    assistant_msg_id.clone(),
                )));
                // No TTS enqueued, no history append: the user has
                // effectively superseded this turn.
            }
            TurnOutcome::Error(message) => {
                tracing::error!("stream processing error: {message}");
                let fresh_id = format!("assistant_{}", Uuid::new_v4().simple());
                let apology = localized_apology(event.language.as_deref());
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_delta(
                    apology,
                    fresh_id.clone(),
                    UpdateKind::Text,
                    Metadata::new(),
                )));
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_final(fresh_id)));
            }
        }

        let _ = ui_tx.send(UiMessage::from(SignalMessage::with_msg_id(
            SignalKind::ProcessingEnded,
            assistant_msg_id,
        )));
    }

    async fn run_streaming_turn(
        &mut self,
        assistant_msg_id: &str,
        ui_tx: &mpsc::UnboundedSender<UiMessage>,
        interrupt: &InterruptController,
    ) -> TurnOutcome {
        let mut full_text = String::new();
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            if iterations > self.config.max_tool_iterations {
                return TurnOutcome::Error(
                    EngineError::ToolLoopCap {
                        limit: self.config.max_tool_iterations,
                    }
                    .to_string(),
                );
            }

            let manifest = self.tools.manifest();
            let mut stream = match self.llm.stream_turn(self.history.messages(), &manifest).await {
                Ok(stream) => stream,
                Err(err) => return TurnOutcome::Error(err),
            };

            let mut pending_tool_calls: Vec<PendingToolCall> = Vec::new();

            while let Some(delta) = stream.next().await {
                if self.config.speech_interrupt_enabled && interrupt.flag.is_set() {
                    return TurnOutcome::Interrupted;
                }

                match delta {
                    Err(err) => return TurnOutcome::Error(err),
                    Ok(LlmDelta::Thought(text)) => {
                        let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_delta(
                            text,
                            assistant_msg_id.to_string(),
                            UpdateKind::Thought,
                            Metadata::new(),
                        )));
                    }
                    Ok(LlmDelta::Text(text)) => {
                        full_text.push_str(&text);
                        let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_delta(
                            text,
                            assistant_msg_id.to_string(),
                            UpdateKind::Text,
                            Metadata::new(),
                        )));
                    }
                    Ok(LlmDelta::ToolCallFragment {
                        index,
                        name,
                        arguments_fragment,
                    }) => {
                        let mut meta = Metadata::new();
                        meta.insert("index".to_string(), json!(index));
                        if let Some(name) = &name {
                            meta.insert("name".to_string(), json!(name));
                        }
                        let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_delta(
                            arguments_fragment,
                            assistant_msg_id.to_string(),
                            UpdateKind::ToolCall,
                            meta,
                        )));
                    }
                    Ok(LlmDelta::End { pending_tool_calls: calls }) => {
                        pending_tool_calls = calls;
                    }
                }
            }

            if pending_tool_calls.is_empty() {
                return TurnOutcome::Completed { full_text };
            }

            let mut assistant_summary = String::new();
            for call in &pending_tool_calls {
                assistant_summary.push_str(&format!("{}({})\n", call.name, call.arguments));
            }
            self.history.push(HistoryMessage::assistant(assistant_summary));

            for call in pending_tool_calls {
                let result = self.tools.call(&call.name, &call.arguments).await;
                let result_text = result.to_string();
                let truncated = truncate_tool_result(&result_text, TOOL_RESULT_DISPLAY_LEN);

                let mut meta = Metadata::new();
                meta.insert("name".to_string(), json!(call.name));
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::assistant_delta(
                    truncated,
                    assistant_msg_id.to_string(),
                    UpdateKind::ToolResult,
                    meta,
                )));

                self.history.push(HistoryMessage::tool(result_text, call.id));
            }
            // Loop back: re-invoke the provider with the extended history.
        }
    }
}

fn localized_apology(language: Option<&str>) -> String {
    match language {
        Some(lang) if lang.starts_with("zh") => "对不起，出现错误，请重试。".to_string(),
        _ => "Sorry, an error occurred. Please try again.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, FutureExt};
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlm {
        // one Vec<LlmDelta> per invocation of stream_turn
        invocations: StdMutex<std::vec::IntoIter<Vec<Result<LlmDelta, String>>>>,
    }

    impl ScriptedLlm {
        fn new(invocations: Vec<Vec<Result<LlmDelta, String>>>) -> Self {
            Self {
                invocations: StdMutex::new(invocations.into_iter()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn stream_turn(
            &self,
            _history: &[HistoryMessage],
            _tool_manifest: &[Value],
        ) -> Result<DeltaStream, String> {
            let deltas = self
                .invocations
                .lock()
                .unwrap()
                .next()
                .ok_or_else(|| "no more scripted invocations".to_string())?;
            Ok(Box::pin(stream::iter(deltas)))
        }
    }

    fn registry_with_calculator() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(crate::tools::CalculatorTool));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn completed_turn_emits_signal_pair_and_enqueues_tts() {
        let llm = Arc::new(ScriptedLlm::new(vec![vec![
            Ok(LlmDelta::Text("Hello".to_string())),
            Ok(LlmDelta::Text(" world".to_string())),
            Ok(LlmDelta::End { pending_tool_calls: vec![] }),
        ]]));
        let mut brain = BrainOrchestrator::new(
            "system prompt",
            llm,
            registry_with_calculator(),
            BrainConfig::default(),
        );

        let runtime = RuntimeContext::new();
        let interrupt = crate::session::InterruptController::new(
            runtime.clone(),
            Arc::new(crate::session::ChunkQueue::new()),
        );

        let event = BrainInputEvent::text("hello", "caller", 0.0);
        brain
            .handle_turn(event, &runtime, &interrupt, &mpsc::unbounded_channel().0)
            .await;

        assert_eq!(brain.history().messages().len(), 3); // system, user, assistant

        let started = runtime.recv_ui().now_or_never().flatten().unwrap();
        assert!(matches!(
            started,
            UiMessage::Signal(sig) if sig.kind == SignalKind::ProcessingStarted
        ));
        let ended_and_final: Vec<UiMessage> =
            std::iter::from_fn(|| runtime.recv_ui().now_or_never().flatten()).collect();
        assert!(ended_and_final
            .iter()
            .any(|m| matches!(m, UiMessage::Signal(sig) if sig.kind == SignalKind::ProcessingEnded)));
        assert!(ended_and_final
            .iter()
            .any(|m| matches!(m, UiMessage::Display(d) if d.is_final)));

        let tts = runtime.recv_audio_output().now_or_never().flatten().unwrap();
        assert_eq!(tts.text, "Hello world");
    }

    /// Yields one delta, sets the interrupt flag as a side effect of
    /// producing the second, and a third that must never be observed.
    struct InterruptingLlm {
        flag: crate::runtime::InterruptFlag,
    }

    #[async_trait]
    impl LlmProvider for InterruptingLlm {
        async fn stream_turn(
            &self,
            _history: &[HistoryMessage],
            _tool_manifest: &[Value],
        ) -> Result<DeltaStream, String> {
            let flag = self.flag.clone();
            let s = stream::unfold(0u8, move |state| {
                let flag = flag.clone();
                async move {
                    match state {
                        0 => Some((Ok(LlmDelta::Text("before".to_string())), 1)),
                        1 => {
                            flag.set();
                            Some((Ok(LlmDelta::Text("after".to_string())), 2))
                        }
                        _ => None,
                    }
                }
            });
            Ok(Box::pin(s))
        }
    }

    #[tokio::test]
    async fn interrupted_turn_does_not_extend_history_or_enqueue_tts() {
        let runtime = RuntimeContext::new();
        let interrupt = crate::session::InterruptController::new(
            runtime.clone(),
            Arc::new(crate::session::ChunkQueue::new()),
        );
        let llm = Arc::new(InterruptingLlm {
            flag: interrupt.flag.clone(),
        });
        let mut brain = BrainOrchestrator::new(
            "system",
            llm,
            registry_with_calculator(),
            BrainConfig::default(),
        );

        let event = BrainInputEvent::text("tell me a story", "caller", 0.0);
        brain
            .handle_turn(event, &runtime, &interrupt, &mpsc::unbounded_channel().0)
            .await;

        // history got the user message but not an assistant reply, and no
        // TtsRequest should have been enqueued.
        assert_eq!(brain.history().messages().len(), 2); // system, user
        assert!(runtime.recv_audio_output().now_or_never().is_none());
    }

    #[tokio::test]
    async fn tool_loop_executes_and_reinvokes_then_completes() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            vec![Ok(LlmDelta::End {
                pending_tool_calls: vec![PendingToolCall {
                    index: 0,
                    id: "call_1".to_string(),
                    name: "calculate".to_string(),
                    arguments: json!({"expression": "2+2"}).to_string(),
                }],
            })],
            vec![
                Ok(LlmDelta::Text("The answer is 4".to_string())),
                Ok(LlmDelta::End { pending_tool_calls: vec![] }),
            ],
        ]));
        let mut brain = BrainOrchestrator::new(
            "system",
            llm,
            registry_with_calculator(),
            BrainConfig::default(),
        );

        let runtime = RuntimeContext::new();
        let interrupt = crate::session::InterruptController::new(
            runtime.clone(),
            Arc::new(crate::session::ChunkQueue::new()),
        );

        let event = BrainInputEvent::text("what is 2+2?", "caller", 0.0);
        brain
            .handle_turn(event, &runtime, &interrupt, &mpsc::unbounded_channel().0)
            .await;

        assert!(brain
            .history()
            .messages()
            .iter()
            .any(|m| m.content.contains("calculate")));
        let tts = runtime.recv_audio_output().now_or_never().flatten();
        assert!(tts.unwrap().text.contains("answer is 4"));
    }

    #[tokio::test]
    async fn exit_command_triggers_exit_without_enqueuing_a_turn() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let mut brain = BrainOrchestrator::new(
            "system",
            llm,
            registry_with_calculator(),
            BrainConfig::default(),
        );
        let runtime = RuntimeContext::new();
        let interrupt = crate::session::InterruptController::new(
            runtime.clone(),
            Arc::new(crate::session::ChunkQueue::new()),
        );
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        let event = BrainInputEvent::text("quit", "caller", 0.0);
        brain.handle_turn(event, &runtime, &interrupt, &exit_tx).await;

        assert!(exit_rx.try_recv().is_ok());
        assert_eq!(brain.history().messages().len(), 1); // system only
    }

    #[tokio::test]
    async fn tool_loop_cap_surfaces_as_error_not_panic() {
        // Every invocation hands back pending tool calls so the loop never
        // terminates on its own; the cap must kick in.
        let looping_call = || PendingToolCall {
            index: 0,
            id: "call_x".to_string(),
            name: "calculate".to_string(),
            arguments: json!({"expression": "1+1"}).to_string(),
        };
        let invocations: Vec<Vec<Result<LlmDelta, String>>> = (0..20)
            .map(|_| vec![Ok(LlmDelta::End { pending_tool_calls: vec![looping_call()] })])
            .collect();
        let llm = Arc::new(ScriptedLlm::new(invocations));
        let mut brain = BrainOrchestrator::new(
            "system",
            llm,
            registry_with_calculator(),
            BrainConfig {
                max_tool_iterations: 3,
                ..BrainConfig::default()
            },
        );
        let runtime = RuntimeContext::new();
        let interrupt = crate::session::InterruptController::new(
            runtime.clone(),
            Arc::new(crate::session::ChunkQueue::new()),
        );

        let event = BrainInputEvent::text("loop forever", "caller", 0.0);
        brain
            .handle_turn(event, &runtime, &interrupt, &mpsc::unbounded_channel().0)
            .await;

        // No TTS should have been enqueued for an error turn.
        assert!(runtime.recv_audio_output().now_or_never().flatten().is_none());
    }
}
