//! Streaming perception (spec §4.3): the single consumer of the frame
//! queue that drives a stateful ASR provider and turns its output into
//! transcript updates, brain input, and barge-in.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use duplex_core::types::{BrainInputEvent, DisplayMessage, UiMessage};

use crate::session::{FrameQueue, InterruptController};

/// §6.2: a stateful stream that accepts arbitrary-sized float PCM frames at
/// a fixed sample rate and yields, per feed, the best-so-far transcript and
/// whether the recognizer considers the utterance ended. Implementations
/// reset themselves automatically on endpoint.
#[async_trait]
pub trait AsrProvider: Send {
    async fn feed(&mut self, pcm: &[f32], sample_rate: u32) -> Result<(String, bool), String>;
}

/// Supplemental diagnostic events a UI can use for a live mic-level
/// indicator; never required by the core contract (§8).
#[derive(Debug, Clone)]
pub enum PerceptionEvent {
    SpeechStart,
    VadLevel(f32),
    Transcribing,
}

pub struct StreamingPerception {
    user_label: String,
    provider: Box<dyn AsrProvider>,
    events_tx: Option<mpsc::UnboundedSender<PerceptionEvent>>,

    last_text: Option<String>,
    msg_id: Option<String>,
    barge_in_fired: bool,
    frames_since_speech_start: u32,
}

impl StreamingPerception {
    pub fn new(user_label: impl Into<String>, provider: Box<dyn AsrProvider>) -> Self {
        Self {
            user_label: user_label.into(),
            provider,
            events_tx: None,
            last_text: None,
            msg_id: None,
            barge_in_fired: false,
            frames_since_speech_start: 0,
        }
    }

    pub fn with_events(mut self, events_tx: mpsc::UnboundedSender<PerceptionEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    fn emit_event(&self, event: PerceptionEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event);
        }
    }

    /// Runs until the frame queue closes (session teardown). Implements the
    /// six-step per-frame algorithm of §4.3 exactly.
    pub async fn run(
        mut self,
        frames: Arc<FrameQueue>,
        brain_input_tx: mpsc::UnboundedSender<BrainInputEvent>,
        ui_tx: mpsc::UnboundedSender<UiMessage>,
        interrupt: InterruptController,
    ) {
        while let Some(frame) = frames.recv().await {
            let rms = compute_rms(&frame.pcm);
            if rms > VAD_SILENCE_THRESHOLD {
                if self.frames_since_speech_start == 0 {
                    self.emit_event(PerceptionEvent::SpeechStart);
                }
                self.frames_since_speech_start += 1;
            } else {
                self.frames_since_speech_start = 0;
            }
            self.emit_event(PerceptionEvent::VadLevel(rms));

            let (text, is_endpoint) = match self.provider.feed(&frame.pcm, frame.sample_rate).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!("ASR provider error, skipping frame: {err}");
                    continue;
                }
            };

            // Step 3: barge-in fires once per utterance, on the first
            // non-empty partial.
            if !text.is_empty() && !self.barge_in_fired {
                interrupt.trigger().await;
                self.barge_in_fired = true;
                self.emit_event(PerceptionEvent::Transcribing);
            }

            // Step 4: allocate a message id for this utterance if needed.
            if self.msg_id.is_none() {
                self.msg_id = Some(format!("user_{}", Uuid::new_v4().simple()));
            }
            let msg_id = self.msg_id.clone().unwrap();

            // Step 5: suppress unchanged partials; endpoints always emit.
            let changed = self.last_text.as_deref() != Some(text.as_str());
            if changed || is_endpoint {
                let _ = ui_tx.send(UiMessage::from(DisplayMessage::user_transcript(
                    self.user_label.clone(),
                    text.clone(),
                    is_endpoint,
                    msg_id.clone(),
                )));
                self.last_text = Some(text.clone());
            }

            // Step 6: on endpoint with non-empty text, hand off to the
            // brain and reset state for the next utterance.
            if is_endpoint && !text.is_empty() {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let _ = brain_input_tx.send(BrainInputEvent::audio(text, self.user_label.clone(), now));

                self.last_text = None;
                self.barge_in_fired = false;
                self.msg_id = None;
            }
        }
    }
}

const VAD_SILENCE_THRESHOLD: f32 = 0.004;

fn compute_rms(pcm: &[f32]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = pcm.iter().map(|s| s * s).sum();
    (sum_sq / pcm.len() as f32).sqrt()
}
