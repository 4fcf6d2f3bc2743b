//! Client channel adapter (§4.1's per-connection half, §6.1 wire format):
//! the WebSocket handler that assembles one session's full worker graph and
//! bridges it to a single socket, using a dedicated sender task plus an
//! outbound channel so reads and writes never contend on the same socket
//! half.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use duplex_core::types::{AudioFrame, BrainInputEvent, UiMessage};
use duplex_engine::audio_source::{AudioSource, QueueAudioSource, TARGET_SAMPLE_RATE};
use duplex_engine::brain::BrainOrchestrator;
use duplex_engine::perception::StreamingPerception;
use duplex_engine::session::Session;
use duplex_engine::sink::{run_sink, CallbackAudioSink};
use duplex_engine::tts_worker::TtsWorker;

use crate::app::AppState;
use crate::messages::{parse_client_intent, ready_message, ui_message_to_wire, ClientIntent};

pub async fn ws_handler(
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                Outbound::Text(text) => ws_tx.send(Message::Text(text.into())).await,
                Outbound::Binary(data) => ws_tx.send(Message::Binary(data.into())).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Spawn and register every worker on the session *before* it is ever
    // visible through the registry, so `insert`/`get` never expose a
    // half-started session and a concurrent take-over never joins against
    // a worker list that is still being filled in (§3, §4.1, §5).
    let session = Session::new(session_id.clone());

    let audio_source: Arc<dyn AudioSource> = Arc::new(QueueAudioSource::new());
    audio_source.start(session.frames.clone());

    let asr_provider = state.new_asr_provider();
    let perception = StreamingPerception::new(session_id.clone(), asr_provider);
    let perception_handle = tokio::spawn(perception.run(
        session.frames.clone(),
        session.runtime.brain_input_tx(),
        session.runtime.ui_tx(),
        session.interrupt.clone(),
    ));
    session.register_worker(perception_handle).await;

    let brain = BrainOrchestrator::new(
        state.config.system_prompt.clone(),
        state.llm.clone(),
        state.tools.clone(),
        state.config.brain_config(),
    );
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let brain_handle = tokio::spawn(brain.run(session.runtime.clone(), session.interrupt.clone(), exit_tx));
    session.register_worker(brain_handle).await;

    let tts_worker = TtsWorker::new(state.tts.clone());
    let tts_handle = tokio::spawn(tts_worker.run(session.runtime.clone(), session.chunks.clone(), session.interrupt.clone()));
    session.register_worker(tts_handle).await;

    let sink_out_tx = out_tx.clone();
    let sink_backend = Arc::new(CallbackAudioSink::new(
        move |chunk| {
            let _ = sink_out_tx.try_send(Outbound::Binary(chunk.data.clone()));
        },
        || {},
        || {},
    ));
    let sink_handle = tokio::spawn(run_sink(
        sink_backend,
        session.chunks.clone(),
        session.runtime.ui_tx(),
        session.runtime.interrupt.clone(),
    ));
    session.register_worker(sink_handle).await;

    let ui_out_tx = out_tx.clone();
    let ui_session_id = session_id.clone();
    let ui_handle = tokio::spawn(forward_ui_messages(session.clone(), ui_out_tx, ui_session_id));
    session.register_worker(ui_handle).await;

    if state.registry.insert(session.clone()).await.is_err() {
        tracing::warn!("session '{session_id}' rejected: id already in use");
        audio_source.join();
        session.close().await;
        drop(out_tx);
        let _ = sender_task.await;
        return;
    }

    let _ = out_tx.send(Outbound::Text(serde_json::to_string(&ready_message(&session_id)).unwrap_or_default())).await;

    loop {
        tokio::select! {
            _ = exit_rx.recv() => {
                break;
            }
            msg = ws_rx.next() => {
                match msg {
                    None => break,
                    Some(Err(_)) => break,
                    Some(Ok(Message::Binary(data))) => {
                        let pcm = pcm16_le_to_f32(&data);
                        let timestamp_s = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_secs_f64())
                            .unwrap_or(0.0);
                        audio_source.push(AudioFrame::new(pcm, TARGET_SAMPLE_RATE, timestamp_s));
                    }
                    Some(Ok(Message::Text(text))) => {
                        match parse_client_intent(&text) {
                            Some(ClientIntent::Interrupt) => {
                                session.interrupt.trigger().await;
                            }
                            Some(ClientIntent::Input(content)) => {
                                let now = std::time::SystemTime::now()
                                    .duration_since(std::time::UNIX_EPOCH)
                                    .map(|d| d.as_secs_f64())
                                    .unwrap_or(0.0);
                                let _ = session
                                    .runtime
                                    .brain_input_tx()
                                    .send(BrainInputEvent::text(content, session_id.clone(), now));
                            }
                            None => {
                                tracing::debug!("dropping malformed or unrecognized client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    audio_source.join();
    state.registry.close(&session_id).await;
    drop(out_tx);
    let _ = sender_task.await;
}

/// Bridges the session's UI queue to the outbound socket channel until the
/// queue closes (session teardown drops every sender).
async fn forward_ui_messages(session: Arc<Session>, out_tx: mpsc::Sender<Outbound>, _session_id: String) {
    while let Some(message) = session.runtime.recv_ui().await {
        let wire = ui_message_to_wire(&message);
        if out_tx.send(Outbound::Text(serde_json::to_string(&wire).unwrap_or_default())).await.is_err() {
            break;
        }
        if let UiMessage::Display(_) = &message {
            // no additional bookkeeping: wire conversion is purely functional.
        }
    }
}

/// Decodes little-endian signed 16-bit PCM to `[-1.0, 1.0]` float samples
/// (§6.1 binary client → server framing).
fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_le_to_f32_round_trips_known_values() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0xC0];
        let samples = pcm16_le_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!(samples[1] > 0.49 && samples[1] < 0.51);
        assert!(samples[2] < -0.49 && samples[2] > -0.51);
    }

    #[test]
    fn pcm16_le_to_f32_drops_trailing_odd_byte() {
        let bytes = [0x00, 0x00, 0x01];
        assert_eq!(pcm16_le_to_f32(&bytes).len(), 1);
    }
}
