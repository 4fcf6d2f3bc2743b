//! TTS worker (spec §4.6): turns a queued [`TtsRequest`] into a stream of
//! [`AudioChunk`]s on the chunk queue, always terminated by the end-of-stream
//! sentinel, honoring barge-in both via the interrupt flag and the TTS
//! epoch (§4.8) so a stale fetch recognizes it has been superseded even
//! mid-sentence.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use duplex_core::text_prep::{clean_text_for_tts, split_sentences};
use duplex_core::types::{AudioChunk, TtsRequest};

use crate::runtime::RuntimeContext;
use crate::session::{ChunkQueue, InterruptController};

pub type ByteChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// §6.4: synthesizes one sentence (or other short unit of text) into a lazy,
/// cancellable stream of raw PCM byte chunks. Implementations should yield
/// promptly so the worker can observe interruption between chunks.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str, voice: Option<&str>) -> Result<ByteChunkStream, String>;

    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

pub struct TtsWorker {
    provider: Arc<dyn TtsProvider>,
}

impl TtsWorker {
    pub fn new(provider: Arc<dyn TtsProvider>) -> Self {
        Self { provider }
    }

    /// Consumes the runtime's audio-output queue until it closes (session
    /// teardown).
    pub async fn run(self, runtime: Arc<RuntimeContext>, chunks: Arc<ChunkQueue>, interrupt: InterruptController) {
        while let Some(request) = runtime.recv_audio_output().await {
            self.handle_request(request, &chunks, &interrupt).await;
        }
    }

    async fn handle_request(&self, request: TtsRequest, chunks: &Arc<ChunkQueue>, interrupt: &InterruptController) {
        // Step 1: a fresh request is a fresh speaking context.
        interrupt.flag.clear();
        let epoch = interrupt.tts_epoch();

        let cleaned = clean_text_for_tts(&request.text);
        let sentences = split_sentences(&cleaned);
        let sender = chunks.sender();

        'sentences: for sentence in sentences {
            if sentence.trim().is_empty() {
                continue;
            }
            if interrupt.flag.is_set() || interrupt.tts_epoch() != epoch {
                break 'sentences;
            }

            let stream = match self
                .provider
                .synthesize(&sentence, &request.language, request.voice.as_deref())
                .await
            {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!("tts provider failed for sentence: {err}");
                    break 'sentences;
                }
            };
            tokio::pin!(stream);

            while let Some(item) = stream.next().await {
                if interrupt.flag.is_set() || interrupt.tts_epoch() != epoch {
                    break 'sentences;
                }
                match item {
                    Ok(data) => {
                        let chunk = AudioChunk::new(data, self.provider.sample_rate(), self.provider.channels());
                        if sender.send(Some(chunk)).await.is_err() {
                            // Sink side gone; nothing left to do but stop.
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!("tts provider stream error: {err}");
                        break 'sentences;
                    }
                }
            }
        }

        // Step: always terminate with the sentinel, on every path.
        let _ = sender.send(None).await;
    }
}
