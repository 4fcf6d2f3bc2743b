//! Audio sink (spec §4.7): consumes the chunk queue until the end-of-stream
//! sentinel, then emits `tts_ended`. Two backends share one worker loop — a
//! callback-based one for test doubles/headless deployments, and a
//! playback one that drives a real output device with boundary fades.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use rodio::{OutputStream, Sink as RodioSink, Source};
use tokio::sync::mpsc;

use duplex_core::types::{AudioChunk, SignalKind, SignalMessage, UiMessage};

use crate::runtime::InterruptFlag;
use crate::session::ChunkQueue;

/// Linear fade length at stream boundaries, in milliseconds (§4.7).
pub const FADE_DURATION_MS: u32 = 5;

#[async_trait]
pub trait SinkBackend: Send + Sync {
    async fn on_stream_start(&self);
    async fn on_chunk(&self, chunk: &AudioChunk);
    /// Fires once per sentinel, whether or not any chunk was ever played.
    async fn on_stream_end(&self);
}

/// Drives the shared sink loop until the chunk queue closes (session
/// teardown). Emits exactly one `tts_ended` per sentinel received,
/// regardless of whether the stream was interrupted (testable property 7).
pub async fn run_sink(
    backend: Arc<dyn SinkBackend>,
    chunks: Arc<ChunkQueue>,
    ui_tx: mpsc::UnboundedSender<UiMessage>,
    interrupt: InterruptFlag,
) {
    let mut stream_open = false;

    loop {
        match chunks.recv().await {
            None => break,
            Some(None) => {
                backend.on_stream_end().await;
                stream_open = false;
                let _ = ui_tx.send(UiMessage::from(SignalMessage::new(SignalKind::TtsEnded)));
            }
            Some(Some(chunk)) => {
                if interrupt.is_set() {
                    // Flush/stop happens implicitly: we simply never pass
                    // this chunk to the backend, so nothing more plays.
                    continue;
                }
                if !stream_open {
                    backend.on_stream_start().await;
                    stream_open = true;
                }
                backend.on_chunk(&chunk).await;
            }
        }
    }
}

// ─── Callback sink ──────────────────────────────────────────────────────

type ChunkHandler = Box<dyn Fn(&AudioChunk) + Send + Sync>;
type VoidHandler = Box<dyn Fn() + Send + Sync>;

/// Invokes injected handlers per chunk/stream boundary — used by headless
/// deployments (no audio device) and by tests.
pub struct CallbackAudioSink {
    on_chunk: ChunkHandler,
    on_start: VoidHandler,
    on_end: VoidHandler,
}

impl CallbackAudioSink {
    pub fn new(
        on_chunk: impl Fn(&AudioChunk) + Send + Sync + 'static,
        on_start: impl Fn() + Send + Sync + 'static,
        on_end: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_chunk: Box::new(on_chunk),
            on_start: Box::new(on_start),
            on_end: Box::new(on_end),
        }
    }
}

#[async_trait]
impl SinkBackend for CallbackAudioSink {
    async fn on_stream_start(&self) {
        (self.on_start)();
    }

    async fn on_chunk(&self, chunk: &AudioChunk) {
        (self.on_chunk)(chunk);
    }

    async fn on_stream_end(&self) {
        (self.on_end)();
    }
}

// ─── Playback sink ──────────────────────────────────────────────────────

enum PcmEvent {
    Data(Vec<i16>),
    Done,
}

/// Streams i16 samples to `rodio`, applying a linear fade-in to the first
/// `FADE_DURATION_MS` of the utterance and a linear fade-out to the last,
/// so utterance boundaries never click.
struct FadingPcmSource {
    rx: mpsc::UnboundedReceiver<PcmEvent>,
    tail: VecDeque<i16>,
    fade_samples: usize,
    samples_emitted: usize,
    finished: bool,
    channels: u16,
    sample_rate: u32,
}

impl FadingPcmSource {
    fn new(rx: mpsc::UnboundedReceiver<PcmEvent>, sample_rate: u32, channels: u16) -> Self {
        let fade_samples = (sample_rate as u64 * FADE_DURATION_MS as u64 / 1000) as usize;
        Self {
            rx,
            tail: VecDeque::with_capacity(fade_samples + 1),
            fade_samples,
            samples_emitted: 0,
            finished: false,
            channels,
            sample_rate,
        }
    }

    fn fade_in_scale(&self, index: usize) -> f32 {
        if self.fade_samples == 0 || index >= self.fade_samples {
            1.0
        } else {
            index as f32 / self.fade_samples as f32
        }
    }
}

impl Iterator for FadingPcmSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        loop {
            if let Some(sample) = self.tail.pop_front() {
                // tail holds at most fade_samples items; once we pop one we
                // try to keep it topped up below.
                let scale = self.fade_in_scale(self.samples_emitted);
                self.samples_emitted += 1;
                if self.tail.len() < self.fade_samples && !self.finished {
                    if let Ok(event) = self.rx.try_recv() {
                        match event {
                            PcmEvent::Data(samples) => self.tail.extend(samples),
                            PcmEvent::Done => self.finished = true,
                        }
                    }
                }
                return Some((sample as f32 * scale) as i16);
            }

            if self.finished {
                return None;
            }

            match self.rx.blocking_recv() {
                None => {
                    self.finished = true;
                }
                Some(PcmEvent::Data(samples)) => {
                    self.tail.extend(samples);
                }
                Some(PcmEvent::Done) => {
                    self.finished = true;
                    if self.tail.is_empty() {
                        return None;
                    }
                    // Ramp the buffered tail down to silence.
                    let n = self.tail.len();
                    for (i, sample) in self.tail.iter_mut().enumerate() {
                        let scale = 1.0 - (i as f32 / n as f32);
                        *sample = (*sample as f32 * scale) as i16;
                    }
                }
            }
        }
    }
}

impl Source for FadingPcmSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Real output-device sink. Owns a dedicated OS thread since rodio's stream
/// handle is `!Send`.
pub struct PlaybackAudioSink {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<PcmEvent>>>,
    sample_rate: u32,
    channels: u16,
    _thread: std::thread::JoinHandle<()>,
}

impl PlaybackAudioSink {
    pub fn spawn(sample_rate: u32, channels: u16) -> Arc<Self> {
        let (start_tx, start_rx) = std::sync::mpsc::channel::<mpsc::UnboundedSender<PcmEvent>>();

        let sr = sample_rate;
        let ch = channels;
        let thread = std::thread::spawn(move || {
            let (_stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!("failed to open output device: {err}");
                    return;
                }
            };
            let sink = match RodioSink::try_new(&handle) {
                Ok(sink) => sink,
                Err(err) => {
                    tracing::error!("failed to create rodio sink: {err}");
                    return;
                }
            };

            loop {
                let (tx, rx) = mpsc::unbounded_channel();
                if start_tx.send(tx).is_err() {
                    break;
                }
                let source = FadingPcmSource::new(rx, sr, ch);
                sink.append(source);
                sink.sleep_until_end();
            }
        });

        let tx = start_rx.recv().ok();

        Arc::new(Self {
            tx: std::sync::Mutex::new(tx),
            sample_rate,
            channels,
            _thread: thread,
        })
    }
}

#[async_trait]
impl SinkBackend for PlaybackAudioSink {
    async fn on_stream_start(&self) {}

    async fn on_chunk(&self, chunk: &AudioChunk) {
        let samples = bytes_to_i16(&chunk.data);
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(PcmEvent::Data(samples));
        }
    }

    async fn on_stream_end(&self) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(PcmEvent::Done);
        }
    }
}

fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
