//! Audio ingest source (spec §4.2): delivers PCM frames into a session's
//! frame queue. Two variants share one trait — a queue-backed one driven by
//! an external client connection, and a microphone-backed one driven by a
//! real capture device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use duplex_core::types::AudioFrame;

use crate::session::FrameQueue;

/// 100ms at 16kHz — the frame duration the microphone source chunks at.
pub const CHUNK_SAMPLES: usize = 1_600;
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Abstract ingest capability (spec §4.2). The source never interprets
/// audio; it only delivers frames into whatever frame queue `start` was
/// handed.
pub trait AudioSource: Send + Sync {
    /// Begin producing frames into `frames`. Must return promptly; any
    /// blocking work happens on a spawned task or thread.
    fn start(&self, frames: Arc<FrameQueue>);

    /// Stop producing and release any device/thread resources. Blocks until
    /// the underlying worker has actually stopped.
    fn join(&self);

    /// External push entry point. No-op for sources that pull from a
    /// device rather than being pushed to.
    fn push(&self, _frame: AudioFrame) {}
}

/// Queue-backed source: the remote client pushes raw frames converted from
/// binary WebSocket payloads directly into the session's frame queue.
pub struct QueueAudioSource {
    frames: Mutex<Option<Arc<FrameQueue>>>,
}

impl QueueAudioSource {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(None),
        }
    }
}

impl Default for QueueAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for QueueAudioSource {
    fn start(&self, frames: Arc<FrameQueue>) {
        *self.frames.lock().unwrap() = Some(frames);
    }

    fn join(&self) {
        *self.frames.lock().unwrap() = None;
    }

    fn push(&self, frame: AudioFrame) {
        if let Some(f) = self.frames.lock().unwrap().as_ref() {
            f.push(frame);
        }
    }
}

/// Microphone-backed source. `cpal` streams are not `Send` on every
/// platform, so capture runs on a dedicated OS thread.
pub struct MicAudioSource {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl MicAudioSource {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }
}

impl Default for MicAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MicAudioSource {
    fn start(&self, frames: Arc<FrameQueue>) {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();

        let handle = std::thread::spawn(move || {
            if let Err(err) = capture_loop(frames, running) {
                tracing::error!("microphone capture failed: {err}");
            }
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    fn join(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn capture_loop(
    frames: Arc<FrameQueue>,
    running: Arc<AtomicBool>,
) -> Result<(), String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "no default input device".to_string())?;
    let config = device
        .default_input_config()
        .map_err(|e| e.to_string())?;

    let source_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    let err_fn = |err| tracing::error!("cpal stream error: {err}");

    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_SAMPLES * 2);

    // Each callback borrows `frames`/`running` through the closure; the
    // actual stream handle is kept local to this thread since it is !Send.
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            {
                let frames = frames.clone();
                move |data: &[f32], _| {
                    feed_samples(data, channels, source_rate, &mut pending, &frames);
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            {
                let frames = frames.clone();
                move |data: &[i16], _| {
                    let as_f32: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                    feed_samples(&as_f32, channels, source_rate, &mut pending, &frames);
                }
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported sample format: {other:?}")),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;

    while running.load(Ordering::SeqCst) {
        std::thread::park_timeout(std::time::Duration::from_millis(50));
    }

    drop(stream);
    Ok(())
}

fn feed_samples(
    data: &[f32],
    channels: usize,
    source_rate: u32,
    pending: &mut Vec<f32>,
    frames: &Arc<FrameQueue>,
) {
    let mono = mix_to_mono(data, channels);
    let resampled = resample_linear(&mono, source_rate, TARGET_SAMPLE_RATE);
    pending.extend(resampled);

    while pending.len() >= CHUNK_SAMPLES {
        let chunk: Vec<f32> = pending.drain(..CHUNK_SAMPLES).collect();
        let timestamp_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        frames.push(AudioFrame::new(chunk, TARGET_SAMPLE_RATE, timestamp_s));
    }
}

/// Average interleaved multi-channel samples down to mono.
pub fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler. Good enough for speech-band audio;
/// not a substitute for a proper windowed-sinc resampler.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((input.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;

        let a = input.get(idx).copied().unwrap_or(0.0);
        let b = input.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac as f32);
    }

    out
}
