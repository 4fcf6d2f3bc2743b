//! HTTP-backed streaming ASR provider (§6.2). Since the upstream recognizer
//! exposes only a one-shot transcription endpoint with no native streaming
//! mode, this wraps it in a stateful accumulate-and-resubmit loop: PCM is
//! buffered while the RMS-based VAD considers the caller to be speaking,
//! periodically re-transcribed for a partial result, and finalized once a
//! silence run long enough to be an endpoint elapses.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use duplex_core::text_prep::strip_hallucination_phrases;
use duplex_core::wav::{f32_to_i16, write_wav};

use crate::perception::AsrProvider;

const SILENCE_THRESHOLD: f32 = 0.004;
const MIN_SPEECH_MS: u64 = 180;
const SILENCE_DURATION_MS: u64 = 700;
const MAX_CAPTURE_MS: u64 = 12_000;
/// Re-transcribe the buffered-so-far audio at most this often while still
/// speaking, so the client sees live partials without hammering the
/// recognizer on every 10-20ms frame.
const PARTIAL_INTERVAL_MS: u64 = 500;

pub struct WhisperAsrProvider {
    client: Client,
    endpoint: String,
    model: String,

    buffer: Vec<f32>,
    sample_rate: u32,
    speaking: bool,
    silence_ms: u64,
    buffered_ms: u64,
    ms_since_partial: u64,
    last_partial: String,
}

impl WhisperAsrProvider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            buffer: Vec::new(),
            sample_rate: 16_000,
            speaking: false,
            silence_ms: 0,
            buffered_ms: 0,
            ms_since_partial: 0,
            last_partial: String::new(),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.speaking = false;
        self.silence_ms = 0;
        self.buffered_ms = 0;
        self.ms_since_partial = 0;
        self.last_partial.clear();
    }

    async fn transcribe_buffer(&self) -> Result<String, String> {
        let samples = f32_to_i16(&self.buffer);
        let wav = write_wav(&samples, self.sample_rate);
        transcribe_wav(&self.client, &self.endpoint, &wav, &self.model).await
    }
}

#[async_trait]
impl AsrProvider for WhisperAsrProvider {
    async fn feed(&mut self, pcm: &[f32], sample_rate: u32) -> Result<(String, bool), String> {
        self.sample_rate = sample_rate;
        let frame_ms = (pcm.len() as u64 * 1000) / sample_rate.max(1) as u64;
        let rms = compute_rms(pcm);

        if rms > SILENCE_THRESHOLD {
            self.speaking = true;
            self.silence_ms = 0;
        } else if self.speaking {
            self.silence_ms += frame_ms;
        }

        if self.speaking {
            self.buffer.extend_from_slice(pcm);
            self.buffered_ms += frame_ms;
            self.ms_since_partial += frame_ms;
        }

        let should_finalize = self.speaking
            && self.buffered_ms >= MIN_SPEECH_MS
            && (self.silence_ms >= SILENCE_DURATION_MS || self.buffered_ms >= MAX_CAPTURE_MS);

        if should_finalize {
            let text = self.transcribe_buffer().await?;
            let cleaned = strip_hallucination_phrases(&text);
            self.reset();
            return Ok((cleaned, true));
        }

        if self.speaking && self.ms_since_partial >= PARTIAL_INTERVAL_MS {
            self.ms_since_partial = 0;
            let text = self.transcribe_buffer().await?;
            self.last_partial = strip_hallucination_phrases(&text);
        }

        Ok((self.last_partial.clone(), false))
    }
}

fn compute_rms(pcm: &[f32]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = pcm.iter().map(|s| s * s).sum();
    (sum_sq / pcm.len() as f32).sqrt()
}

async fn transcribe_wav(client: &Client, endpoint: &str, wav_bytes: &[u8], model: &str) -> Result<String, String> {
    let part = reqwest::multipart::Part::bytes(wav_bytes.to_vec())
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| format!("mime error: {e}"))?;

    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("model", model.to_string())
        .text("response_format", "json");

    let resp = client
        .post(endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(|e| format!("transcription request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("transcription failed ({status}): {body}"));
    }

    let body = resp.text().await.map_err(|e| format!("response read error: {e}"))?;
    let value: Value = serde_json::from_str(&body).map_err(|e| format!("invalid JSON: {e}; raw={body}"))?;
    Ok(value.get("text").and_then(Value::as_str).unwrap_or("").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    fn loud(n: usize) -> Vec<f32> {
        vec![0.5; n]
    }

    #[test]
    fn compute_rms_distinguishes_speech_from_silence() {
        assert!(compute_rms(&silent(100)) < SILENCE_THRESHOLD);
        assert!(compute_rms(&loud(100)) > SILENCE_THRESHOLD);
    }

    #[tokio::test]
    async fn idle_silence_never_starts_speaking() {
        let mut provider = WhisperAsrProvider::new("http://localhost:1/v1/audio/transcriptions", "base");
        for _ in 0..5 {
            let (text, is_endpoint) = provider.feed(&silent(160), 16_000).await.unwrap();
            assert!(text.is_empty());
            assert!(!is_endpoint);
        }
        assert!(!provider.speaking);
    }

    #[tokio::test]
    async fn speech_then_silence_accumulates_toward_an_endpoint() {
        let mut provider = WhisperAsrProvider::new("http://localhost:1/v1/audio/transcriptions", "base");
        // 320 samples @16kHz = 20ms; a handful of loud frames crosses MIN_SPEECH_MS.
        for _ in 0..10 {
            let _ = provider.feed(&loud(320), 16_000).await;
        }
        assert!(provider.speaking);
        assert!(provider.buffered_ms >= MIN_SPEECH_MS);
    }
}
