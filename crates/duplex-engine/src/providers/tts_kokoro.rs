//! Kokoro HTTP TTS provider (§6.4).
//!
//! Streams PCM16 audio from a local Kokoro server, carrying a leftover odd
//! byte across chunk boundaries the way the sample-pairing in a PCM16
//! stream requires.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;

use crate::tts_worker::{ByteChunkStream, TtsProvider};

const SAMPLE_RATE: u32 = 24_000;
const CHANNELS: u16 = 1;

pub struct KokoroTtsProvider {
    client: Client,
    base_url: String,
    default_voice: String,
    speed: f32,
}

impl KokoroTtsProvider {
    pub fn new(base_url: impl Into<String>, default_voice: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            default_voice: default_voice.into(),
            speed: 1.0,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: &'a str,
    model: &'static str,
    response_format: &'static str,
    stream: bool,
    speed: f32,
}

#[async_trait]
impl TtsProvider for KokoroTtsProvider {
    async fn synthesize(&self, text: &str, _language: &str, voice: Option<&str>) -> Result<ByteChunkStream, String> {
        let voice = voice.unwrap_or(&self.default_voice);
        let request = SpeechRequest {
            input: text,
            voice,
            model: "kokoro",
            response_format: "pcm",
            stream: true,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("kokoro error ({status}): {body}"));
        }

        let state = PcmDecodeState {
            byte_stream: Box::pin(response.bytes_stream()),
            leftover: None,
            done: false,
        };

        let stream = futures_util::stream::unfold(state, decode_step);
        Ok(Box::pin(stream))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        CHANNELS
    }
}

/// Decode-loop state: the raw byte stream plus a one-byte carry so every
/// chunk handed downstream is an even number of bytes (PCM16 samples must
/// never be split across chunk boundaries).
struct PcmDecodeState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    leftover: Option<u8>,
    done: bool,
}

async fn decode_step(mut state: PcmDecodeState) -> Option<(Result<Vec<u8>, String>, PcmDecodeState)> {
    if state.done {
        return None;
    }

    match state.byte_stream.next().await {
        None => {
            state.done = true;
            match state.leftover.take() {
                Some(byte) => Some((Ok(vec![byte]), state)),
                None => None,
            }
        }
        Some(Err(err)) => {
            state.done = true;
            Some((Err(err.to_string()), state))
        }
        Some(Ok(bytes)) => {
            let mut chunk = Vec::with_capacity(bytes.len() + 1);
            if let Some(byte) = state.leftover.take() {
                chunk.push(byte);
            }
            chunk.extend_from_slice(&bytes);

            if chunk.len() % 2 != 0 {
                state.leftover = chunk.pop();
            }

            if chunk.is_empty() {
                // Nothing complete yet (e.g. a single-byte first chunk);
                // recurse to pull the next one so we don't yield an empty item.
                Box::pin(decode_step(state)).await
            } else {
                Some((Ok(chunk), state))
            }
        }
    }
}
