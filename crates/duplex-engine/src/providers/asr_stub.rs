//! Null ASR provider for configurations with no speech recognizer attached
//! (text-only deployments, and as a test double).

use async_trait::async_trait;

use crate::perception::AsrProvider;

/// Never produces a transcript. Frames pushed through it are silently
/// discarded; `feed` always reports "still listening".
///
/// Useful for a keyboard-only client, or as a placeholder until a real
/// recognizer endpoint is configured (§6.2 is satisfied trivially: the
/// contract only requires *some* stream of `(text, is_endpoint)` pairs).
pub struct StubAsrProvider;

#[async_trait]
impl AsrProvider for StubAsrProvider {
    async fn feed(&mut self, _pcm: &[f32], _sample_rate: u32) -> Result<(String, bool), String> {
        Ok((String::new(), false))
    }
}
