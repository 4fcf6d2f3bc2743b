//! Minimal WAV encoding — just enough to hand a recognizer HTTP endpoint a
//! self-contained file instead of raw headerless PCM.

/// Write a minimal WAV file (16-bit mono PCM) from raw samples.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Convert `[-1.0, 1.0]`-ranged float PCM to signed 16-bit samples.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_wav_produces_valid_header() {
        let samples = vec![0i16; 100];
        let wav = write_wav(&samples, 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(wav.len(), 44 + 200);
    }

    #[test]
    fn f32_to_i16_round_trips_extremes() {
        let out = f32_to_i16(&[-1.0, 0.0, 1.0]);
        assert_eq!(out[1], 0);
        assert!(out[0] < -32000);
        assert!(out[2] > 32000);
    }

    #[test]
    fn f32_to_i16_clamps_out_of_range() {
        let out = f32_to_i16(&[-2.0, 2.0]);
        assert_eq!(out[0], -32767);
        assert_eq!(out[1], 32767);
    }
}
