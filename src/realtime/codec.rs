//! PCM16 conversion and transport encoding
//!
//! Captured audio arrives as `f32` samples in `[-1, 1]` at the device rate.
//! The realtime session expects mono PCM16 little-endian at 24 kHz, carried
//! as base64 text inside JSON frames.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// Sample rate of every PCM16 stream exchanged with the realtime session
pub const TARGET_SAMPLE_RATE: u32 = 24_000;

/// Quantize one sample, scaling negatives by 32768 and the rest by 32767
#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert float samples to PCM16, downsampling when the rates differ
///
/// Downsampling averages the input over spans bounded by
/// `floor((i + 1) * in_rate / out_rate)`. A span that holds no input yields
/// silence. Empty input or a zero rate yields an empty frame.
#[must_use]
pub fn encode_frame(samples: &[f32], in_rate: u32, out_rate: u32) -> Vec<i16> {
    if samples.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }
    if in_rate == out_rate {
        return samples.iter().copied().map(quantize).collect();
    }

    let ratio = f64::from(in_rate) / f64::from(out_rate);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    let mut offset = 0usize;
    for i in 0..out_len {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let next_offset = ((i + 1) as f64 * ratio).floor() as usize;
        let end = next_offset.min(samples.len());
        let span = samples.get(offset..end).unwrap_or_default();
        offset = next_offset;

        out.push(quantize(mean(span)));
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn mean(span: &[f32]) -> f32 {
    if span.is_empty() {
        return 0.0;
    }
    span.iter().sum::<f32>() / span.len() as f32
}

/// Serialize PCM16 samples as little-endian bytes
#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes; a trailing odd byte is ignored
#[must_use]
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Normalize PCM16 samples to `f32` by dividing by 32768
#[must_use]
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Encode bytes as transport text
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode transport text back to bytes
///
/// # Errors
///
/// Returns error if the text is not valid base64
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| Error::Upstream(format!("invalid audio payload: {e}")))
}

/// Capture block → transport text, in one step
#[must_use]
pub fn encode_capture_block(samples: &[f32], in_rate: u32) -> Option<String> {
    let pcm = encode_frame(samples, in_rate, TARGET_SAMPLE_RATE);
    if pcm.is_empty() {
        return None;
    }
    Some(encode_base64(&pcm16_to_bytes(&pcm)))
}
