//! Sample format conversion for the live session wire format
//!
//! Outbound and inbound audio is signed 16-bit little-endian mono PCM,
//! base64-encoded inside JSON. Internally samples are f32 in [-1.0, 1.0].
//! Everything here is pure so it can be tested without devices.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::{Error, Result};

/// MIME type prefix for raw PCM payloads
pub const PCM_MIME: &str = "audio/pcm";

/// Build the MIME type advertising a PCM rate (e.g. `audio/pcm;rate=16000`)
#[must_use]
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("{PCM_MIME};rate={sample_rate}")
}

/// Extract the `rate=` parameter from a PCM MIME type
#[must_use]
pub fn parse_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Convert f32 samples to i16, clamping out-of-range input
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Serialize i16 samples as little-endian bytes
#[must_use]
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes into f32 samples
///
/// # Errors
///
/// Returns `Error::Decode` if the byte count is odd
pub fn le_bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Base64-encode a payload
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload
///
/// # Errors
///
/// Returns `Error::Decode` on invalid base64
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| Error::Decode(format!("invalid base64 audio: {e}")))
}

/// Decode a base64 PCM16 payload straight to f32 samples
///
/// # Errors
///
/// Returns `Error::Decode` on invalid base64 or odd byte count
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>> {
    le_bytes_to_f32(&decode_base64(data)?)
}

/// Root-mean-square of normalized samples, clamped to [0, 1]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt().min(1.0)
}

/// Average interleaved channels down to mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }

    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resample of a mono buffer
///
/// Used for short playback chunks whose rate differs from the output device.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from) / f64::from(to);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx].mul_add(1.0 - frac, samples[next] * frac)
        })
        .collect()
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in f32_to_pcm16(samples) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_is_little_endian() {
        let bytes = pcm16_to_le_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn f32_conversion_clamps() {
        assert_eq!(f32_to_pcm16(&[2.0, -2.0, 0.0]), vec![32767, -32768, 0]);
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert!(matches!(le_bytes_to_f32(&[0, 1, 2]), Err(Error::Decode(_))));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(matches!(decode_pcm16_base64("%%%"), Err(Error::Decode(_))));
    }

    #[test]
    fn base64_payload_decodes_to_normalized_samples() {
        let encoded = encode_base64(&pcm16_to_le_bytes(&[16384, -16384]));
        let samples = decode_pcm16_base64(&encoded).unwrap();
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn rms_of_silence_and_tone() {
        assert!(rms(&[]) < f32::EPSILON);
        assert!(rms(&[0.0; 160]) < 0.001);
        assert!((rms(&[0.5; 160]) - 0.5).abs() < 1e-6);
        assert!(rms(&[-0.5, 0.5]) > 0.49);
    }

    #[test]
    fn parses_rate_parameter() {
        assert_eq!(parse_rate("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(parse_rate("audio/pcm; rate = 16000"), Some(16_000));
        assert_eq!(parse_rate("audio/pcm"), None);
        assert_eq!(pcm_mime(16_000), "audio/pcm;rate=16000");
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn linear_resample_scales_length() {
        let up = resample_linear(&[0.0, 1.0], 16_000, 32_000);
        assert_eq!(up.len(), 4);
        assert!((up[1] - 0.5).abs() < 1e-6);
        assert_eq!(resample_linear(&[0.0; 480], 48_000, 24_000).len(), 240);
    }

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0; 160], 16_000).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
    }
}
