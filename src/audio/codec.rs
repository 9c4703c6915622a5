//! PCM ↔ wire conversions for the Live audio stream.
//!
//! Gemini Live carries audio as base64 text inside JSON. Microphone
//! frames leave as 16-bit little-endian PCM at 16kHz; agent speech
//! arrives the same way at 24kHz. Everything here is a pure transform.

use base64::Engine;

/// Microphone capture rate expected by the Live API.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized agent speech.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME type attached to outbound audio chunks.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Scale between normalized floats and signed 16-bit samples.
const PCM_SCALE: f32 = 32768.0;

/// Failure to turn a wire payload back into playable samples.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("PCM payload of {len} bytes is not a multiple of {frame_bytes} ({channels} channel(s) x 2 bytes)")]
    Misaligned {
        len: usize,
        channels: u16,
        frame_bytes: usize,
    },
    #[error("channel count must be at least 1")]
    NoChannels,
}

/// Pack samples little-endian and base64 them for the wire.
pub fn encode_frame(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    encode_bytes(&bytes)
}

/// Base64 step on its own, for payloads that are already bytes.
pub fn encode_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Exact inverse of [`encode_bytes`].
pub fn decode_frame(payload: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

/// Convert normalized float samples to 16-bit PCM.
///
/// Scales by 32768 and truncates toward zero. Values at or beyond ±1.0
/// saturate to `i16::MIN`/`i16::MAX` instead of wrapping; NaN maps to 0.
pub fn pcm_from_float(samples: &[f32]) -> Vec<i16> {
    // `as` from f32 to i16 truncates and saturates.
    samples.iter().map(|s| (s * PCM_SCALE) as i16).collect()
}

/// Deinterleaved float audio ready for scheduling on a playback output.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatBuffer {
    pub sample_rate: u32,
    /// One vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl FloatBuffer {
    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }
}

/// Interpret `bytes` as interleaved s16le PCM and split it per channel.
pub fn float_buffer_from_pcm(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<FloatBuffer, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::NoChannels);
    }
    let channels = usize::from(channel_count);
    let frame_bytes = channels * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            channels: channel_count,
            frame_bytes,
        });
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frame_count); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(f32::from(sample) / PCM_SCALE);
    }

    Ok(FloatBuffer {
        sample_rate,
        channels: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_frame_is_little_endian_base64() {
        // 1 -> 01 00, -2 -> FE FF
        let encoded = encode_frame(&[1, -2]);
        assert_eq!(decode_frame(&encoded).unwrap(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn byte_round_trip_is_exact() {
        let empty: Vec<u8> = Vec::new();
        assert_eq!(decode_frame(&encode_bytes(&empty)).unwrap(), empty);

        let all_values: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode_frame(&encode_bytes(&all_values)).unwrap(), all_values);

        // One second of 24kHz mono PCM is the largest chunk we see in practice.
        let large: Vec<u8> = (0..48_000u32).map(|i| (i * 31 % 251) as u8).collect();
        assert_eq!(decode_frame(&encode_bytes(&large)).unwrap(), large);
    }

    #[test]
    fn decode_rejects_non_base64() {
        assert!(matches!(
            decode_frame("not base64 at all!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn float_pcm_round_trip_within_one_step() {
        let input: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();
        let pcm = pcm_from_float(&input);
        let bytes = decode_frame(&encode_frame(&pcm)).unwrap();
        let buffer = float_buffer_from_pcm(&bytes, INPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(buffer.frame_count(), input.len());
        for (orig, back) in input.iter().zip(&buffer.channels[0]) {
            assert!(
                (orig - back).abs() <= 1.0 / 32768.0 + f32::EPSILON,
                "{orig} came back as {back}"
            );
        }
    }

    #[test]
    fn pcm_from_float_saturates_out_of_range() {
        assert_eq!(pcm_from_float(&[1.0]), vec![i16::MAX]);
        assert_eq!(pcm_from_float(&[1.5, -1.5]), vec![i16::MAX, i16::MIN]);
        assert_eq!(pcm_from_float(&[-1.0]), vec![i16::MIN]);
        assert_eq!(pcm_from_float(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn pcm_from_float_truncates_toward_zero() {
        // 0.5 / 32768 scaled is 0.5 -> 0; -1.9 steps -> -1
        assert_eq!(pcm_from_float(&[0.5 / 32768.0, -1.9 / 32768.0]), vec![0, -1]);
    }

    #[test]
    fn deinterleaves_stereo() {
        let pcm: Vec<i16> = vec![100, -100, 200, -200];
        let bytes = decode_frame(&encode_frame(&pcm)).unwrap();
        let buffer = float_buffer_from_pcm(&bytes, OUTPUT_SAMPLE_RATE, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channels[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(buffer.channels[1], vec![-100.0 / 32768.0, -200.0 / 32768.0]);
    }

    #[test]
    fn rejects_misaligned_payload() {
        let err = float_buffer_from_pcm(&[0, 1, 2], OUTPUT_SAMPLE_RATE, 1).unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { len: 3, .. }));

        // Even length but not a whole stereo frame.
        let err = float_buffer_from_pcm(&[0, 1, 2, 3, 4, 5], OUTPUT_SAMPLE_RATE, 2).unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { frame_bytes: 4, .. }));
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(matches!(
            float_buffer_from_pcm(&[0, 0], OUTPUT_SAMPLE_RATE, 0),
            Err(DecodeError::NoChannels)
        ));
    }

    #[test]
    fn duration_follows_sample_rate() {
        let bytes = vec![0u8; 24_000 * 2];
        let buffer = float_buffer_from_pcm(&bytes, OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
    }
}
