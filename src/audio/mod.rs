//! Audio plumbing: wire codec and device seams.

pub mod codec;
pub mod device;

pub use codec::{
    decode_frame, encode_bytes, encode_frame, float_buffer_from_pcm, pcm_from_float, DecodeError,
    FloatBuffer, INPUT_AUDIO_MIME, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use device::{AudioDevices, Capture, CaptureStream, PlaybackOutput, SourceId, WavDevices};
