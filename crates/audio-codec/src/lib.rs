//! # audio-codec
//!
//! Audio container handling for the TTS server:
//! - 16-bit PCM WAV encoding of synthesized waveforms
//! - WAV decoding of client-provided reference audio
//! - Linear resampling, edge fades and level statistics

pub mod fade;
pub mod resample;
pub mod wav;

pub use fade::{apply_fade_in, apply_fade_out};
pub use resample::resample_linear;
pub use wav::{AudioStats, WavHeaderInfo, decode_wav, encode_wav, wav_header_info};
