//! WAV Decoding Domain
//!
//! Decodes RIFF/WAVE files through `hound` and reads authored loop points
//! from the `smpl` chunk.

mod decoder;
mod smpl;

pub use decoder::WavDecoder;
