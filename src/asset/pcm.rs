//! PCM buffer, format and loop interval types

use crate::bounds::Bounds;
use crate::{AudioError, Result};
use std::time::Duration;

/// Encoding of a single interleaved sample, little endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 8-bit
    I8,
    /// Signed 16-bit
    I16,
    /// Signed 24-bit, packed in 3 bytes
    I24,
    /// Signed 32-bit
    I32,
    /// IEEE 754 32-bit float
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }

    /// Decode one sample to a normalized float in [-1.0, 1.0]
    ///
    /// `bytes` must hold at least [`Self::bytes_per_sample`] bytes.
    pub fn to_f32(&self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::I8 => bytes[0] as i8 as f32 / 128.0,
            SampleFormat::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleFormat::I24 => {
                // Sign-extend through the top byte of an i32
                let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                raw as f32 / 8_388_608.0
            }
            SampleFormat::I32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Layout of a decoded PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    channels: u16,
    sample_rate: u32,
    sample_format: SampleFormat,
}

impl PcmFormat {
    /// Describe a stream; zero channels or a zero sample rate are rejected
    pub fn new(channels: u16, sample_rate: u32, sample_format: SampleFormat) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat("zero channels".into()));
        }
        if sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat("zero sample rate".into()));
        }
        Ok(PcmFormat {
            channels,
            sample_rate,
            sample_format,
        })
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames per second
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Per-sample encoding
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Bytes per frame (one sample for every channel)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Bytes consumed per second of playback
    pub fn byte_rate(&self) -> f64 {
        self.sample_rate as f64 * self.frame_size() as f64
    }

    /// Playback time of `bytes` bytes
    pub fn duration_of(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.byte_rate())
    }
}

/// A fully decoded, immutable PCM buffer
#[derive(Debug)]
pub struct PcmData {
    format: PcmFormat,
    bytes: Vec<u8>,
}

impl PcmData {
    /// Wrap decoded bytes
    pub fn new(format: PcmFormat, bytes: Vec<u8>) -> Self {
        PcmData { format, bytes }
    }

    /// Stream layout
    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Raw interleaved little-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of whole frames
    pub fn frames(&self) -> usize {
        self.bytes.len() / self.format.frame_size()
    }

    /// Playback time of the whole buffer
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.bytes.len())
    }
}

/// Loop interval `[start, end)` in byte offsets of the decoded stream
///
/// `start == end` disables looping: a voice then plays through to the end
/// of the buffer, and repeats (if any) restart at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoopPoints {
    start: usize,
    end: usize,
}

impl LoopPoints {
    /// Loop interval in bytes; `end < start` is rejected
    pub fn new(start: usize, end: usize) -> Result<Self> {
        let bounds = Bounds::new(start, end)?;
        Ok(LoopPoints {
            start: bounds.low(),
            end: bounds.high(),
        })
    }

    /// Loop interval given in frames
    pub fn from_frames(start_frame: usize, end_frame: usize, frame_size: usize) -> Result<Self> {
        Self::new(start_frame * frame_size, end_frame * frame_size)
    }

    /// No looping
    pub fn none() -> Self {
        LoopPoints::default()
    }

    /// First byte of the loop
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last byte of the loop
    pub fn end(&self) -> usize {
        self.end
    }

    /// Whether a loop region is defined
    pub fn is_looping(&self) -> bool {
        self.start != self.end
    }

    /// Fit the interval into a buffer of `len` bytes on frame boundaries
    pub fn aligned(&self, frame_size: usize, len: usize) -> Self {
        let frame_size = frame_size.max(1);
        let snap = |offset: usize| {
            let offset = offset.min(len);
            offset - offset % frame_size
        };
        LoopPoints {
            start: snap(self.start),
            end: snap(self.end),
        }
    }
}
