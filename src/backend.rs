//! Collaborator traits for decoding, output and memory accounting
//!
//! The engine itself never touches files, codecs or audio hardware. It is
//! handed a [`Decoder`] that turns a locator into raw PCM bytes, an
//! [`AudioOutput`] that opens one [`OutputLine`] per playing voice, and a
//! [`MemoryProbe`] consulted before memory-conscious loads.

use crate::asset::{LoopPoints, PcmFormat};
use crate::bounds::Bounds;
use crate::Result;
use std::io::Read;
use std::path::Path;

/// An opened, not yet consumed PCM stream
pub struct DecodedStream {
    /// Layout of the bytes produced by `reader`
    pub format: PcmFormat,
    /// Total number of frames `reader` will yield
    pub frame_count: u64,
    /// Loop interval authored into the source, if the container carries one
    pub loop_hint: Option<LoopPoints>,
    /// Interleaved little-endian PCM bytes
    pub reader: Box<dyn Read + Send>,
}

impl DecodedStream {
    /// Bytes needed to hold the whole stream
    ///
    /// # Returns
    ///
    /// `None` when the size does not fit in memory addressing at all
    pub fn byte_len(&self) -> Option<u64> {
        self.frame_count.checked_mul(self.format.frame_size() as u64)
    }
}

/// Source of decoded PCM data
///
/// # Example
///
/// ```
/// use voicebus::{Decoder, MemoryDecoder, PcmFormat, SampleFormat};
/// use std::path::Path;
///
/// let decoder = MemoryDecoder::new();
/// let format = PcmFormat::new(1, 8_000, SampleFormat::I16).unwrap();
/// decoder.insert("beep", format, vec![0; 800]);
///
/// let stream = decoder.open(Path::new("beep")).unwrap();
/// assert_eq!(stream.frame_count, 400);
/// ```
pub trait Decoder: Send + Sync {
    /// Open `locator` and describe its PCM stream
    ///
    /// # Errors
    ///
    /// [`crate::AudioError::UnsupportedFormat`] when the data cannot be
    /// decoded, [`crate::AudioError::Io`] when it cannot be read. The engine
    /// treats both the same way: the asset stays unloaded.
    fn open(&self, locator: &Path) -> Result<DecodedStream>;
}

/// Factory for output lines on some audio device
pub trait AudioOutput: Send + Sync {
    /// Acquire and open a line for a stream of the given format
    ///
    /// The line is returned open but not started.
    ///
    /// # Errors
    ///
    /// [`crate::AudioError::DeviceError`] when the device refuses a line.
    fn open_line(&self, format: &PcmFormat) -> Result<Box<dyn OutputLine>>;
}

/// One voice's connection to the device
///
/// Lines are driven by a single worker thread; the engine serializes every
/// call, including gain changes coming from other threads.
pub trait OutputLine: Send {
    /// Begin (or resume) consuming queued data
    fn start(&mut self);

    /// Queue PCM bytes without blocking
    ///
    /// # Arguments
    ///
    /// * `data` - Whole frames in the line's format
    ///
    /// # Returns
    ///
    /// Number of bytes accepted; may be less than `data.len()`, and 0 when
    /// the line is full.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Bytes that can be written right now without being refused
    fn available(&self) -> usize;

    /// Total capacity of the line's queue in bytes
    fn buffer_size(&self) -> usize;

    /// Halt consumption; queued data stays queued
    fn stop(&mut self);

    /// Release the line; no further data is accepted
    fn close(&mut self);

    /// Whether the line is still open
    fn is_open(&self) -> bool;

    /// Gain range supported by the line's volume control, in dB
    fn gain_range(&self) -> Bounds<f64>;

    /// Apply a gain in dB that already lies inside [`Self::gain_range`]
    fn set_gain(&mut self, gain: f64);
}

/// Source of truth for how much memory loads may still use
pub trait MemoryProbe: Send + Sync {
    /// Bytes that may be allocated before memory counts as exhausted
    fn free_budget_bytes(&self) -> u64;
}
