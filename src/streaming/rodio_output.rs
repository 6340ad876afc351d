//! Output lines on the system audio device using rodio
//!
//! Each line is a rodio `Sink` fed by a [`RingBuffer`]: the voice worker
//! converts its PCM bytes to `f32` samples and queues them, the device
//! thread pulls them through [`RingSource`].

use super::ring_buffer::RingBuffer;
use super::SOURCE_BATCH_SAMPLES;
use crate::asset::{PcmFormat, SampleFormat};
use crate::backend::{AudioOutput, OutputLine};
use crate::bounds::Bounds;
use crate::bus::{MAX_GAIN, MIN_GAIN};
use crate::{AudioError, Result};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Device gain range of a rodio line, in dB
const LINE_GAIN: Bounds<f64> = Bounds::from_sorted(MIN_GAIN, MAX_GAIN);

/// Convert a gain in dB to the linear amplitude rodio expects
///
/// The bottom of the range maps to silence rather than to -80 dB.
fn amplitude(gain: f64) -> f32 {
    if gain <= LINE_GAIN.low() {
        0.0
    } else {
        10f64.powf(gain / 20.0) as f32
    }
}

/// Audio source that reads from a line's ring
struct RingSource {
    ring: Arc<RingBuffer>,
    channels: u16,
    sample_rate: u32,
    closed: Arc<AtomicBool>,
    /// Batch read from the ring, to keep lock traffic low
    batch: Vec<f32>,
    batch_pos: usize,
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(SOURCE_BATCH_SAMPLES)
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        if self.batch_pos >= self.batch.len() {
            let read = self.ring.read(&mut self.batch);
            // Underrun: play silence to keep the stream alive
            self.batch[read..].fill(0.0);
            self.batch_pos = 0;
        }
        let sample = self.batch[self.batch_pos];
        self.batch_pos += 1;
        Some(sample)
    }
}

/// Output opening one rodio sink per voice on the default device
///
/// rodio's `OutputStream` must stay on the thread that created it, so it
/// lives on a small keeper thread for as long as this value exists.
pub struct RodioOutput {
    handle: OutputStreamHandle,
    line_frames: usize,
    _keeper: mpsc::Sender<()>,
}

impl RodioOutput {
    /// Open the default output device
    ///
    /// # Arguments
    ///
    /// * `line_frames` - Queue size of every line, in frames
    ///
    /// # Errors
    ///
    /// [`AudioError::DeviceError`] when no device can be opened.
    pub fn new(line_frames: usize) -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (keeper, shutdown) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("rodio-stream".into())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if handle_tx.send(Ok(handle)).is_ok() {
                        // Returns once the output is dropped
                        let _ = shutdown.recv();
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| AudioError::DeviceError("audio stream thread exited".into()))?
            .map_err(|e| AudioError::DeviceError(format!("Failed to create audio stream: {e}")))?;
        log::debug!("opened default output device");

        Ok(RodioOutput {
            handle,
            line_frames: line_frames.max(1),
            _keeper: keeper,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn open_line(&self, format: &PcmFormat) -> Result<Box<dyn OutputLine>> {
        let sink = Sink::try_new(&self.handle)
            .map_err(|e| AudioError::DeviceError(format!("Failed to create audio sink: {e}")))?;
        sink.pause();

        let channels = usize::from(format.channels());
        let ring = Arc::new(RingBuffer::new(self.line_frames * channels + 1)?);
        let closed = Arc::new(AtomicBool::new(false));
        sink.append(RingSource {
            ring: Arc::clone(&ring),
            channels: format.channels(),
            sample_rate: format.sample_rate(),
            closed: Arc::clone(&closed),
            batch: vec![0.0; SOURCE_BATCH_SAMPLES],
            batch_pos: SOURCE_BATCH_SAMPLES,
        });

        Ok(Box::new(RodioLine {
            sink,
            ring,
            closed,
            format: *format,
            scratch: Vec::new(),
        }))
    }
}

struct RodioLine {
    sink: Sink,
    ring: Arc<RingBuffer>,
    closed: Arc<AtomicBool>,
    format: PcmFormat,
    scratch: Vec<f32>,
}

impl RodioLine {
    fn free_frames(&self) -> usize {
        self.ring.available_write() / usize::from(self.format.channels())
    }
}

impl OutputLine for RodioLine {
    fn start(&mut self) {
        self.sink.play();
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if !self.is_open() {
            return 0;
        }
        let frame_size = self.format.frame_size();
        let frames = (data.len() / frame_size).min(self.free_frames());
        if frames == 0 {
            return 0;
        }

        let sample_format: SampleFormat = self.format.sample_format();
        let width = sample_format.bytes_per_sample();
        self.scratch.clear();
        self.scratch.extend(
            data[..frames * frame_size]
                .chunks_exact(width)
                .map(|bytes| sample_format.to_f32(bytes)),
        );
        let queued = self.ring.write(&self.scratch);
        queued / usize::from(self.format.channels()) * frame_size
    }

    fn available(&self) -> usize {
        if !self.is_open() {
            return 0;
        }
        self.free_frames() * self.format.frame_size()
    }

    fn buffer_size(&self) -> usize {
        (self.ring.capacity() - 1) / usize::from(self.format.channels()) * self.format.frame_size()
    }

    fn stop(&mut self) {
        self.sink.pause();
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.ring.clear();
        self.sink.stop();
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn gain_range(&self) -> Bounds<f64> {
        LINE_GAIN
    }

    fn set_gain(&mut self, gain: f64) {
        self.sink.set_volume(amplitude(gain));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn try_output() -> Option<RodioOutput> {
        match RodioOutput::new(1024) {
            Ok(output) => Some(output),
            Err(e) => {
                eprintln!("Skipping audio device test: {e}");
                None
            }
        }
    }

    #[test]
    fn test_amplitude() {
        assert_relative_eq!(amplitude(0.0), 1.0);
        assert_relative_eq!(amplitude(-20.0), 0.1, epsilon = 1e-6);
        assert_eq!(amplitude(MIN_GAIN), 0.0);
        assert_eq!(amplitude(crate::bus::MUTED_GAIN), 0.0);
    }

    #[test]
    fn test_line_accepts_whole_frames() {
        let Some(output) = try_output() else {
            return;
        };
        let format = PcmFormat::new(2, 44_100, SampleFormat::I16).unwrap();
        let mut line = output.open_line(&format).unwrap();
        assert!(line.is_open());
        assert_eq!(line.available() % 4, 0);

        // A trailing partial frame is never taken
        assert_eq!(line.write(&[0u8; 10]), 8);

        line.close();
        assert!(!line.is_open());
        assert_eq!(line.write(&[0u8; 8]), 0);
    }
}
