//! In-process decoder and output
//!
//! [`MemoryDecoder`] serves PCM registered at runtime under arbitrary
//! locators. [`HeadlessOutput`] opens lines that consume data without a
//! device and keep a log of everything written to them, which makes them
//! useful for dedicated servers, offline tools and tests.

use crate::asset::{LoopPoints, PcmFormat};
use crate::backend::{AudioOutput, DecodedStream, Decoder, OutputLine};
use crate::bounds::Bounds;
use crate::bus::{MAX_GAIN, MIN_GAIN};
use crate::{AudioError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default queue size of a headless line in bytes
pub const DEFAULT_LINE_BYTES: usize = 4096;

struct Entry {
    format: PcmFormat,
    bytes: Arc<Vec<u8>>,
    loop_hint: Option<LoopPoints>,
}

/// Decoder over PCM buffers held in memory
#[derive(Default)]
pub struct MemoryDecoder {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    opens: AtomicUsize,
    read_chunk: Option<usize>,
}

impl MemoryDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `read` call return at most `bytes` bytes
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = Some(bytes.max(1));
        self
    }

    /// Register `bytes` under `locator`, replacing any previous entry
    pub fn insert(&self, locator: impl Into<PathBuf>, format: PcmFormat, bytes: Vec<u8>) {
        self.insert_entry(locator.into(), format, bytes, None);
    }

    /// Register `bytes` with loop points the stream should advertise
    pub fn insert_with_loop(
        &self,
        locator: impl Into<PathBuf>,
        format: PcmFormat,
        bytes: Vec<u8>,
        loop_points: LoopPoints,
    ) {
        self.insert_entry(locator.into(), format, bytes, Some(loop_points));
    }

    fn insert_entry(
        &self,
        locator: PathBuf,
        format: PcmFormat,
        bytes: Vec<u8>,
        loop_hint: Option<LoopPoints>,
    ) {
        let entry = Entry {
            format,
            bytes: Arc::new(bytes),
            loop_hint,
        };
        self.entries.lock().insert(locator, entry);
    }

    /// Forget `locator`; later opens fail with a not-found error
    pub fn remove(&self, locator: impl AsRef<Path>) -> bool {
        self.entries.lock().remove(locator.as_ref()).is_some()
    }

    /// How many streams have been opened so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl Decoder for MemoryDecoder {
    fn open(&self, locator: &Path) -> Result<DecodedStream> {
        let entries = self.entries.lock();
        let entry = entries.get(locator).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not registered", locator.display()),
            )
        })?;
        self.opens.fetch_add(1, Ordering::Relaxed);

        let frame_count = (entry.bytes.len() / entry.format.frame_size()) as u64;
        Ok(DecodedStream {
            format: entry.format,
            frame_count,
            loop_hint: entry.loop_hint,
            reader: Box::new(SharedReader {
                data: Arc::clone(&entry.bytes),
                pos: 0,
                chunk: self.read_chunk.unwrap_or(usize::MAX),
            }),
        })
    }
}

struct SharedReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    chunk: usize,
}

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = buf.len().min(remaining.len()).min(self.chunk);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// How a headless line consumes queued data while started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Queued data is gone as soon as anyone looks
    Immediate,
    /// Queued data drains at the stream's byte rate
    Realtime,
}

/// What one headless line has seen
#[derive(Debug, Clone)]
pub struct LineSnapshot {
    /// Format the line was opened with
    pub format: PcmFormat,
    /// Every byte accepted, in order
    pub written: Vec<u8>,
    /// Every gain applied, in order
    pub gains: Vec<f64>,
    /// Number of `start` calls
    pub starts: usize,
    /// Number of `stop` calls
    pub stops: usize,
    /// Whether `close` was called
    pub closed: bool,
}

impl LineSnapshot {
    /// Gain most recently applied
    pub fn last_gain(&self) -> Option<f64> {
        self.gains.last().copied()
    }
}

struct LineState {
    log: LineSnapshot,
    capacity: usize,
    queued: f64,
    running: bool,
    last_drain: Instant,
}

impl LineState {
    fn drain(&mut self, mode: Drain) {
        let now = Instant::now();
        if self.running {
            self.queued = match mode {
                Drain::Immediate => 0.0,
                Drain::Realtime => {
                    let played = now.duration_since(self.last_drain).as_secs_f64()
                        * self.log.format.byte_rate();
                    (self.queued - played).max(0.0)
                }
            };
        }
        self.last_drain = now;
    }

    fn available(&self) -> usize {
        if self.log.closed {
            return 0;
        }
        self.capacity.saturating_sub(self.queued.ceil() as usize)
    }
}

/// Output that needs no audio device
pub struct HeadlessOutput {
    line_bytes: usize,
    gain_range: Bounds<f64>,
    drain: Drain,
    failing: AtomicBool,
    lines: Mutex<Vec<Arc<Mutex<LineState>>>>,
}

impl HeadlessOutput {
    /// Output whose lines queue up to `line_bytes` and drain immediately
    pub fn new(line_bytes: usize) -> Self {
        HeadlessOutput {
            line_bytes,
            gain_range: Bounds::from_sorted(MIN_GAIN, MAX_GAIN),
            drain: Drain::Immediate,
            failing: AtomicBool::new(false),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Output whose lines drain at the stream's byte rate
    pub fn realtime() -> Self {
        Self::new(DEFAULT_LINE_BYTES).with_drain(Drain::Realtime)
    }

    /// Change how lines drain
    pub fn with_drain(mut self, drain: Drain) -> Self {
        self.drain = drain;
        self
    }

    /// Report `range` as every line's gain range
    pub fn with_gain_range(mut self, range: Bounds<f64>) -> Self {
        self.gain_range = range;
        self
    }

    /// Refuse (or accept again) new lines
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Lines opened so far, including closed ones
    pub fn line_count(&self) -> usize {
        self.lines.lock().len()
    }

    /// Copy of every line's log, in opening order
    pub fn lines(&self) -> Vec<LineSnapshot> {
        self.lines
            .lock()
            .iter()
            .map(|line| line.lock().log.clone())
            .collect()
    }
}

impl Default for HeadlessOutput {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_BYTES)
    }
}

impl AudioOutput for HeadlessOutput {
    fn open_line(&self, format: &PcmFormat) -> Result<Box<dyn OutputLine>> {
        if self.failing.load(Ordering::Acquire) {
            return Err(AudioError::DeviceError("headless output refuses lines".into()));
        }
        let frame = format.frame_size();
        let capacity = (self.line_bytes - self.line_bytes % frame).max(frame);
        let state = Arc::new(Mutex::new(LineState {
            log: LineSnapshot {
                format: *format,
                written: Vec::new(),
                gains: Vec::new(),
                starts: 0,
                stops: 0,
                closed: false,
            },
            capacity,
            queued: 0.0,
            running: false,
            last_drain: Instant::now(),
        }));
        self.lines.lock().push(Arc::clone(&state));
        Ok(Box::new(HeadlessLine {
            state,
            drain: self.drain,
            gain_range: self.gain_range,
        }))
    }
}

struct HeadlessLine {
    state: Arc<Mutex<LineState>>,
    drain: Drain,
    gain_range: Bounds<f64>,
}

impl OutputLine for HeadlessLine {
    fn start(&mut self) {
        let mut state = self.state.lock();
        state.drain(self.drain);
        state.running = true;
        state.log.starts += 1;
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        state.drain(self.drain);
        let n = data.len().min(state.available());
        state.log.written.extend_from_slice(&data[..n]);
        state.queued += n as f64;
        n
    }

    fn available(&self) -> usize {
        let mut state = self.state.lock();
        state.drain(self.drain);
        state.available()
    }

    fn buffer_size(&self) -> usize {
        self.state.lock().capacity
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.drain(self.drain);
        state.running = false;
        state.log.stops += 1;
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.queued = 0.0;
        state.log.closed = true;
    }

    fn is_open(&self) -> bool {
        !self.state.lock().log.closed
    }

    fn gain_range(&self) -> Bounds<f64> {
        self.gain_range
    }

    fn set_gain(&mut self, gain: f64) {
        self.state.lock().log.gains.push(gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::SampleFormat;

    fn stereo16() -> PcmFormat {
        PcmFormat::new(2, 44_100, SampleFormat::I16).unwrap()
    }

    #[test]
    fn test_decoder_short_reads() {
        let decoder = MemoryDecoder::new().with_read_chunk(3);
        decoder.insert("clip", stereo16(), (0..16).collect());

        let mut stream = decoder.open(Path::new("clip")).unwrap();
        assert_eq!(stream.frame_count, 4);
        let mut buf = [0u8; 16];
        assert_eq!(stream.reader.read(&mut buf).unwrap(), 3);
        let mut rest = vec![0u8; 13];
        stream.reader.read_exact(&mut rest).unwrap();
        assert_eq!(rest[12], 15);
        assert_eq!(decoder.open_count(), 1);
    }

    #[test]
    fn test_decoder_missing_locator() {
        let decoder = MemoryDecoder::new();
        decoder.insert("x", stereo16(), vec![0; 4]);
        assert!(decoder.remove("x"));
        assert!(matches!(
            decoder.open(Path::new("x")),
            Err(AudioError::Io(e)) if e.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn test_line_capacity_in_whole_frames() {
        let output = HeadlessOutput::new(10);
        let mut line = output.open_line(&stereo16()).unwrap();
        assert_eq!(line.buffer_size(), 8);

        // Stopped lines fill up
        assert_eq!(line.write(&[1; 6]), 6);
        assert_eq!(line.write(&[2; 6]), 2);
        assert_eq!(line.available(), 0);

        line.start();
        assert_eq!(line.available(), 8);
        line.close();
        assert!(!line.is_open());
        assert_eq!(line.write(&[3; 4]), 0);

        let log = &output.lines()[0];
        assert_eq!(log.written, vec![1, 1, 1, 1, 1, 1, 2, 2]);
        assert_eq!(log.starts, 1);
        assert!(log.closed);
    }

    #[test]
    fn test_realtime_line_drains_slowly() {
        let output = HeadlessOutput::realtime();
        let mut line = output.open_line(&stereo16()).unwrap();
        line.start();
        let cap = line.buffer_size();
        assert_eq!(line.write(&vec![0; cap]), cap);
        assert!(line.available() < cap / 2);
    }

    #[test]
    fn test_failing_output() {
        let output = HeadlessOutput::default();
        output.set_failing(true);
        assert!(matches!(
            output.open_line(&stereo16()),
            Err(AudioError::DeviceError(_))
        ));
        output.set_failing(false);
        assert!(output.open_line(&stereo16()).is_ok());
        assert_eq!(output.line_count(), 1);
    }

    #[test]
    fn test_gain_log() {
        let output = HeadlessOutput::default().with_gain_range(Bounds::new(-40.0, 0.0).unwrap());
        let mut line = output.open_line(&stereo16()).unwrap();
        assert_eq!(line.gain_range().low(), -40.0);
        line.set_gain(-3.0);
        assert_eq!(output.lines()[0].last_gain(), Some(-3.0));
    }
}
