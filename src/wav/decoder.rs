//! hound-backed WAV decoder

use super::smpl::{self, SampleLoop};
use crate::asset::{LoopPoints, PcmFormat, SampleFormat};
use crate::backend::{DecodedStream, Decoder};
use crate::{AudioError, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Samples converted per refill of the byte reader
const SAMPLES_PER_REFILL: usize = 4096;

/// Decoder for RIFF/WAVE files on disk
///
/// Integer PCM of 8, 16, 24 and 32 bits and 32-bit float are supported.
/// The first loop of a `smpl` chunk becomes the stream's loop hint.
#[derive(Debug, Clone, Default)]
pub struct WavDecoder {
    root: Option<PathBuf>,
}

impl WavDecoder {
    /// Decoder resolving locators as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder resolving relative locators against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        WavDecoder {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &Path) -> PathBuf {
        match &self.root {
            Some(root) if locator.is_relative() => root.join(locator),
            _ => locator.to_path_buf(),
        }
    }
}

fn map_hound(err: hound::Error) -> AudioError {
    match err {
        hound::Error::IoError(e) => AudioError::Io(e),
        other => AudioError::UnsupportedFormat(other.to_string()),
    }
}

fn sample_format(spec: &hound::WavSpec) -> Result<SampleFormat> {
    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => Ok(SampleFormat::I8),
        (hound::SampleFormat::Int, 16) => Ok(SampleFormat::I16),
        (hound::SampleFormat::Int, 24) => Ok(SampleFormat::I24),
        (hound::SampleFormat::Int, 32) => Ok(SampleFormat::I32),
        (hound::SampleFormat::Float, 32) => Ok(SampleFormat::F32),
        (kind, bits) => Err(AudioError::UnsupportedFormat(format!(
            "{bits}-bit {kind:?} samples"
        ))),
    }
}

fn loop_hint(path: &Path, frame_size: usize) -> Option<LoopPoints> {
    let mut file = BufReader::new(File::open(path).ok()?);
    let found: SampleLoop = match smpl::find_loop(&mut file) {
        Ok(found) => found?,
        Err(e) => {
            log::debug!("{}: ignoring loop chunk: {e}", path.display());
            return None;
        }
    };
    if found.kind != 0 {
        log::debug!(
            "{}: loop type {} played forward",
            path.display(),
            found.kind
        );
    }
    log::debug!(
        "{}: loop frames {}..={} (play count {})",
        path.display(),
        found.start_frame,
        found.end_frame,
        found.play_count
    );
    LoopPoints::from_frames(
        found.start_frame as usize,
        found.end_frame as usize + 1,
        frame_size,
    )
    .ok()
}

impl Decoder for WavDecoder {
    fn open(&self, locator: &Path) -> Result<DecodedStream> {
        let path = self.resolve(locator);
        let reader = hound::WavReader::open(&path).map_err(map_hound)?;
        let spec = reader.spec();
        let sample_format = sample_format(&spec)?;
        let format = PcmFormat::new(spec.channels, spec.sample_rate, sample_format)?;

        Ok(DecodedStream {
            format,
            frame_count: u64::from(reader.duration()),
            loop_hint: loop_hint(&path, format.frame_size()),
            reader: Box::new(SampleBytes {
                reader,
                sample_format,
                pending: Vec::with_capacity(SAMPLES_PER_REFILL * 4),
                pos: 0,
            }),
        })
    }
}

/// Presents hound's sample iterator as little-endian PCM bytes
struct SampleBytes {
    reader: hound::WavReader<BufReader<File>>,
    sample_format: SampleFormat,
    pending: Vec<u8>,
    pos: usize,
}

impl SampleBytes {
    fn refill(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pos = 0;
        let invalid = |e: hound::Error| io::Error::new(io::ErrorKind::InvalidData, e.to_string());

        if self.sample_format == SampleFormat::F32 {
            for sample in self.reader.samples::<f32>().take(SAMPLES_PER_REFILL) {
                self.pending
                    .extend_from_slice(&sample.map_err(invalid)?.to_le_bytes());
            }
            return Ok(());
        }

        for sample in self.reader.samples::<i32>().take(SAMPLES_PER_REFILL) {
            let sample = sample.map_err(invalid)?;
            match self.sample_format {
                SampleFormat::I8 => self.pending.push(sample as i8 as u8),
                SampleFormat::I16 => self
                    .pending
                    .extend_from_slice(&(sample as i16).to_le_bytes()),
                SampleFormat::I24 => self.pending.extend_from_slice(&sample.to_le_bytes()[..3]),
                SampleFormat::I32 | SampleFormat::F32 => {
                    self.pending.extend_from_slice(&sample.to_le_bytes())
                }
            }
        }
        Ok(())
    }
}

impl Read for SampleBytes {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            self.refill()?;
        }
        let available = &self.pending[self.pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_i16(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    /// Append a `smpl` chunk and patch the RIFF size
    fn append_smpl(path: &Path, start: u32, end: u32) {
        let mut body = vec![0u8; 28];
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        for field in [0u32, 0, start, end, 0, 0] {
            body.extend_from_slice(&field.to_le_bytes());
        }
        let mut bytes = std::fs::read(path).unwrap();
        bytes.extend_from_slice(b"smpl");
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        let riff_size = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&riff_size.to_le_bytes());
        let mut file = File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }

    #[test]
    fn test_decode_stereo_i16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_i16(&path, 2, &[1, -1, 256, -256]);

        let mut stream = WavDecoder::new().open(&path).unwrap();
        assert_eq!(stream.format.channels(), 2);
        assert_eq!(stream.format.sample_format(), SampleFormat::I16);
        assert_eq!(stream.frame_count, 2);
        assert_eq!(stream.byte_len(), Some(8));
        assert!(stream.loop_hint.is_none());

        let mut bytes = Vec::new();
        stream.reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 0, 0xff, 0xff, 0, 1, 0, 0xff]);
    }

    #[test]
    fn test_loop_hint_end_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_i16(&path, 1, &[0; 100]);
        append_smpl(&path, 10, 19);

        let stream = WavDecoder::with_root(dir.path())
            .open(Path::new("loop.wav"))
            .unwrap();
        let hint = stream.loop_hint.unwrap();
        assert_eq!((hint.start(), hint.end()), (20, 40));
        assert_eq!(stream.frame_count, 100);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = WavDecoder::new().open(&dir.path().join("nope.wav"));
        assert!(matches!(result, Err(AudioError::Io(_))));
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not a wave file").unwrap();
        let result = WavDecoder::new().open(&path);
        assert!(matches!(result, Err(AudioError::UnsupportedFormat(_))));
    }
}
