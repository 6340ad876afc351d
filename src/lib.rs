//! Mixing-bus graph and streaming voice playback
//!
//! A small real-time audio engine for games: a tree of mixing buses computes
//! effective gain and mute state, and every playing sound runs on its own
//! worker thread that streams decoded PCM bytes to an output line while
//! following live gain changes.
//!
//! # Features
//! - Arena-backed bus tree with a process-wide master bus
//! - Additive gain in decibels, mute chains, live re-parenting
//! - Lazily loaded, reclaimable PCM assets with loop points
//! - One worker per voice, chunked writes paced by the line's backpressure
//! - Memory-pressure aware prefetching and a periodic reclamation sweep
//!
//! # Crate feature flags
//! - `wav` (default): WAV decoding through `hound`, loop points from `smpl` chunks
//! - `streaming` (opt-in): real output lines on the system device through `rodio`
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "wav")]
//! # {
//! use std::sync::Arc;
//! use voicebus::{AudioEngine, HeadlessOutput, SoundControl};
//!
//! let engine = AudioEngine::builder()
//!     .output(Arc::new(HeadlessOutput::default()))
//!     .build()
//!     .unwrap();
//!
//! let music = engine.mixer().create_bus(None, -6.0);
//! let theme = engine.create_asset("theme.wav", Some(&music), 0.0);
//! let voice = theme.play(2).unwrap();
//!
//! music.set_gain(-12.0);
//! voice.stop_sound();
//! # }
//! ```

#![warn(missing_docs)]

pub mod asset; // Audio Assets & PCM Storage
pub mod backend; // Decoder / Output / Memory Collaborators
pub mod bounds; // Range Clamping
pub mod bus; // Mixing-Bus Graph
pub mod config; // Engine Configuration
pub mod engine; // Asset Registry & Reclamation
pub mod headless; // In-Process Collaborators
pub mod playback; // Voice Workers
#[cfg(feature = "streaming")]
pub mod streaming; // System Audio Output
#[cfg(feature = "wav")]
pub mod wav; // WAV Decoding

/// Error types for audio engine operations
#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    /// Source data uses an encoding the decoder cannot handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inverted or non-comparable range
    #[error("Invalid bounds: high bound {high} is below low bound {low}")]
    InvalidBounds {
        /// Requested low bound
        low: String,
        /// Requested high bound
        high: String,
    },

    /// Re-parenting would close a loop in the bus tree
    #[error("Bus {child} cannot output to {target}: target is inside its own subtree")]
    BusCycle {
        /// Node being re-parented
        child: bus::BusId,
        /// Requested output
        target: bus::BusId,
    },

    /// Audio device error
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for AudioError {
    /// Converts a String into `AudioError::Other`.
    ///
    /// Prefer a specific variant where one fits; this conversion exists for
    /// ad-hoc messages built with `format!`.
    fn from(msg: String) -> Self {
        AudioError::Other(msg)
    }
}

impl From<&str> for AudioError {
    /// Converts a string slice into `AudioError::Other`.
    fn from(msg: &str) -> Self {
        AudioError::Other(msg.to_string())
    }
}

/// Result type for audio engine operations
pub type Result<T> = std::result::Result<T, AudioError>;

// Public API exports
pub use asset::{AudioAsset, LoadStatus, LoopPoints, PcmData, PcmFormat, SampleFormat};
pub use backend::{AudioOutput, DecodedStream, Decoder, MemoryProbe, OutputLine};
pub use bounds::{fit_bounds, Bounds};
pub use bus::{Bus, BusId, BusListener, Mixer, MAX_GAIN, MIN_GAIN, MUTED_GAIN};
pub use config::EngineConfig;
pub use engine::{AudioEngine, AudioEngineBuilder, BudgetProbe, MemoryLedger, ReclaimReport, UnboundedMemory};
pub use headless::{Drain, HeadlessOutput, LineSnapshot, MemoryDecoder};
pub use playback::{SoundControl, SoundHandle, VoiceId, VoiceState};
#[cfg(feature = "streaming")]
pub use streaming::RodioOutput;
#[cfg(feature = "wav")]
pub use wav::WavDecoder;
