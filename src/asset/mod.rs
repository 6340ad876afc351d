//! Audio Asset Domain
//!
//! An asset is one decodable sound: a locator, optional loop points, a
//! lazily loaded PCM buffer, its own bus, and the voices currently playing
//! it.

mod audio_asset;
mod pcm;

pub use audio_asset::AudioAsset;
pub(crate) use audio_asset::AssetCore;
pub use pcm::{LoopPoints, PcmData, PcmFormat, SampleFormat};

/// Outcome of a successful load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The buffer was decoded by this call
    Loaded,
    /// The buffer was already resident
    AlreadyLoaded,
    /// Memory is tight; nothing was allocated and a later load may succeed
    Deferred {
        /// Bytes the buffer would need
        required: u64,
        /// Budget the memory probe reported
        available: u64,
    },
}

impl LoadStatus {
    /// Whether the buffer is resident after the request
    pub fn is_resident(&self) -> bool {
        !matches!(self, LoadStatus::Deferred { .. })
    }
}
