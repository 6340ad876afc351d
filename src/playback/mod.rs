//! Voice Playback Domain
//!
//! A voice is one concurrently running stream of an asset's PCM buffer to an
//! output line. Voices never share a scheduler: each has its own thread, so
//! one line's latency cannot stall another voice or the control thread.

mod cursor;
pub(crate) mod voice;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voice::Voice;

static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique voice identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

impl VoiceId {
    fn next() -> Self {
        VoiceId(NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// Lifecycle of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Worker launched, output line not yet acquired
    Starting,
    /// Streaming (possibly paused)
    Playing,
    /// Finished or stopped; the line has been or is being released
    Stopped,
}

/// Control surface of one playing sound
pub trait SoundControl: Send + Sync {
    /// Stop the sound and release its line soon after
    ///
    /// Best effort: the worker notices within one sleep interval.
    fn stop_sound(&self);

    /// Halt output without giving up the line; the position does not advance
    fn pause_sound(&self);

    /// Continue a paused sound if it has not been stopped
    fn resume_sound(&self);

    /// Set the volume in dB; the line clamps it to its own range
    fn set_volume(&self, volume: f64);

    /// Whether the sound has not yet stopped
    fn is_running(&self) -> bool;
}

/// Notified by a worker when its voice ends for any reason
pub(crate) trait VoiceOwner: Send + Sync {
    fn voice_finished(&self, id: VoiceId);
}

/// Sleep policy between chunk writes
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Pacing {
            min,
            max: max.max(min),
        }
    }

    /// Time for half of `available` bytes to play out, within `[min, max]`
    pub(crate) fn interval(&self, available: usize, byte_rate: f64) -> Duration {
        if byte_rate <= 0.0 {
            return self.max;
        }
        let secs = available as f64 / (2.0 * byte_rate);
        Duration::from_secs_f64(secs).max(self.min).min(self.max)
    }
}

/// Handle to a playing voice
///
/// Cheap to clone. Holding a handle after the voice stopped keeps only a
/// few bytes of state alive; the PCM buffer and line are already released.
#[derive(Clone)]
pub struct SoundHandle {
    voice: Arc<Voice>,
}

impl SoundHandle {
    pub(crate) fn new(voice: Arc<Voice>) -> Self {
        SoundHandle { voice }
    }

    /// Identifier of the voice
    pub fn id(&self) -> VoiceId {
        self.voice.id()
    }

    /// Current lifecycle state
    pub fn state(&self) -> VoiceState {
        self.voice.state()
    }

    /// Whether the voice is paused
    pub fn is_paused(&self) -> bool {
        self.voice.is_paused()
    }

    /// Read position in bytes
    pub fn position(&self) -> usize {
        self.voice.position()
    }

    /// How many times playback jumped back to the loop start
    pub fn rewinds(&self) -> u32 {
        self.voice.rewinds()
    }

    /// Last volume requested for this voice, before device clamping
    pub fn volume(&self) -> f64 {
        self.voice.volume()
    }

    /// Block until the worker has finished or `timeout` elapses
    ///
    /// After a `true` return the line is closed and the voice has left its
    /// asset's active set, whether it ran out or was stopped.
    ///
    /// # Returns
    ///
    /// `true` if the worker has finished
    pub fn wait(&self, timeout: Duration) -> bool {
        self.voice.wait_stopped(timeout)
    }
}

impl SoundControl for SoundHandle {
    fn stop_sound(&self) {
        self.voice.stop();
    }

    fn pause_sound(&self) {
        self.voice.pause();
    }

    fn resume_sound(&self) {
        self.voice.resume();
    }

    fn set_volume(&self, volume: f64) {
        self.voice.set_volume(volume);
    }

    fn is_running(&self) -> bool {
        self.voice.state() != VoiceState::Stopped
    }
}

impl fmt::Debug for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_half_drain() {
        let pacing = Pacing::new(Duration::from_millis(1), Duration::from_millis(500));
        // 8000 bytes at 16000 B/s: half of 0.5 s
        assert_eq!(pacing.interval(8_000, 16_000.0), Duration::from_millis(250));
    }

    #[test]
    fn test_pacing_clamped() {
        let pacing = Pacing::new(Duration::from_millis(2), Duration::from_millis(50));
        assert_eq!(pacing.interval(0, 16_000.0), Duration::from_millis(2));
        assert_eq!(pacing.interval(1 << 30, 16_000.0), Duration::from_millis(50));
        assert_eq!(pacing.interval(100, 0.0), Duration::from_millis(50));
    }

    #[test]
    fn test_voice_ids_unique() {
        let a = VoiceId::next();
        let b = VoiceId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }
}
