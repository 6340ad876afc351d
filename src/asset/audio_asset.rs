//! Lazily loaded, reclaimable PCM asset with its own bus
//!
//! Lock order inside an asset is `storage` then `voices`; the mixer lock is
//! only ever taken last. `storage` serializes load, play and release, so a
//! buffer can never be dropped between a play's "is it loaded" check and
//! the voice registering itself.

use super::{LoadStatus, LoopPoints, PcmData, PcmFormat};
use crate::bus::{Bus, BusId, BusListener};
use crate::engine::EngineContext;
use crate::playback::voice::{self, Playback, Voice};
use crate::playback::{SoundHandle, VoiceId, VoiceOwner};
use crate::{AudioError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

struct Storage {
    pcm: Option<Arc<PcmData>>,
    format: Option<PcmFormat>,
    loop_points: LoopPoints,
}

/// Shared part of an asset, referenced by its voices and the engine registry
pub(crate) struct AssetCore {
    locator: PathBuf,
    explicit_loop: Option<LoopPoints>,
    bus_id: BusId,
    ctx: Arc<EngineContext>,
    storage: Mutex<Storage>,
    voices: Mutex<HashMap<VoiceId, Arc<Voice>>>,
}

impl AssetCore {
    pub(crate) fn locator(&self) -> &Path {
        &self.locator
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.storage.lock().pcm.is_some()
    }

    pub(crate) fn active_instances(&self) -> usize {
        self.voices.lock().len()
    }

    pub(crate) fn try_load(&self, check_memory_first: bool) -> Result<LoadStatus> {
        let mut storage = self.storage.lock();
        self.load_locked(&mut storage, check_memory_first)
    }

    fn load_locked(&self, storage: &mut Storage, check_memory_first: bool) -> Result<LoadStatus> {
        if storage.pcm.is_some() {
            return Ok(LoadStatus::AlreadyLoaded);
        }

        let mut stream = self.ctx.decoder.open(&self.locator)?;
        let required = stream.byte_len().ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{} is too large", self.locator.display()))
        })?;

        if check_memory_first {
            let available = self.ctx.memory.free_budget_bytes();
            if available < required {
                return Ok(LoadStatus::Deferred {
                    required,
                    available,
                });
            }
        }

        let len = usize::try_from(required).map_err(|_| {
            AudioError::UnsupportedFormat(format!("{} is too large", self.locator.display()))
        })?;
        let mut bytes = vec![0u8; len];
        // read_exact keeps pulling after short reads until the buffer is full
        stream.reader.read_exact(&mut bytes)?;

        let frame_size = stream.format.frame_size();
        storage.loop_points = self
            .explicit_loop
            .or(stream.loop_hint)
            .unwrap_or_default()
            .aligned(frame_size, len);
        storage.format = Some(stream.format);
        storage.pcm = Some(Arc::new(PcmData::new(stream.format, bytes)));
        self.ctx.ledger.add(required);

        log::debug!(
            "loaded {} ({} bytes, {} Hz, {} ch)",
            self.locator.display(),
            len,
            stream.format.sample_rate(),
            stream.format.channels()
        );
        Ok(LoadStatus::Loaded)
    }

    /// Load, with the outcome logged and folded into a flag
    pub(crate) fn load(&self, check_memory_first: bool) -> bool {
        match self.try_load(check_memory_first) {
            Ok(LoadStatus::Deferred {
                required,
                available,
            }) => {
                log::warn!(
                    "deferring {}: needs {required} bytes, {available} free",
                    self.locator.display()
                );
                false
            }
            Ok(_) => true,
            Err(err) => {
                log::error!("could not load {}: {err}", self.locator.display());
                false
            }
        }
    }

    /// Drop the buffer if nothing is playing it; returns the bytes freed
    pub(crate) fn release_memory(&self) -> Option<u64> {
        let mut storage = self.storage.lock();
        if !self.voices.lock().is_empty() {
            return None;
        }
        let pcm = storage.pcm.take()?;
        let freed = pcm.len() as u64;
        self.ctx.ledger.sub(freed);
        log::debug!("released {} ({freed} bytes)", self.locator.display());
        Some(freed)
    }

    fn play(self: &Arc<Self>, loops: i32, only_if_idle: bool) -> Result<Option<SoundHandle>> {
        let mut storage = self.storage.lock();
        if only_if_idle && !self.voices.lock().is_empty() {
            return Ok(None);
        }

        self.load_locked(&mut storage, false)?;
        let pcm = storage.pcm.clone().ok_or_else(|| {
            AudioError::Other(format!("{} is not resident", self.locator.display()))
        })?;

        let voice = Arc::new(Voice::new(0.0));
        {
            // Registered before the first volume read so a concurrent bus
            // change cannot slip between the two
            let mut voices = self.voices.lock();
            voices.insert(voice.id(), Arc::clone(&voice));
            voice.set_volume(self.ctx.mixer.effective_gain(self.bus_id));
        }

        let owner: Weak<dyn VoiceOwner> = Arc::downgrade(self) as Weak<dyn VoiceOwner>;
        let playback = Playback {
            pcm,
            loop_points: storage.loop_points,
            loops,
            output: Arc::clone(&self.ctx.output),
            owner,
            pacing: self.ctx.pacing,
        };
        if let Err(err) = voice::spawn(Arc::clone(&voice), playback) {
            self.voices.lock().remove(&voice.id());
            return Err(err);
        }
        Ok(Some(SoundHandle::new(voice)))
    }

    pub(crate) fn stop_all_instances(&self) {
        let stopped: Vec<Arc<Voice>> = self.voices.lock().drain().map(|(_, v)| v).collect();
        for voice in stopped {
            voice.stop();
        }
    }

    /// Push the bus chain's current gain to every active voice
    fn refresh_volume(&self) {
        let voices = self.voices.lock();
        if voices.is_empty() {
            return;
        }
        let gain = self.ctx.mixer.effective_gain(self.bus_id);
        for voice in voices.values() {
            voice.set_volume(gain);
        }
    }
}

impl BusListener for AssetCore {
    fn bus_changed(&self, _origin: BusId) {
        self.refresh_volume();
    }
}

impl VoiceOwner for AssetCore {
    fn voice_finished(&self, id: VoiceId) {
        // Already gone if stop_all_instances got there first
        self.voices.lock().remove(&id);
    }
}

/// A sound that can be played any number of times concurrently
///
/// Created through [`crate::AudioEngine::create_asset`]. Dropping the asset
/// stops its voices and detaches its bus.
pub struct AudioAsset {
    core: Arc<AssetCore>,
    bus: Bus,
}

impl AudioAsset {
    /// Build the asset and attempt a memory-conscious eager load
    pub(crate) fn new(
        ctx: Arc<EngineContext>,
        locator: PathBuf,
        loop_points: Option<LoopPoints>,
        output: Option<&Bus>,
        gain: f64,
    ) -> Self {
        let bus = ctx.mixer.create_bus(output, gain);
        let core = Arc::new(AssetCore {
            locator,
            explicit_loop: loop_points,
            bus_id: bus.id(),
            ctx,
            storage: Mutex::new(Storage {
                pcm: None,
                format: None,
                loop_points: loop_points.unwrap_or_default(),
            }),
            voices: Mutex::new(HashMap::new()),
        });
        let listener: Weak<dyn BusListener> = Arc::downgrade(&core) as Weak<dyn BusListener>;
        bus.subscribe(listener);
        core.load(true);
        AudioAsset { core, bus }
    }

    pub(crate) fn core(&self) -> &Arc<AssetCore> {
        &self.core
    }

    /// Where the asset is decoded from
    pub fn locator(&self) -> &Path {
        self.core.locator()
    }

    /// Decode the asset if it is not resident
    ///
    /// With `check_memory_first`, the load is skipped when the memory probe
    /// reports less free budget than the buffer needs. Failures are logged.
    ///
    /// # Returns
    ///
    /// `true` if the buffer is resident afterwards
    pub fn load(&self, check_memory_first: bool) -> bool {
        self.core.load(check_memory_first)
    }

    /// Like [`Self::load`] but reports why a load did not happen
    pub fn try_load(&self, check_memory_first: bool) -> Result<LoadStatus> {
        self.core.try_load(check_memory_first)
    }

    /// Memory-conscious load ahead of use, e.g. after a reclamation sweep
    pub fn prefetch(&self) -> bool {
        self.load(true)
    }

    /// Whether the PCM buffer is resident
    pub fn is_loaded(&self) -> bool {
        self.core.is_loaded()
    }

    /// Start a voice that repeats the loop region `loops` extra times
    ///
    /// Loads the buffer first if needed, ignoring memory pressure. A
    /// non-positive `loops` plays through once. If the output refuses a line
    /// the returned handle simply never produces sound.
    ///
    /// # Errors
    ///
    /// Decoding errors, and failure to start the worker thread.
    pub fn play(&self, loops: i32) -> Result<SoundHandle> {
        self.core
            .play(loops, false)?
            .ok_or_else(|| AudioError::Other("voice was not started".into()))
    }

    /// Play once, through to the end (or to the loop end when one is set)
    pub fn play_once(&self) -> Result<SoundHandle> {
        self.play(0)
    }

    /// Stop every active voice, then start a new one
    pub fn stop_and_play(&self, loops: i32) -> Result<SoundHandle> {
        self.stop_all_instances();
        self.play(loops)
    }

    /// Start a voice only if none is active
    ///
    /// The check and the start happen under the asset's lock, so concurrent
    /// callers cannot both succeed.
    pub fn timid_play(&self, loops: i32) -> Result<Option<SoundHandle>> {
        self.core.play(loops, true)
    }

    /// Stop and forget every active voice
    ///
    /// Safe to race with voices ending on their own.
    pub fn stop_all_instances(&self) {
        self.core.stop_all_instances();
    }

    /// Number of voices currently playing this asset
    pub fn active_instances(&self) -> usize {
        self.core.active_instances()
    }

    /// Drop the PCM buffer if no voice is active
    ///
    /// # Returns
    ///
    /// `true` if a buffer was released
    pub fn release_memory(&self) -> bool {
        self.core.release_memory().is_some()
    }

    /// Stream format, known once the asset has been loaded at least once
    pub fn format(&self) -> Option<PcmFormat> {
        self.core.storage.lock().format
    }

    /// Loop interval in effect, frame aligned once loaded
    pub fn loop_points(&self) -> LoopPoints {
        self.core.storage.lock().loop_points
    }

    /// Size of the resident buffer in bytes
    pub fn resident_bytes(&self) -> usize {
        self.core
            .storage
            .lock()
            .pcm
            .as_ref()
            .map_or(0, |pcm| pcm.len())
    }

    /// The asset's own bus
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Set the asset's own gain in dB; active voices follow immediately
    pub fn set_gain(&self, gain: f64) {
        self.bus.set_gain(gain);
    }

    /// The asset's own gain in dB
    pub fn gain(&self) -> f64 {
        self.bus.gain()
    }

    /// Mute or unmute this asset alone
    pub fn set_muted(&self, muted: bool) {
        self.bus.set_muted(muted);
    }

    /// Route the asset into `output` (master when `None`)
    pub fn set_output(&self, output: Option<&Bus>) -> Result<()> {
        self.bus.set_output(output)
    }

    /// Cumulative gain of the asset's chain, before device clamping
    pub fn effective_gain(&self) -> f64 {
        self.bus.effective_gain()
    }
}

impl Drop for AudioAsset {
    fn drop(&mut self) {
        self.core.stop_all_instances();
    }
}

impl fmt::Debug for AudioAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioAsset")
            .field("locator", &self.core.locator)
            .field("bus", &self.bus.id())
            .field("loaded", &self.is_loaded())
            .field("active", &self.active_instances())
            .finish()
    }
}
