//! Audio Engine Domain
//!
//! The engine wires the collaborators together, hands out assets, and keeps
//! a weak registry of them for the memory reclamation sweep.

mod memory;
mod reclaim;

pub use memory::{BudgetProbe, MemoryLedger, UnboundedMemory};
pub use reclaim::ReclaimReport;

use crate::asset::{AssetCore, AudioAsset, LoopPoints};
use crate::backend::{AudioOutput, Decoder, MemoryProbe};
use crate::bus::{Bus, Mixer};
use crate::config::EngineConfig;
use crate::playback::Pacing;
use crate::Result;
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Collaborators shared by every asset and voice of one engine
pub(crate) struct EngineContext {
    pub(crate) mixer: Mixer,
    pub(crate) decoder: Arc<dyn Decoder>,
    pub(crate) output: Arc<dyn AudioOutput>,
    pub(crate) memory: Arc<dyn MemoryProbe>,
    pub(crate) ledger: MemoryLedger,
    pub(crate) pacing: Pacing,
}

/// Asset factory and reclamation policy
pub struct AudioEngine {
    ctx: Arc<EngineContext>,
    config: EngineConfig,
    assets: Mutex<Vec<Weak<AssetCore>>>,
    last_sweep: Mutex<Instant>,
}

impl AudioEngine {
    /// Start configuring an engine
    pub fn builder() -> AudioEngineBuilder {
        AudioEngineBuilder::default()
    }

    /// The bus tree assets are attached to
    pub fn mixer(&self) -> &Mixer {
        &self.ctx.mixer
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ledger of resident PCM bytes
    pub fn ledger(&self) -> &MemoryLedger {
        &self.ctx.ledger
    }

    /// Create an asset whose loop points come from the source, if any
    ///
    /// # Arguments
    ///
    /// * `locator` - Passed to the decoder as is
    /// * `output` - Bus the asset's own bus feeds; master when `None`
    /// * `gain` - Initial gain of the asset's own bus in dB
    ///
    /// The asset tries a memory-conscious load right away; a deferred or
    /// failed load is logged and retried by the first `play`.
    pub fn create_asset(
        &self,
        locator: impl Into<PathBuf>,
        output: Option<&Bus>,
        gain: f64,
    ) -> AudioAsset {
        self.register(AudioAsset::new(
            Arc::clone(&self.ctx),
            locator.into(),
            None,
            output,
            gain,
        ))
    }

    /// Create an asset with an explicit loop interval in bytes
    ///
    /// Overrides any loop points carried by the source.
    pub fn create_looping_asset(
        &self,
        locator: impl Into<PathBuf>,
        loop_points: LoopPoints,
        output: Option<&Bus>,
        gain: f64,
    ) -> AudioAsset {
        self.register(AudioAsset::new(
            Arc::clone(&self.ctx),
            locator.into(),
            Some(loop_points),
            output,
            gain,
        ))
    }

    fn register(&self, asset: AudioAsset) -> AudioAsset {
        let mut assets = self.assets.lock();
        assets.retain(|weak| weak.strong_count() > 0);
        assets.push(Arc::downgrade(asset.core()));
        asset
    }

    fn live_assets(&self) -> Vec<Arc<AssetCore>> {
        let mut assets = self.assets.lock();
        assets.retain(|weak| weak.strong_count() > 0);
        assets.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of assets still alive
    pub fn asset_count(&self) -> usize {
        self.live_assets().len()
    }

    /// Release the buffer of every asset that is not playing
    pub fn collect_garbage(&self) -> ReclaimReport {
        let report = reclaim::sweep(&self.live_assets());
        *self.last_sweep.lock() = Instant::now();
        log::info!("reclamation sweep: {report}");
        report
    }

    /// Sweep only if `memory_is_tight` says so
    pub fn collect_garbage_if(
        &self,
        memory_is_tight: impl FnOnce() -> bool,
    ) -> Option<ReclaimReport> {
        if memory_is_tight() {
            Some(self.collect_garbage())
        } else {
            None
        }
    }

    /// Whether the probe reports less free budget than the reclaim threshold
    pub fn memory_is_tight(&self) -> bool {
        self.ctx.memory.free_budget_bytes() < self.config.reclaim_threshold_bytes
    }

    /// Periodic housekeeping; call from the host's main loop
    ///
    /// Sweeps at most once per reclaim interval, and only under memory
    /// pressure.
    pub fn tick(&self) -> Option<ReclaimReport> {
        {
            let mut last = self.last_sweep.lock();
            if last.elapsed() < self.config.reclaim_interval() {
                return None;
            }
            *last = Instant::now();
        }
        self.collect_garbage_if(|| self.memory_is_tight())
    }

    /// Stop every voice of every asset
    pub fn stop_all(&self) {
        for asset in self.live_assets() {
            asset.stop_all_instances();
        }
    }

    /// Voices currently running across all assets
    pub fn active_voices(&self) -> usize {
        self.live_assets()
            .iter()
            .map(|asset| asset.active_instances())
            .sum()
    }
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("mixer", &self.ctx.mixer)
            .field("resident_bytes", &self.ctx.ledger.resident_bytes())
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`AudioEngine`]
///
/// Unset collaborators fall back to the defaults enabled by crate features:
/// WAV decoding with `wav`, the system device with `streaming`. The mixer
/// defaults to [`Mixer::global`].
#[derive(Default)]
pub struct AudioEngineBuilder {
    config: EngineConfig,
    mixer: Option<Mixer>,
    decoder: Option<Arc<dyn Decoder>>,
    output: Option<Arc<dyn AudioOutput>>,
    memory: Option<Arc<dyn MemoryProbe>>,
}

impl AudioEngineBuilder {
    /// Use `config` instead of the default configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach assets to `mixer` instead of the global one
    pub fn mixer(mut self, mixer: Mixer) -> Self {
        self.mixer = Some(mixer);
        self
    }

    /// Decode assets with `decoder`
    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Open voice lines on `output`
    pub fn output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Consult `probe` before memory-conscious loads
    ///
    /// Without one, the engine uses a [`BudgetProbe`] when the configuration
    /// sets a budget and [`UnboundedMemory`] otherwise.
    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    /// Validate the configuration and assemble the engine
    ///
    /// # Errors
    ///
    /// [`crate::AudioError::ConfigError`] for an invalid configuration or a missing
    /// collaborator with no default; device errors from opening the default
    /// output.
    pub fn build(self) -> Result<AudioEngine> {
        self.config.validate()?;

        let ledger = MemoryLedger::new();
        let decoder = match self.decoder {
            Some(decoder) => decoder,
            None => default_decoder()?,
        };
        let output = match self.output {
            Some(output) => output,
            None => default_output(&self.config)?,
        };
        let memory = match (self.memory, self.config.memory_budget_bytes) {
            (Some(probe), _) => probe,
            (None, Some(budget)) => Arc::new(BudgetProbe::new(budget, ledger.clone())),
            (None, None) => Arc::new(UnboundedMemory),
        };

        let ctx = EngineContext {
            mixer: self.mixer.unwrap_or_else(|| Mixer::global().clone()),
            decoder,
            output,
            memory,
            ledger,
            pacing: self.config.pacing(),
        };
        Ok(AudioEngine {
            ctx: Arc::new(ctx),
            config: self.config,
            assets: Mutex::new(Vec::new()),
            last_sweep: Mutex::new(Instant::now()),
        })
    }
}

#[cfg(feature = "wav")]
fn default_decoder() -> Result<Arc<dyn Decoder>> {
    Ok(Arc::new(crate::wav::WavDecoder::new()))
}

#[cfg(not(feature = "wav"))]
fn default_decoder() -> Result<Arc<dyn Decoder>> {
    Err(crate::AudioError::ConfigError(
        "no decoder given and the `wav` feature is disabled".into(),
    ))
}

#[cfg(feature = "streaming")]
fn default_output(config: &EngineConfig) -> Result<Arc<dyn AudioOutput>> {
    Ok(Arc::new(crate::streaming::RodioOutput::new(
        config.line_buffer_frames,
    )?))
}

#[cfg(not(feature = "streaming"))]
fn default_output(_config: &EngineConfig) -> Result<Arc<dyn AudioOutput>> {
    Err(crate::AudioError::ConfigError(
        "no output given and the `streaming` feature is disabled".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{PcmFormat, SampleFormat};
    use crate::headless::{HeadlessOutput, MemoryDecoder};
    use crate::playback::SoundControl;
    use crate::AudioError;
    use std::time::Duration;

    fn engine_with(decoder: Arc<MemoryDecoder>, config: EngineConfig) -> AudioEngine {
        AudioEngine::builder()
            .config(config)
            .mixer(Mixer::new())
            .decoder(decoder)
            .output(Arc::new(HeadlessOutput::default()))
            .build()
            .unwrap()
    }

    fn mono16() -> PcmFormat {
        PcmFormat::new(1, 8_000, SampleFormat::I16).unwrap()
    }

    #[test]
    fn test_eager_load_and_ledger() {
        let decoder = Arc::new(MemoryDecoder::new());
        decoder.insert("a", mono16(), vec![0; 1_000]);
        let engine = engine_with(decoder, EngineConfig::default());

        let asset = engine.create_asset("a", None, 0.0);
        assert!(asset.is_loaded());
        assert_eq!(engine.ledger().resident_bytes(), 1_000);
        assert_eq!(engine.asset_count(), 1);

        drop(asset);
        assert_eq!(engine.asset_count(), 0);
    }

    #[test]
    fn test_budget_defers_eager_load() {
        let decoder = Arc::new(MemoryDecoder::new());
        decoder.insert("big", mono16(), vec![0; 10_000]);
        decoder.insert("small", mono16(), vec![0; 1_000]);
        let config = EngineConfig {
            memory_budget_bytes: Some(4_096),
            ..EngineConfig::default()
        };
        let engine = engine_with(decoder, config);

        let small = engine.create_asset("small", None, 0.0);
        let big = engine.create_asset("big", None, 0.0);
        assert!(small.is_loaded());
        assert!(!big.is_loaded());
        assert_eq!(
            big.try_load(true).unwrap(),
            crate::LoadStatus::Deferred {
                required: 10_000,
                available: 3_096
            }
        );
        // Forced loads ignore the budget
        assert!(big.load(false));
    }

    #[test]
    fn test_collect_garbage_skips_busy_assets() {
        let decoder = Arc::new(MemoryDecoder::new());
        decoder.insert("idle", mono16(), vec![0; 800]);
        decoder.insert("busy", mono16(), vec![0; 1_600_000]);
        let output = Arc::new(HeadlessOutput::realtime());
        let engine = AudioEngine::builder()
            .mixer(Mixer::new())
            .decoder(decoder)
            .output(output)
            .build()
            .unwrap();

        let idle = engine.create_asset("idle", None, 0.0);
        let busy = engine.create_asset("busy", None, 0.0);
        let voice = busy.play(0).unwrap();

        let report = engine.collect_garbage();
        assert_eq!(report.released_assets, 1);
        assert_eq!(report.released_bytes, 800);
        assert_eq!(report.skipped_busy, 1);
        assert!(!idle.is_loaded());
        assert!(busy.is_loaded());

        voice.stop_sound();
        assert!(voice.wait(Duration::from_secs(2)));
    }

    #[test]
    fn test_collect_garbage_if_respects_predicate() {
        let decoder = Arc::new(MemoryDecoder::new());
        decoder.insert("a", mono16(), vec![0; 64]);
        let engine = engine_with(decoder, EngineConfig::default());
        let asset = engine.create_asset("a", None, 0.0);

        assert!(engine.collect_garbage_if(|| false).is_none());
        assert!(asset.is_loaded());
        assert!(engine.collect_garbage_if(|| true).is_some());
        assert!(!asset.is_loaded());
        assert_eq!(engine.ledger().resident_bytes(), 0);
    }

    #[test]
    fn test_tick_waits_for_interval_and_pressure() {
        let decoder = Arc::new(MemoryDecoder::new());
        decoder.insert("a", mono16(), vec![0; 2_000]);
        let config = EngineConfig {
            memory_budget_bytes: Some(3_000),
            reclaim_threshold_bytes: 1_500,
            reclaim_interval_millis: 0,
            ..EngineConfig::default()
        };
        let engine = engine_with(decoder, config);
        let asset = engine.create_asset("a", None, 0.0);
        assert!(engine.memory_is_tight());

        let report = engine.tick().unwrap();
        assert_eq!(report.released_bytes, 2_000);
        assert!(!asset.is_loaded());
        assert!(!engine.memory_is_tight());
        assert!(engine.tick().is_none());
    }

    #[test]
    fn test_tick_interval_not_elapsed() {
        let decoder = Arc::new(MemoryDecoder::new());
        let config = EngineConfig {
            memory_budget_bytes: Some(1_024),
            reclaim_interval_millis: 60_000,
            reclaim_threshold_bytes: 4_096,
            ..EngineConfig::default()
        };
        let engine = engine_with(decoder, config);
        assert!(engine.memory_is_tight());
        assert!(engine.tick().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = AudioEngine::builder()
            .config(EngineConfig {
                line_buffer_frames: 0,
                ..EngineConfig::default()
            })
            .output(Arc::new(HeadlessOutput::default()))
            .decoder(Arc::new(MemoryDecoder::new()))
            .build();
        assert!(matches!(result, Err(AudioError::ConfigError(_))));
    }
}
