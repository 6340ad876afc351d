//! Voice state and the per-voice streaming worker
//!
//! Each voice runs on its own thread:
//! - Opens an output line for the asset's format
//! - Writes chunks sized by the line's free capacity
//! - Sleeps roughly until the line is half drained
//! - Releases the line and leaves its asset's active set on exit
//!
//! Control calls from other threads go through two small locks: `control`
//! (run state, pause flag, wake-ups) and `output` (the line and its volume).
//! `output` may be taken while `control` is held, never the reverse.

use super::cursor::{PlaybackCursor, Step};
use super::{Pacing, VoiceId, VoiceOwner, VoiceState};
use crate::asset::{LoopPoints, PcmData};
use crate::backend::{AudioOutput, OutputLine};
use crate::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

struct Control {
    state: VoiceState,
    paused: bool,
    /// Set by the worker once the line is closed and the owner notified
    finished: bool,
}

struct OutputSlot {
    line: Option<Box<dyn OutputLine>>,
    /// Last requested volume in dB, applied again whenever a line is installed
    volume: f64,
}

/// Shared state of one playing voice
pub(crate) struct Voice {
    id: VoiceId,
    control: Mutex<Control>,
    wake: Condvar,
    output: Mutex<OutputSlot>,
    position: AtomicUsize,
    rewinds: AtomicU32,
}

impl Voice {
    pub(crate) fn new(volume: f64) -> Self {
        Voice {
            id: VoiceId::next(),
            control: Mutex::new(Control {
                state: VoiceState::Starting,
                paused: false,
                finished: false,
            }),
            wake: Condvar::new(),
            output: Mutex::new(OutputSlot { line: None, volume }),
            position: AtomicUsize::new(0),
            rewinds: AtomicU32::new(0),
        }
    }

    pub(crate) fn id(&self) -> VoiceId {
        self.id
    }

    pub(crate) fn state(&self) -> VoiceState {
        self.control.lock().state
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.control.lock().paused
    }

    pub(crate) fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn rewinds(&self) -> u32 {
        self.rewinds.load(Ordering::Acquire)
    }

    pub(crate) fn volume(&self) -> f64 {
        self.output.lock().volume
    }

    /// Request termination; the worker exits within one wait
    pub(crate) fn stop(&self) {
        {
            let mut control = self.control.lock();
            control.state = VoiceState::Stopped;
            control.paused = false;
            self.wake.notify_all();
        }
        if let Some(line) = self.output.lock().line.as_mut() {
            line.stop();
        }
    }

    /// Halt the line; the worker blocks without advancing until resumed
    pub(crate) fn pause(&self) {
        {
            let mut control = self.control.lock();
            if control.state == VoiceState::Stopped {
                return;
            }
            control.paused = true;
        }
        if let Some(line) = self.output.lock().line.as_mut() {
            line.stop();
        }
    }

    pub(crate) fn resume(&self) {
        let playing = {
            let mut control = self.control.lock();
            if control.state == VoiceState::Stopped {
                return;
            }
            control.paused = false;
            self.wake.notify_all();
            control.state == VoiceState::Playing
        };
        if playing {
            if let Some(line) = self.output.lock().line.as_mut() {
                line.start();
            }
        }
    }

    /// Remember `volume` and push it to the line, fitted to the line's range
    ///
    /// NaN is ignored.
    pub(crate) fn set_volume(&self, volume: f64) {
        if volume.is_nan() {
            log::warn!("{}: ignoring NaN volume", self.id);
            return;
        }
        let mut slot = self.output.lock();
        slot.volume = volume;
        if let Some(line) = slot.line.as_mut() {
            apply_gain(line.as_mut(), volume);
        }
    }

    /// Block until the worker has released the line or `timeout` passes
    pub(crate) fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.control.lock();
        while !control.finished {
            if self.wake.wait_until(&mut control, deadline).timed_out() {
                break;
            }
        }
        control.finished
    }

    /// Park the line in the output slot; it is started by `begin_playing`
    fn install_line(&self, mut line: Box<dyn OutputLine>) {
        let mut slot = self.output.lock();
        apply_gain(line.as_mut(), slot.volume);
        slot.line = Some(line);
    }

    fn with_line<R>(&self, f: impl FnOnce(&mut dyn OutputLine) -> R) -> Option<R> {
        self.output.lock().line.as_mut().map(|line| f(line.as_mut()))
    }

    /// Move from `Starting` to `Playing` unless a stop came first
    ///
    /// The line is started only when no pause arrived while starting;
    /// otherwise `resume` starts it.
    fn begin_playing(&self) -> bool {
        let mut control = self.control.lock();
        if control.state == VoiceState::Stopped {
            return false;
        }
        control.state = VoiceState::Playing;
        if !control.paused {
            if let Some(line) = self.output.lock().line.as_mut() {
                line.start();
            }
        }
        true
    }

    /// Park while paused; returns whether the voice should keep streaming
    fn wait_while_paused(&self) -> bool {
        let mut control = self.control.lock();
        while control.paused && control.state == VoiceState::Playing {
            self.wake.wait(&mut control);
        }
        control.state == VoiceState::Playing
    }

    /// Sleep between chunks; a stop or pause cuts the sleep short
    fn rest(&self, interval: Duration) -> bool {
        let mut control = self.control.lock();
        if control.state == VoiceState::Playing && !control.paused {
            self.wake.wait_for(&mut control, interval);
        }
        control.state == VoiceState::Playing
    }

    fn finish(&self) {
        let mut control = self.control.lock();
        control.state = VoiceState::Stopped;
        control.paused = false;
        control.finished = true;
        self.wake.notify_all();
    }
}

fn apply_gain(line: &mut dyn OutputLine, volume: f64) {
    let range = line.gain_range();
    line.set_gain(range.fit(volume));
}

/// Everything a worker needs besides the voice itself
pub(crate) struct Playback {
    pub(crate) pcm: Arc<PcmData>,
    pub(crate) loop_points: LoopPoints,
    pub(crate) loops: i32,
    pub(crate) output: Arc<dyn AudioOutput>,
    pub(crate) owner: Weak<dyn VoiceOwner>,
    pub(crate) pacing: Pacing,
}

/// Start the worker thread for `voice`
pub(crate) fn spawn(voice: Arc<Voice>, playback: Playback) -> Result<()> {
    thread::Builder::new()
        .name(format!("voice-{}", voice.id()))
        .spawn(move || run(voice, playback))?;
    Ok(())
}

fn run(voice: Arc<Voice>, playback: Playback) {
    let id = voice.id();
    match playback.output.open_line(playback.pcm.format()) {
        Ok(line) => {
            voice.install_line(line);
            if voice.begin_playing() {
                log::debug!("{id}: playing {} bytes", playback.pcm.len());
                stream(&voice, &playback);
            }
        }
        Err(err) => log::warn!("{id}: no output line, voice will stay silent: {err}"),
    }

    if let Some(mut line) = voice.output.lock().line.take() {
        line.stop();
        line.close();
    }
    // Leave the active set before waking waiters, whether the voice ran out
    // or was stopped
    if let Some(owner) = playback.owner.upgrade() {
        owner.voice_finished(id);
    }
    voice.finish();
    log::debug!("{id}: finished after {} rewinds", voice.rewinds());
}

fn stream(voice: &Voice, playback: &Playback) {
    let pcm = &playback.pcm;
    let format = pcm.format();
    let mut cursor = PlaybackCursor::new(
        pcm.len(),
        format.frame_size(),
        playback.loop_points,
        playback.loops,
    );

    loop {
        if !voice.wait_while_paused() {
            break;
        }

        let accepted = voice
            .with_line(|line| {
                if !line.is_open() {
                    return None;
                }
                let chunk = cursor.next_chunk(line.available())?;
                if chunk.is_empty() {
                    return Some(0);
                }
                Some(line.write(&pcm.as_bytes()[chunk]))
            })
            .flatten();

        let step = cursor.advance(accepted);
        voice.position.store(cursor.position(), Ordering::Release);
        match step {
            Step::Rewound => {
                voice.rewinds.store(cursor.rewinds(), Ordering::Release);
                continue;
            }
            Step::Finished => break,
            Step::Continue => {}
        }

        let available = voice.with_line(|line| line.available()).unwrap_or(0);
        if !voice.rest(playback.pacing.interval(available, format.byte_rate())) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{PcmFormat, SampleFormat};
    use crate::headless::HeadlessOutput;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Finished {
        ids: Mutex<Vec<VoiceId>>,
    }

    impl VoiceOwner for Finished {
        fn voice_finished(&self, id: VoiceId) {
            self.ids.lock().push(id);
        }
    }

    fn playback(output: Arc<HeadlessOutput>, owner: &Arc<Finished>, bytes: usize) -> Playback {
        let format = PcmFormat::new(1, 8_000, SampleFormat::I16).unwrap();
        let owner: Arc<dyn VoiceOwner> = owner.clone();
        Playback {
            pcm: Arc::new(PcmData::new(format, vec![7u8; bytes])),
            loop_points: LoopPoints::none(),
            loops: 0,
            output,
            owner: Arc::downgrade(&owner),
            pacing: Pacing::new(Duration::from_micros(100), Duration::from_millis(2)),
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !done() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wait_after_stop_sees_released_line() {
        let output = Arc::new(HeadlessOutput::realtime());
        let owner = Arc::new(Finished::default());
        let voice = Arc::new(Voice::new(0.0));
        spawn(Arc::clone(&voice), playback(Arc::clone(&output), &owner, 32_000)).unwrap();
        wait_for(|| voice.state() == VoiceState::Playing);

        voice.stop();
        assert!(voice.wait_stopped(WAIT));
        assert_eq!(*owner.ids.lock(), vec![voice.id()]);
        assert!(output.lines()[0].closed);
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let output = Arc::new(HeadlessOutput::realtime());
        let owner = Arc::new(Finished::default());
        let voice = Arc::new(Voice::new(0.0));
        spawn(Arc::clone(&voice), playback(output, &owner, 32_000)).unwrap();

        assert!(!voice.wait_stopped(Duration::from_millis(20)));
        voice.stop();
        assert!(voice.wait_stopped(WAIT));
    }

    #[test]
    fn test_pause_while_starting_keeps_line_halted() {
        let output = Arc::new(HeadlessOutput::new(256));
        let owner = Arc::new(Finished::default());
        let voice = Arc::new(Voice::new(0.0));
        voice.pause();
        spawn(Arc::clone(&voice), playback(Arc::clone(&output), &owner, 1_000)).unwrap();
        wait_for(|| voice.state() == VoiceState::Playing);

        let line = &output.lines()[0];
        assert_eq!(line.starts, 0);
        assert!(line.written.is_empty());
        assert!(voice.is_paused());

        voice.resume();
        assert!(voice.wait_stopped(WAIT));
        let line = &output.lines()[0];
        assert_eq!(line.starts, 1);
        assert_eq!(line.written.len(), 1_000);
    }

    #[test]
    fn test_nan_volume_ignored() {
        let voice = Voice::new(-6.0);
        voice.set_volume(f64::NAN);
        assert_eq!(voice.volume(), -6.0);
        voice.set_volume(-9.0);
        assert_eq!(voice.volume(), -9.0);
    }
}
