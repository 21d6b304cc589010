//! Composition player: transport state machine over the audio graph.
//!
//! `Idle → Loading → Ready → Playing → (Paused | Stopped)`
//!
//! The player lives on the control thread. It validates descriptors, asks the
//! layer scheduler for one [`LayerHandle`] per layer when playback starts, and
//! drives the master gain. It never touches rendering directly: everything it
//! does reaches the [`GraphRenderer`] as graph commands.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::descriptor::CompositionDescriptor;
use crate::dsp::engine::{GraphRenderer, MasterBus, audio_graph};
use crate::dsp::impulse::{ImpulseResponseSynthesizer, MAX_DECAY_SECONDS};
use crate::dsp::mixer::clamp_gain;
use crate::dsp::scheduler::{ChordGain, LayerHandle, LayerPreset, LayerScheduler};
use crate::dsp::voice::VoiceHandle;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
}

impl PlayerStatus {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerStatus::Idle => "Idle",
            PlayerStatus::Loading => "Loading",
            PlayerStatus::Ready => "Ready",
            PlayerStatus::Playing => "Playing",
            PlayerStatus::Paused => "Paused",
            PlayerStatus::Stopped => "Stopped",
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlayerStatus::Loading,
            2 => PlayerStatus::Ready,
            3 => PlayerStatus::Playing,
            4 => PlayerStatus::Paused,
            5 => PlayerStatus::Stopped,
            _ => PlayerStatus::Idle,
        }
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only view of the player status, safe to hand to other threads.
#[derive(Debug, Clone)]
pub struct StatusSignal(Arc<AtomicU8>);

impl StatusSignal {
    fn new(status: PlayerStatus) -> Self {
        StatusSignal(Arc::new(AtomicU8::new(status.to_u8())))
    }

    pub fn get(&self) -> PlayerStatus {
        PlayerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: PlayerStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }
}

/// Configuration for a [`CompositionPlayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerConfig {
    /// Render sample rate in Hz. Replaced by the device rate when playing
    /// through a device.
    pub sample_rate: f64,
    /// Delay between `play()` and the first scheduled frame.
    pub lookahead_seconds: f64,
    pub chord_gain: ChordGain,
    /// Scale reverb kernels the way a WebAudio convolver does.
    pub normalize_reverb: bool,
    /// Layers a descriptor must contain, on top of "at least one".
    pub required_layers: Vec<String>,
    /// Master volume before any `set_volume` call.
    pub initial_volume: f64,
    /// Seed for reverb kernel noise. `None` draws from the OS.
    pub reverb_seed: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            sample_rate: 44100.0,
            lookahead_seconds: 0.05,
            chord_gain: ChordGain::Balanced,
            normalize_reverb: true,
            required_layers: Vec::new(),
            initial_volume: 0.8,
            reverb_seed: None,
        }
    }
}

/// Highest sample rate a player accepts.
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        let rate = self.sample_rate;
        if !rate.is_finite() || rate <= 0.0 || rate > MAX_SAMPLE_RATE {
            return Err(EngineError::contract(
                "sampleRate",
                format!("sample rate must be in (0, {MAX_SAMPLE_RATE}] Hz, got {rate}"),
            ));
        }
        let lookahead = self.lookahead_seconds;
        if !lookahead.is_finite() || lookahead < 0.0 {
            return Err(EngineError::contract(
                "lookaheadSeconds",
                format!("lookahead must be a non-negative number of seconds, got {lookahead}"),
            ));
        }
        Ok(())
    }
}

/// What a successful `play()` started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStart {
    /// Engine-clock time that event offsets are relative to.
    pub start_time: f64,
    pub layer_count: usize,
    pub voice_count: usize,
}

pub struct CompositionPlayer {
    config: PlayerConfig,
    master: MasterBus,
    scheduler: LayerScheduler,
    status: StatusSignal,
    descriptor: Option<CompositionDescriptor>,
    layers: Vec<LayerHandle>,
    volume: f64,
    playback: Option<PlaybackStart>,
    #[cfg(feature = "device")]
    output: Option<crate::dsp::output::DeviceOutput>,
}

impl CompositionPlayer {
    /// Build a player and the renderer that must be pulled for time to pass.
    pub fn new(config: PlayerConfig) -> Result<(Self, GraphRenderer)> {
        config.validate()?;
        let volume = clamp_gain(config.initial_volume);
        let (master, renderer) = audio_graph(config.sample_rate, volume);
        let synthesizer = match config.reverb_seed {
            Some(seed) => ImpulseResponseSynthesizer::seeded(seed),
            None => ImpulseResponseSynthesizer::new(),
        };
        let scheduler = LayerScheduler::new(config.chord_gain, config.normalize_reverb, synthesizer);

        let player = CompositionPlayer {
            config,
            master,
            scheduler,
            status: StatusSignal::new(PlayerStatus::Idle),
            descriptor: None,
            layers: Vec::new(),
            volume,
            playback: None,
            #[cfg(feature = "device")]
            output: None,
        };
        Ok((player, renderer))
    }

    /// Open the default output device and play through it.
    #[cfg(feature = "device")]
    pub fn with_default_device(config: PlayerConfig) -> Result<Self> {
        let device = crate::dsp::output::OutputDevice::open_default()?;
        let config = PlayerConfig {
            sample_rate: device.sample_rate() as f64,
            ..config
        };
        let (mut player, renderer) = Self::new(config)?;
        player.output = Some(device.start(renderer)?);
        Ok(player)
    }

    /// The running device stream, when playing through a device.
    #[cfg(feature = "device")]
    pub fn device_output(&self) -> Option<&crate::dsp::output::DeviceOutput> {
        self.output.as_ref()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.get()
    }

    pub fn status_signal(&self) -> StatusSignal {
        self.status.clone()
    }

    pub fn descriptor(&self) -> Option<&CompositionDescriptor> {
        self.descriptor.as_ref()
    }

    fn set_status(&self, status: PlayerStatus) {
        let prior = self.status.get();
        if prior != status {
            debug!(from = %prior, to = %status, "player status");
        }
        self.status.set(status);
    }

    /// Validate and store a descriptor. Valid from any state; a successful
    /// load tears down whatever was playing.
    pub fn load(&mut self, descriptor: CompositionDescriptor) -> Result<()> {
        let prior = self.status();
        self.set_status(PlayerStatus::Loading);

        if let Err(err) = self.check(&descriptor) {
            warn!(%err, "composition rejected");
            self.set_status(prior);
            return Err(err);
        }

        self.layers.clear();
        self.playback = None;
        self.master.reclaim_detached();
        self.master.set_gain(self.volume);
        info!(
            layers = descriptor.layers.len(),
            voices = descriptor.voice_count(),
            "composition loaded"
        );
        self.descriptor = Some(descriptor);
        self.set_status(PlayerStatus::Ready);
        Ok(())
    }

    fn check(&self, descriptor: &CompositionDescriptor) -> Result<()> {
        descriptor.validate(&self.config.required_layers)?;
        let sample_rate = self.master.sample_rate();
        for (name, layer) in &descriptor.layers {
            let decay = layer
                .reverb_decay_seconds
                .unwrap_or(LayerPreset::for_layer(name).reverb_decay_seconds);
            if (decay * sample_rate).round() < 1.0 {
                return Err(EngineError::contract(
                    format!("layers.{name}.reverbDecaySeconds"),
                    format!("{decay}s is shorter than one sample at {sample_rate} Hz"),
                ));
            }
            if decay > MAX_DECAY_SECONDS {
                return Err(EngineError::contract(
                    format!("layers.{name}.reverbDecaySeconds"),
                    format!("{decay}s exceeds the {MAX_DECAY_SECONDS}s kernel limit"),
                ));
            }
        }
        Ok(())
    }

    /// Start playback. From `Ready` this schedules every layer at
    /// `now + lookahead`; from `Paused` it unmutes without rescheduling.
    pub fn play(&mut self, start_volume: Option<f64>) -> Result<PlaybackStart> {
        match self.status() {
            PlayerStatus::Ready => {}
            PlayerStatus::Paused => {
                if let Some(v) = start_volume {
                    self.volume = clamp_gain(v);
                }
                self.master.set_gain(self.volume);
                self.set_status(PlayerStatus::Playing);
                info!("playback resumed");
                return self.playback.ok_or(EngineError::InvalidState {
                    operation: "play",
                    state: PlayerStatus::Paused,
                });
            }
            state => {
                return Err(EngineError::InvalidState {
                    operation: "play",
                    state,
                });
            }
        }

        let Some(descriptor) = &self.descriptor else {
            return Err(EngineError::InvalidState {
                operation: "play",
                state: PlayerStatus::Ready,
            });
        };

        self.master.reclaim_detached();
        let start_time = self.master.now() + self.config.lookahead_seconds;
        let mut layers = Vec::with_capacity(descriptor.layers.len());
        for (name, spec) in &descriptor.layers {
            layers.push(
                self.scheduler
                    .schedule_layer(name, spec, start_time, &self.master)?,
            );
        }

        if let Some(v) = start_volume {
            self.volume = clamp_gain(v);
        }
        self.master.set_gain(self.volume);

        let playback = PlaybackStart {
            start_time,
            layer_count: layers.len(),
            voice_count: layers.iter().map(|l| l.voices().len()).sum(),
        };
        self.layers = layers;
        self.playback = Some(playback);
        self.set_status(PlayerStatus::Playing);
        info!(
            start_time,
            layers = playback.layer_count,
            voices = playback.voice_count,
            "playback started"
        );
        Ok(playback)
    }

    /// Mute the master and keep the timeline running.
    pub fn pause(&mut self) -> Result<()> {
        match self.status() {
            PlayerStatus::Playing => {
                self.master.set_gain(0.0);
                self.set_status(PlayerStatus::Paused);
                info!("playback paused");
                Ok(())
            }
            PlayerStatus::Paused => Ok(()),
            state => Err(EngineError::InvalidState {
                operation: "pause",
                state,
            }),
        }
    }

    /// Set the master volume, clamped to [0, 1]. While paused only the
    /// remembered volume changes.
    pub fn set_volume(&mut self, volume: f64) {
        self.volume = clamp_gain(volume);
        if self.status() != PlayerStatus::Paused {
            self.master.set_gain(self.volume);
        }
    }

    /// Hard-stop everything and forget the descriptor. Idempotent.
    pub fn stop(&mut self) {
        let dropped = self.layers.len();
        self.layers.clear();
        self.master.reclaim_detached();
        self.descriptor = None;
        self.playback = None;
        if self.status() != PlayerStatus::Stopped {
            info!(layers = dropped, "playback stopped");
        }
        self.set_status(PlayerStatus::Stopped);
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Gain the master is (or will be, at the next block) running at.
    pub fn master_gain(&self) -> f64 {
        self.master.gain()
    }

    pub fn playback_start_time(&self) -> Option<f64> {
        self.playback.map(|p| p.start_time)
    }

    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }

    pub fn scheduled_voices(&self) -> impl Iterator<Item = &VoiceHandle> {
        self.layers.iter().flat_map(|l| l.voices())
    }

    /// Voices whose stop time has not passed on the engine clock.
    pub fn active_voice_count(&self) -> usize {
        let now = self.now();
        self.layers.iter().map(|l| l.active_voice_count(now)).sum()
    }

    pub fn now(&self) -> f64 {
        self.master.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LayerSpec, SoundEvent};
    use crate::dsp::oscillator::Waveform;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    const SR: f64 = 8000.0;

    fn config() -> PlayerConfig {
        PlayerConfig {
            sample_rate: SR,
            reverb_seed: Some(1),
            ..PlayerConfig::default()
        }
    }

    fn layer(waveform: Waveform, decay: f64, events: Vec<SoundEvent>) -> LayerSpec {
        LayerSpec {
            waveform,
            attack_seconds: 0.05,
            release_seconds: 0.3,
            reverb_decay_seconds: Some(decay),
            peak_gain: None,
            stop_padding_seconds: None,
            events,
        }
    }

    fn note(start: f64, duration: f64, pitches: &[f64]) -> SoundEvent {
        SoundEvent {
            start_offset_seconds: start,
            duration_seconds: duration,
            pitches: pitches.to_vec(),
            peak_gain: None,
        }
    }

    fn bass_only() -> CompositionDescriptor {
        let mut layers = BTreeMap::new();
        layers.insert(
            "bass".to_string(),
            layer(Waveform::Sine, 0.3, vec![note(0.0, 1.0, &[55.0])]),
        );
        CompositionDescriptor {
            tempo_bpm: 80.0,
            layers,
        }
    }

    fn full() -> CompositionDescriptor {
        let mut d = bass_only();
        d.layers.insert(
            "chords".to_string(),
            layer(
                Waveform::Triangle,
                0.4,
                vec![note(0.0, 0.5, &[220.0, 277.18, 329.63]), note(0.5, 0.5, &[196.0, 246.94])],
            ),
        );
        d.layers.insert(
            "plucks".to_string(),
            layer(Waveform::Square, 0.2, vec![note(0.25, 0.1, &[659.25]), note(0.1, 0.1, &[880.0])]),
        );
        d
    }

    fn pull(renderer: &mut GraphRenderer, frames: usize) -> Vec<f32> {
        let mut l = vec![0.0; frames];
        let mut r = vec![0.0; frames];
        renderer.render(&mut l, &mut r);
        l
    }

    #[test]
    fn play_from_idle_is_rejected() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        let err = player.play(None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                operation: "play",
                state: PlayerStatus::Idle
            }
        ));
        assert_eq!(player.status(), PlayerStatus::Idle);
        assert_eq!(player.scheduled_voices().count(), 0);
        assert_eq!(player.active_voice_count(), 0);
    }

    #[test]
    fn load_then_play_schedules_every_layer() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(full()).unwrap();
        assert_eq!(player.status(), PlayerStatus::Ready);
        assert_eq!(player.scheduled_voices().count(), 0);

        let start = player.play(None).unwrap();
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert_abs_diff_eq!(start.start_time, 0.05, epsilon = 1e-12);
        assert_eq!(start.layer_count, 3);
        assert_eq!(start.voice_count, 1 + 5 + 2);
        assert_eq!(player.scheduled_voices().count(), 8);
        assert_eq!(player.active_voice_count(), 8);
        assert_eq!(player.playback_start_time(), Some(start.start_time));

        let names: Vec<&str> = player.layers().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["bass", "chords", "plucks"]);
    }

    #[test]
    fn bass_scenario() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(bass_only()).unwrap();
        let start = player.play(None).unwrap();

        let voices: Vec<&VoiceHandle> = player.scheduled_voices().collect();
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].frequency, 55.0);
        assert_abs_diff_eq!(voices[0].start_time(), start.start_time, epsilon = 1e-12);
        assert_abs_diff_eq!(
            voices[0].stop_time(),
            start.start_time + 1.0 + 0.3 + 0.1,
            epsilon = 1e-9
        );
    }

    #[test]
    fn second_play_is_rejected() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(bass_only()).unwrap();
        player.play(None).unwrap();
        let err = player.play(None).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(player.scheduled_voices().count(), 1);
        assert_eq!(player.status(), PlayerStatus::Playing);
    }

    #[test]
    fn invalid_descriptor_restores_prior_state() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        let mut bad = bass_only();
        bad.layers.get_mut("bass").unwrap().events[0].pitches = vec![0.0];
        let err = player.load(bad).unwrap_err();
        assert_eq!(err.error_code(), "CONTRACT_VIOLATION");
        assert_eq!(player.status(), PlayerStatus::Idle);
        assert!(player.descriptor().is_none());

        player.load(bass_only()).unwrap();
        player.play(None).unwrap();
        let mut bad = bass_only();
        bad.layers.clear();
        assert!(player.load(bad).is_err());
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert_eq!(player.scheduled_voices().count(), 1);
    }

    #[test]
    fn decay_shorter_than_a_sample_is_rejected_at_load() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        let mut d = bass_only();
        d.layers.get_mut("bass").unwrap().reverb_decay_seconds = Some(1e-6);
        assert!(player.load(d).is_err());
    }

    #[test]
    fn decay_beyond_kernel_limit_is_rejected_at_load() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        let mut d = bass_only();
        d.layers.get_mut("bass").unwrap().reverb_decay_seconds = Some(1e15);
        let err = player.load(d).unwrap_err();
        assert_eq!(err.error_code(), "CONTRACT_VIOLATION");
        assert_eq!(player.status(), PlayerStatus::Idle);
        assert_eq!(player.play(None).unwrap_err().error_code(), "INVALID_STATE");
    }

    #[test]
    fn bad_sample_rate_or_lookahead_is_rejected() {
        for sample_rate in [0.0, -44100.0, f64::NAN, f64::INFINITY, 1e9] {
            let err = CompositionPlayer::new(PlayerConfig {
                sample_rate,
                ..config()
            })
            .err()
            .unwrap();
            assert_eq!(err.error_code(), "CONTRACT_VIOLATION", "rate {sample_rate}");
        }
        for lookahead_seconds in [-0.1, f64::NAN] {
            assert!(
                CompositionPlayer::new(PlayerConfig {
                    lookahead_seconds,
                    ..config()
                })
                .is_err()
            );
        }
        assert!(CompositionPlayer::new(PlayerConfig::default()).is_ok());
    }

    #[test]
    fn required_layers_from_config() {
        let (mut player, _renderer) = CompositionPlayer::new(PlayerConfig {
            required_layers: vec!["chords".into(), "bass".into()],
            ..config()
        })
        .unwrap();
        assert!(player.load(bass_only()).is_err());
        assert!(player.load(full()).is_ok());
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut player, mut renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(full()).unwrap();
        player.play(None).unwrap();
        pull(&mut renderer, 1024);

        player.stop();
        let once = (player.status(), player.active_voice_count(), player.layers().len());
        player.stop();
        let twice = (player.status(), player.active_voice_count(), player.layers().len());
        assert_eq!(once, (PlayerStatus::Stopped, 0, 0));
        assert_eq!(once, twice);
        assert!(player.descriptor().is_none());

        pull(&mut renderer, 128);
        assert_eq!(renderer.layer_count(), 0);
        assert_eq!(renderer.clock().live_voices(), 0);

        // Stopped needs a fresh load.
        assert_eq!(player.play(None).unwrap_err().error_code(), "INVALID_STATE");
    }

    #[test]
    fn stop_from_idle_succeeds() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        player.stop();
        assert_eq!(player.status(), PlayerStatus::Stopped);
    }

    #[test]
    fn volume_is_clamped() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        assert_eq!(player.volume(), 0.8);
        player.set_volume(-0.5);
        assert_eq!(player.volume(), 0.0);
        assert_eq!(player.master_gain(), 0.0);
        player.set_volume(2.0);
        assert_eq!(player.volume(), 1.0);
        assert_eq!(player.master_gain(), 1.0);
        player.set_volume(f64::NAN);
        assert_eq!(player.volume(), 0.0);
    }

    #[test]
    fn start_volume_applies_on_play() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(bass_only()).unwrap();
        player.play(Some(0.3)).unwrap();
        assert_eq!(player.volume(), 0.3);
        assert_eq!(player.master_gain(), 0.3);
    }

    #[test]
    fn pause_mutes_and_resume_keeps_schedule() {
        let (mut player, mut renderer) = CompositionPlayer::new(config()).unwrap();
        assert_eq!(player.pause().unwrap_err().error_code(), "INVALID_STATE");

        player.load(bass_only()).unwrap();
        let start = player.play(None).unwrap();
        let ids: Vec<u64> = player.layers().iter().map(|l| l.id()).collect();
        pull(&mut renderer, 1024);

        player.pause().unwrap();
        assert_eq!(player.status(), PlayerStatus::Paused);
        assert_eq!(player.master_gain(), 0.0);
        let out = pull(&mut renderer, 1024);
        assert!(out.iter().all(|&s| s == 0.0));

        player.set_volume(0.5);
        assert_eq!(player.volume(), 0.5);
        assert_eq!(player.master_gain(), 0.0);

        let resumed = player.play(None).unwrap();
        assert_eq!(resumed, start);
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert_eq!(player.master_gain(), 0.5);
        let after: Vec<u64> = player.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, after);
    }

    #[test]
    fn rendered_audio_follows_the_transport() {
        let (mut player, mut renderer) = CompositionPlayer::new(PlayerConfig {
            lookahead_seconds: 0.1,
            ..config()
        })
        .unwrap();
        player.load(bass_only()).unwrap();
        player.set_volume(1.0);
        player.play(None).unwrap();

        let out = pull(&mut renderer, 4000);
        assert!(out[..800].iter().all(|&s| s == 0.0), "sound before playback start");
        assert!(out[1600..4000].iter().any(|s| s.abs() > 0.0), "silent during the note");
        assert_eq!(renderer.clock().live_voices(), 1);

        player.stop();
        // Finish the block in flight; the next one has no layers.
        pull(&mut renderer, 128 - 4000 % 128);
        let out = pull(&mut renderer, 1024);
        assert!(out.iter().all(|&s| s == 0.0), "sound after stop");
    }

    #[test]
    fn reload_tears_down_previous_layers() {
        let (mut player, mut renderer) = CompositionPlayer::new(config()).unwrap();
        player.load(full()).unwrap();
        player.play(None).unwrap();
        pull(&mut renderer, 256);
        assert_eq!(renderer.layer_count(), 3);

        player.load(bass_only()).unwrap();
        assert_eq!(player.status(), PlayerStatus::Ready);
        assert!(player.layers().is_empty());
        pull(&mut renderer, 256);
        assert_eq!(renderer.layer_count(), 0);

        player.play(None).unwrap();
        pull(&mut renderer, 128);
        assert_eq!(renderer.layer_count(), 1);
        // The three buses from the first play came back and were freed.
        assert_eq!(player.master.reclaim_detached(), 0);
    }

    #[test]
    fn status_signal_tracks_player() {
        let (mut player, _renderer) = CompositionPlayer::new(config()).unwrap();
        let signal = player.status_signal();
        assert_eq!(signal.get(), PlayerStatus::Idle);
        player.load(bass_only()).unwrap();
        assert_eq!(signal.get(), PlayerStatus::Ready);

        let remote = signal.clone();
        let seen = std::thread::spawn(move || remote.get()).join().unwrap();
        assert_eq!(seen, PlayerStatus::Ready);

        player.stop();
        assert_eq!(signal.get(), PlayerStatus::Stopped);
    }

    #[test]
    fn active_voices_expire_with_the_clock() {
        let (mut player, mut renderer) = CompositionPlayer::new(config()).unwrap();
        let mut d = bass_only();
        d.layers.get_mut("bass").unwrap().events.push(note(0.0, 0.1, &[82.4]));
        player.load(d).unwrap();
        player.play(None).unwrap();
        assert_eq!(player.active_voice_count(), 2);

        // Short note stops at 0.05 + 0.1 + 0.3 + 0.1 = 0.55s.
        pull(&mut renderer, (0.6 * SR) as usize);
        assert_eq!(player.active_voice_count(), 1);
        pull(&mut renderer, (1.0 * SR) as usize);
        assert_eq!(player.active_voice_count(), 0);
    }

    #[test]
    fn status_display() {
        assert_eq!(PlayerStatus::Paused.to_string(), "Paused");
        for s in [
            PlayerStatus::Idle,
            PlayerStatus::Loading,
            PlayerStatus::Ready,
            PlayerStatus::Playing,
            PlayerStatus::Paused,
            PlayerStatus::Stopped,
        ] {
            assert_eq!(PlayerStatus::from_u8(s.to_u8()), s);
        }
    }

    #[test]
    fn config_defaults_and_serde() {
        let c = PlayerConfig::default();
        assert_eq!(c.lookahead_seconds, 0.05);
        assert_eq!(c.initial_volume, 0.8);
        assert!(c.normalize_reverb);

        let c: PlayerConfig =
            serde_json::from_str(r#"{"sampleRate": 48000, "chordGain": {"mode": "fixed", "gain": 0.12}}"#)
                .unwrap();
        assert_eq!(c.sample_rate, 48000.0);
        assert_eq!(c.chord_gain, ChordGain::Fixed(0.12));
        assert_eq!(c.lookahead_seconds, 0.05);
    }
}
