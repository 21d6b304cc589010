//! Layer scheduler: turns one layer of a composition into voices on a reverb bus.
//!
//! Each `schedule_layer` pass synthesizes a fresh reverb kernel for the layer,
//! builds one voice per pitch of every event, wires multi-pitch events through
//! a chord stage, and attaches the finished bus to the master. The returned
//! [`LayerHandle`] keeps the layer alive; dropping it removes the layer from
//! the render graph.

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{BLOCK_SIZE, GraphCommand, LayerId, MasterBus};
use super::envelope::EnvelopeTiming;
use super::impulse::ImpulseResponseSynthesizer;
use super::reverb::ReverbBus;
use super::voice::{ChordStage, ToneVoice, VoiceHandle, VoiceId};
use crate::descriptor::LayerSpec;
use crate::error::Result;

/// Per-layer defaults for values a descriptor may leave out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPreset {
    pub reverb_decay_seconds: f64,
    pub peak_gain: f64,
    pub stop_padding_seconds: f64,
}

impl LayerPreset {
    /// Defaults for a named layer. Unknown names get a medium room.
    pub fn for_layer(name: &str) -> Self {
        match name {
            "chords" => LayerPreset {
                reverb_decay_seconds: 3.0,
                peak_gain: 0.18,
                stop_padding_seconds: 0.1,
            },
            "plucks" => LayerPreset {
                reverb_decay_seconds: 1.8,
                peak_gain: 0.12,
                stop_padding_seconds: 0.05,
            },
            "bass" => LayerPreset {
                reverb_decay_seconds: 1.2,
                peak_gain: 0.12,
                stop_padding_seconds: 0.1,
            },
            _ => LayerPreset::default(),
        }
    }
}

impl Default for LayerPreset {
    fn default() -> Self {
        LayerPreset {
            reverb_decay_seconds: 2.5,
            peak_gain: 0.12,
            stop_padding_seconds: 0.1,
        }
    }
}

/// Gain of the intermediate stage a multi-pitch event feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "gain")]
pub enum ChordGain {
    /// `1 / k` for a k-pitch chord: a chord reaches the reverb at the same
    /// summed peak as a single note.
    #[default]
    Balanced,
    /// The same attenuation for every chord regardless of size.
    Fixed(f64),
}

impl ChordGain {
    pub fn for_pitches(&self, count: usize) -> f64 {
        match *self {
            ChordGain::Balanced => 1.0 / count.max(1) as f64,
            ChordGain::Fixed(gain) => gain,
        }
    }
}

/// Control-side record of one chord stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordStageInfo {
    pub gain: f64,
    pub voices: Vec<VoiceId>,
}

/// A scheduled layer. Dropping it hard-disconnects the layer's bus and voices.
#[must_use = "dropping a LayerHandle removes the layer from the audio graph"]
#[derive(Debug)]
pub struct LayerHandle {
    id: LayerId,
    name: String,
    reverb_decay_seconds: f64,
    voices: Vec<VoiceHandle>,
    chord_stages: Vec<ChordStageInfo>,
    detach: Sender<GraphCommand>,
}

impl LayerHandle {
    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reverb_decay_seconds(&self) -> f64 {
        self.reverb_decay_seconds
    }

    pub fn voices(&self) -> &[VoiceHandle] {
        &self.voices
    }

    pub fn chord_stages(&self) -> &[ChordStageInfo] {
        &self.chord_stages
    }

    /// Voices whose stop time has not passed at `now`.
    pub fn active_voice_count(&self, now: f64) -> usize {
        self.voices.iter().filter(|v| v.is_active_at(now)).count()
    }
}

impl Drop for LayerHandle {
    fn drop(&mut self) {
        if self.detach.send(GraphCommand::DetachLayer(self.id)).is_ok() {
            debug!(layer = %self.name, "layer detached");
        }
    }
}

/// Builds layers for one master bus.
pub struct LayerScheduler {
    chord_gain: ChordGain,
    normalize_reverb: bool,
    synthesizer: ImpulseResponseSynthesizer,
}

impl LayerScheduler {
    pub fn new(
        chord_gain: ChordGain,
        normalize_reverb: bool,
        synthesizer: ImpulseResponseSynthesizer,
    ) -> Self {
        LayerScheduler {
            chord_gain,
            normalize_reverb,
            synthesizer,
        }
    }

    /// Schedule every event of `spec` relative to `playback_start` (seconds
    /// on the master clock) and attach the layer to `master`.
    ///
    /// Fails without touching the graph if the layer breaks the contract.
    pub fn schedule_layer(
        &mut self,
        name: &str,
        spec: &LayerSpec,
        playback_start: f64,
        master: &MasterBus,
    ) -> Result<LayerHandle> {
        spec.validate(&format!("layers.{name}"))?;
        let preset = LayerPreset::for_layer(name);
        let decay = spec.reverb_decay_seconds.unwrap_or(preset.reverb_decay_seconds);
        let layer_gain = spec.peak_gain.unwrap_or(preset.peak_gain);
        let stop_padding = spec.stop_padding_seconds.unwrap_or(preset.stop_padding_seconds);
        let sample_rate = master.sample_rate();

        let mut bus = ReverbBus::new(
            decay,
            sample_rate,
            BLOCK_SIZE,
            self.normalize_reverb,
            &mut self.synthesizer,
        )?;

        let mut voices = Vec::new();
        let mut chord_stages = Vec::new();
        for event in &spec.events {
            let timing = EnvelopeTiming {
                start_time: playback_start + event.start_offset_seconds,
                attack: spec.attack_seconds,
                sustain: event.duration_seconds,
                release: spec.release_seconds,
                peak_gain: event.peak_gain.unwrap_or(layer_gain),
                stop_padding,
            };

            if event.is_chord() {
                let mut stage = ChordStage::new(self.chord_gain.for_pitches(event.pitches.len()));
                let mut ids = Vec::with_capacity(event.pitches.len());
                for &hz in &event.pitches {
                    let id = master.next_voice_id();
                    voices.push(ToneVoice::schedule(
                        id,
                        spec.waveform,
                        hz,
                        timing,
                        sample_rate,
                        &mut stage,
                    ));
                    ids.push(id);
                }
                chord_stages.push(ChordStageInfo {
                    gain: stage.gain(),
                    voices: ids,
                });
                bus.connect_chord(stage);
            } else {
                for &hz in &event.pitches {
                    voices.push(ToneVoice::schedule(
                        master.next_voice_id(),
                        spec.waveform,
                        hz,
                        timing,
                        sample_rate,
                        &mut bus,
                    ));
                }
            }
        }

        debug!(
            layer = name,
            voices = voices.len(),
            chords = chord_stages.len(),
            decay,
            "layer scheduled"
        );

        let id = master.attach_layer(name, bus);
        Ok(LayerHandle {
            id,
            name: name.to_string(),
            reverb_decay_seconds: decay,
            voices,
            chord_stages,
            detach: master.command_sender(),
        })
    }
}
