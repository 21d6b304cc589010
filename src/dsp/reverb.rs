//! Reverb bus: a convolution reverb that one layer's voices feed.
//!
//! Each layer gets its own bus because decay time differs per layer. The bus
//! sums its inputs to mono, convolves with a freshly synthesized stereo
//! kernel, and hands the wet stereo signal to the master.

use super::convolver::Convolver;
use super::impulse::ImpulseResponseSynthesizer;
use super::voice::{ChordStage, ToneVoice, VoiceSink};
use crate::error::Result;

/// Kernel channels; voices are mono, the tail is stereo.
pub const REVERB_CHANNELS: usize = 2;

/// Something connected into a bus input.
#[derive(Debug, Clone)]
pub enum BusInput {
    /// A single-pitch event's voice, connected directly.
    Voice(ToneVoice),
    /// A multi-pitch event's gain stage.
    Chord(ChordStage),
}

impl BusInput {
    fn render_into(&mut self, block_start: u64, out: &mut [f64]) {
        match self {
            BusInput::Voice(v) => v.render_into(block_start, out, 1.0),
            BusInput::Chord(stage) => stage.render_into(block_start, out),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            BusInput::Voice(v) => v.is_finished(),
            BusInput::Chord(stage) => stage.is_finished(),
        }
    }

    fn voice_count(&self) -> usize {
        match self {
            BusInput::Voice(_) => 1,
            BusInput::Chord(stage) => stage.voice_count(),
        }
    }
}

pub struct ReverbBus {
    decay_seconds: f64,
    convolver: Convolver,
    inputs: Vec<BusInput>,
    /// Mono sum of the inputs for the current block.
    dry: Vec<f64>,
}

impl ReverbBus {
    /// Synthesize a stereo kernel of `decay_seconds` and wrap it in a convolver
    /// running `block_size` frames at a time.
    pub fn new(
        decay_seconds: f64,
        sample_rate: f64,
        block_size: usize,
        normalize: bool,
        synthesizer: &mut ImpulseResponseSynthesizer,
    ) -> Result<Self> {
        let ir = synthesizer.synthesize(decay_seconds, sample_rate, REVERB_CHANNELS)?;
        Ok(ReverbBus {
            decay_seconds,
            convolver: Convolver::new(&ir, block_size, normalize),
            inputs: Vec::new(),
            dry: vec![0.0; block_size],
        })
    }

    pub fn decay_seconds(&self) -> f64 {
        self.decay_seconds
    }

    /// Connect a chord stage (with its voices already attached).
    pub fn connect_chord(&mut self, stage: ChordStage) {
        self.inputs.push(BusInput::Chord(stage));
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Voices still connected (directly or through a chord stage).
    pub fn voice_count(&self) -> usize {
        self.inputs.iter().map(BusInput::voice_count).sum()
    }

    /// Render one block: mix the inputs, convolve, and add into `left`/`right`.
    pub fn render_block(&mut self, block_start: u64, left: &mut [f64], right: &mut [f64]) {
        self.dry.fill(0.0);
        for input in &mut self.inputs {
            input.render_into(block_start, &mut self.dry);
        }
        self.inputs.retain(|i| !i.is_finished());
        self.convolver.process_block(&self.dry, &mut [left, right]);
    }

    /// Hard disconnect: drop every input and the buffered tail.
    pub fn disconnect_all(&mut self) {
        self.inputs.clear();
        self.convolver.reset();
    }
}

impl VoiceSink for ReverbBus {
    fn connect_voice(&mut self, voice: ToneVoice) {
        self.inputs.push(BusInput::Voice(voice));
    }
}
