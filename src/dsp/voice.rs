//! Voice: one oscillator shaped by a gain envelope, sounding one pitch once.

use super::envelope::{EnvelopeTiming, GainAutomation};
use super::oscillator::{Oscillator, Waveform};

/// Unique id of a scheduled voice within one master bus.
pub type VoiceId = u64;

/// Anything a voice can be connected into: a reverb bus or a chord stage.
pub trait VoiceSink {
    fn connect_voice(&mut self, voice: ToneVoice);

    /// Gain the sink applies before the signal reaches the reverb.
    fn route_gain(&self) -> f64 {
        1.0
    }
}

/// A single scheduled tone. Immutable after creation; dropped by the render
/// graph once its stop frame has passed.
#[derive(Debug, Clone)]
pub struct ToneVoice {
    id: VoiceId,
    oscillator: Oscillator,
    envelope: GainAutomation,
    sample_rate: f64,
    start_frame: u64,
    stop_frame: u64,
    finished: bool,
}

/// Control-side record of a scheduled voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceHandle {
    pub id: VoiceId,
    pub waveform: Waveform,
    pub frequency: f64,
    pub timing: EnvelopeTiming,
    pub envelope: GainAutomation,
    /// Gain of the stage between the voice and the reverb input.
    pub route_gain: f64,
}

impl VoiceHandle {
    pub fn start_time(&self) -> f64 {
        self.timing.start_time
    }

    pub fn stop_time(&self) -> f64 {
        self.timing.stop_time()
    }

    /// Peak gain as it arrives at the reverb input.
    pub fn routed_peak_gain(&self) -> f64 {
        self.timing.peak_gain * self.route_gain
    }

    /// Still sounding (or waiting to start) at `now`.
    pub fn is_active_at(&self, now: f64) -> bool {
        now < self.stop_time()
    }
}

/// Frame positions within this distance of an integer snap to it.
const FRAME_TOLERANCE: f64 = 1e-6;

/// First frame at or after `time`.
pub(crate) fn frame_at_or_after(time: f64, sample_rate: f64) -> u64 {
    (time * sample_rate - FRAME_TOLERANCE).ceil().max(0.0) as u64
}

impl ToneVoice {
    /// Build a voice and connect it into `sink`.
    pub fn schedule(
        id: VoiceId,
        waveform: Waveform,
        frequency: f64,
        timing: EnvelopeTiming,
        sample_rate: f64,
        sink: &mut impl VoiceSink,
    ) -> VoiceHandle {
        let envelope = timing.automation();
        let voice = ToneVoice {
            id,
            oscillator: Oscillator::new(waveform, frequency, sample_rate),
            envelope: envelope.clone(),
            sample_rate,
            start_frame: frame_at_or_after(timing.start_time, sample_rate),
            stop_frame: frame_at_or_after(timing.stop_time(), sample_rate),
            finished: false,
        };
        let handle = VoiceHandle {
            id,
            waveform,
            frequency,
            timing,
            envelope,
            route_gain: sink.route_gain(),
        };
        sink.connect_voice(voice);
        handle
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn stop_frame(&self) -> u64 {
        self.stop_frame
    }

    /// Has the stop frame passed?
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Add this voice's output for frames `block_start..block_start + out.len()`
    /// into `out`, scaled by `gain`.
    pub fn render_into(&mut self, block_start: u64, out: &mut [f64], gain: f64) {
        if self.finished {
            return;
        }
        let block_end = block_start + out.len() as u64;
        if block_end <= self.start_frame {
            return;
        }

        let from = self.start_frame.saturating_sub(block_start) as usize;
        let to = self.stop_frame.min(block_end).saturating_sub(block_start) as usize;
        for (i, sample) in out.iter_mut().enumerate().take(to).skip(from) {
            let frame = block_start + i as u64;
            let t = frame as f64 / self.sample_rate;
            *sample += self.oscillator.next_sample() * self.envelope.value_at(t) * gain;
        }

        if self.stop_frame <= block_end {
            self.finished = true;
        }
    }
}

/// Per-event gain stage for multi-pitch events. Its voices are summed,
/// scaled by `gain`, and fed into the layer's reverb bus.
#[derive(Debug, Clone)]
pub struct ChordStage {
    gain: f64,
    voices: Vec<ToneVoice>,
}

impl ChordStage {
    pub fn new(gain: f64) -> Self {
        ChordStage {
            gain,
            voices: Vec::new(),
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn is_finished(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn render_into(&mut self, block_start: u64, out: &mut [f64]) {
        for voice in &mut self.voices {
            voice.render_into(block_start, out, self.gain);
        }
        self.voices.retain(|v| !v.is_finished());
    }
}

impl VoiceSink for ChordStage {
    fn connect_voice(&mut self, voice: ToneVoice) {
        self.voices.push(voice);
    }

    fn route_gain(&self) -> f64 {
        self.gain
    }
}
