//! Band-limited oscillators (PolyBLEP) for tone voices.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Oscillator shapes a layer can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    #[serde(alias = "saw")]
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Name as it appears in a composition descriptor.
    pub fn name(&self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }
}

/// A free-running oscillator at a fixed frequency.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    frequency: f64,
    phase: f64,
    phase_inc: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency,
            phase: 0.0,
            phase_inc: frequency / sample_rate,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        let inc = self.phase_inc;
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Sawtooth => self.sawtooth(inc),
            Waveform::Square => self.square(inc),
            Waveform::Triangle => self.triangle(),
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        sample
    }

    /// Naive ramp from -1 to +1 with the wrap smoothed by PolyBLEP.
    fn sawtooth(&self, inc: f64) -> f64 {
        let naive = 2.0 * self.phase - 1.0;
        naive - poly_blep(self.phase, inc)
    }

    /// Square built from two PolyBLEP-corrected edges.
    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }

    /// Piecewise linear: -1 → +1 over the first half cycle, back over the second.
    fn triangle(&self) -> f64 {
        if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        }
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}
