//! Impulse-response synthesis for the reverb buses.
//!
//! Kernels are uniform noise shaped by a quadratic decay `(1 - i/len)^2`, which
//! approximates a diffuse room tail without designing a filter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EngineError, Result};

/// Longest kernel the synthesizer will build.
pub const MAX_DECAY_SECONDS: f64 = 60.0;

/// A multi-channel impulse response at a fixed sample rate.
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    sample_rate: f64,
    channels: Vec<Vec<f64>>,
}

impl ImpulseResponse {
    /// Wrap existing kernel data. Every channel must have the same, non-zero length.
    pub fn from_channels(sample_rate: f64, channels: Vec<Vec<f64>>) -> Result<Self> {
        let len = channels.first().map(Vec::len).unwrap_or(0);
        if len == 0 || channels.iter().any(|c| c.len() != len) {
            return Err(EngineError::contract(
                "impulse_response",
                "channels must be non-empty and of equal length",
            ));
        }
        Ok(ImpulseResponse {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length in samples (per channel).
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> &[f64] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }
}

/// Generates decaying-noise reverb kernels.
///
/// Each call draws fresh noise, so two kernels with the same parameters differ.
#[derive(Debug, Clone)]
pub struct ImpulseResponseSynthesizer {
    rng: StdRng,
}

impl Default for ImpulseResponseSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImpulseResponseSynthesizer {
    /// Seeded from the operating system.
    pub fn new() -> Self {
        ImpulseResponseSynthesizer {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible sequence of kernels, for tests and offline renders.
    pub fn seeded(seed: u64) -> Self {
        ImpulseResponseSynthesizer {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn synthesize(
        &mut self,
        decay_seconds: f64,
        sample_rate: f64,
        channel_count: usize,
    ) -> Result<ImpulseResponse> {
        if !decay_seconds.is_finite() || decay_seconds <= 0.0 {
            return Err(EngineError::contract(
                "reverb_decay_seconds",
                format!("decay must be a positive number of seconds, got {decay_seconds}"),
            ));
        }
        if decay_seconds > MAX_DECAY_SECONDS {
            return Err(EngineError::contract(
                "reverb_decay_seconds",
                format!("{decay_seconds}s exceeds the {MAX_DECAY_SECONDS}s kernel limit"),
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(EngineError::contract(
                "sample_rate",
                format!("sample rate must be positive, got {sample_rate}"),
            ));
        }
        if channel_count == 0 {
            return Err(EngineError::contract("channel_count", "at least one channel is required"));
        }

        let length = (decay_seconds * sample_rate).round() as usize;
        if length == 0 {
            return Err(EngineError::contract(
                "reverb_decay_seconds",
                format!("{decay_seconds}s is shorter than one sample at {sample_rate} Hz"),
            ));
        }

        let channels = (0..channel_count)
            .map(|_| {
                (0..length)
                    .map(|i| {
                        let env = 1.0 - i as f64 / length as f64;
                        self.rng.random_range(-1.0..=1.0) * env * env
                    })
                    .collect()
            })
            .collect();

        Ok(ImpulseResponse {
            sample_rate,
            channels,
        })
    }
}
