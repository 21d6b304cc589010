//! Convolver: uniformly partitioned FFT convolution (overlap-save).
//!
//! The kernel is cut into `block_size` partitions, each transformed once at
//! construction. Every input block is transformed once, pushed onto a
//! frequency-domain delay line, and multiplied against all partitions, so the
//! cost per block is linear in the kernel length instead of quadratic.
//!
//! Input is mono. Output channel `c` uses kernel channel `min(c, channels - 1)`,
//! so a stereo kernel turns a mono bus into a decorrelated stereo tail.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::impulse::ImpulseResponse;

/// Loudness calibration of WebAudio's normalized convolver (about -58 dB).
const GAIN_CALIBRATION: f64 = 0.00125;
/// Sample rate the calibration above refers to.
const GAIN_CALIBRATION_SAMPLE_RATE: f64 = 44100.0;
/// Floor for the kernel RMS so a near-silent kernel cannot blow up the scale.
const MIN_POWER: f64 = 0.000125;

/// Scale WebAudio applies to a kernel when `normalize` is enabled.
pub fn normalization_scale(ir: &ImpulseResponse) -> f64 {
    let total: f64 = ir
        .channels()
        .iter()
        .flat_map(|c| c.iter())
        .map(|s| s * s)
        .sum();
    let mut power = (total / (ir.channel_count() * ir.len()) as f64).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    GAIN_CALIBRATION / power * GAIN_CALIBRATION_SAMPLE_RATE / ir.sample_rate()
}

pub struct Convolver {
    block_size: usize,
    fft_size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// Kernel spectra: `[kernel channel][partition][bin]`.
    partitions: Vec<Vec<Vec<Complex<f64>>>>,
    /// Input spectra, newest at `head`.
    history: Vec<Vec<Complex<f64>>>,
    head: usize,
    /// Last two input blocks, time domain.
    window: Vec<f64>,
    accum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    /// Kernel gain folded together with the inverse FFT's 1/N.
    output_scale: f64,
}

impl Convolver {
    /// Prepare a convolver for `ir`, processing `block_size` frames per call.
    pub fn new(ir: &ImpulseResponse, block_size: usize, normalize: bool) -> Self {
        let fft_size = block_size * 2;
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let partition_count = ir.len().div_ceil(block_size);
        let partitions = ir
            .channels()
            .iter()
            .map(|kernel| {
                kernel
                    .chunks(block_size)
                    .map(|chunk| {
                        let mut spectrum = vec![Complex::default(); fft_size];
                        for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                            bin.re = s;
                        }
                        forward.process_with_scratch(&mut spectrum, &mut scratch);
                        spectrum
                    })
                    .collect()
            })
            .collect();

        let gain = if normalize { normalization_scale(ir) } else { 1.0 };

        Convolver {
            block_size,
            fft_size,
            forward,
            inverse,
            partitions,
            history: vec![vec![Complex::default(); fft_size]; partition_count],
            head: 0,
            window: vec![0.0; fft_size],
            accum: vec![Complex::default(); fft_size],
            scratch,
            output_scale: gain / fft_size as f64,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn partition_count(&self) -> usize {
        self.history.len()
    }

    /// Convolve one block of mono input and add the result into `outputs`.
    ///
    /// `input` and every output slice must be exactly `block_size` long.
    pub fn process_block(&mut self, input: &[f64], outputs: &mut [&mut [f64]]) {
        let b = self.block_size;
        let n = self.fft_size;
        debug_assert_eq!(input.len(), b);

        self.window.copy_within(b.., 0);
        self.window[b..].copy_from_slice(input);

        let count = self.history.len();
        self.head = (self.head + count - 1) % count;
        let newest = &mut self.history[self.head];
        for (bin, &s) in newest.iter_mut().zip(&self.window) {
            *bin = Complex::new(s, 0.0);
        }
        self.forward.process_with_scratch(newest, &mut self.scratch);

        let kernel_channels = self.partitions.len();
        for (c, out) in outputs.iter_mut().enumerate() {
            let kernel = &self.partitions[c.min(kernel_channels - 1)];

            // Real input and kernel: only bins 0..=N/2 need multiplying.
            self.accum.fill(Complex::default());
            for (p, partition) in kernel.iter().enumerate() {
                let x = &self.history[(self.head + p) % count];
                for k in 0..=b {
                    self.accum[k] += x[k] * partition[k];
                }
            }
            for k in b + 1..n {
                self.accum[k] = self.accum[n - k].conj();
            }

            self.inverse.process_with_scratch(&mut self.accum, &mut self.scratch);
            for (o, y) in out.iter_mut().zip(&self.accum[b..]) {
                *o += y.re * self.output_scale;
            }
        }
    }

    /// Forget all buffered input (the tail stops immediately).
    pub fn reset(&mut self) {
        for spectrum in &mut self.history {
            spectrum.fill(Complex::default());
        }
        self.window.fill(0.0);
    }
}
