//! Mixer: the master gain stage every reverb bus feeds.

/// Master gain applied to the summed bus output, followed by a soft clipper.
#[derive(Debug, Clone)]
pub struct MasterMixer {
    gain: f64,
}

impl MasterMixer {
    pub fn new(gain: f64) -> Self {
        MasterMixer {
            gain: clamp_gain(gain),
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Takes effect from the next sample processed; no ramp.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = clamp_gain(gain);
    }

    /// Apply gain and soft clipping in place to a stereo block.
    pub fn process(&self, left: &mut [f64], right: &mut [f64]) {
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s = soft_clip(*s * self.gain);
        }
    }
}

impl Default for MasterMixer {
    fn default() -> Self {
        MasterMixer::new(1.0)
    }
}

/// Clamp a volume to [0, 1]; NaN counts as silence.
pub fn clamp_gain(gain: f64) -> f64 {
    if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) }
}

/// Soft clipper using tanh to keep the output inside [-1, 1].
fn soft_clip(x: f64) -> f64 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gain_is_clamped() {
        assert_eq!(clamp_gain(-0.5), 0.0);
        assert_eq!(clamp_gain(2.0), 1.0);
        assert_eq!(clamp_gain(f64::NAN), 0.0);
        assert_eq!(clamp_gain(0.35), 0.35);

        let mut m = MasterMixer::new(7.0);
        assert_eq!(m.gain(), 1.0);
        m.set_gain(-3.0);
        assert_eq!(m.gain(), 0.0);
    }

    #[test]
    fn zero_gain_silences() {
        let m = MasterMixer::new(0.0);
        let mut l = vec![0.5, -0.3];
        let mut r = vec![0.9, 0.1];
        m.process(&mut l, &mut r);
        assert!(l.iter().chain(&r).all(|&s| s == 0.0));
    }

    #[test]
    fn scales_then_clips() {
        let m = MasterMixer::new(0.5);
        let mut l = vec![0.01, 100.0];
        let mut r = vec![-0.01, -100.0];
        m.process(&mut l, &mut r);
        assert_abs_diff_eq!(l[0], (0.005f64).tanh(), epsilon = 1e-12);
        assert_abs_diff_eq!(r[0], (-0.005f64).tanh(), epsilon = 1e-12);
        assert!(l[1] <= 1.0 && r[1] >= -1.0);
    }
}
