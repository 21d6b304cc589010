//! Gain automation: time-stamped envelope curves on the engine clock.
//!
//! A [`GainAutomation`] is a list of set-value and linear-ramp events, evaluated
//! the same way a WebAudio `AudioParam` evaluates its timeline: a ramp runs from
//! the previous event's (time, value) to its own (time, value).

/// One automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`.
    SetValue { time: f64, value: f64 },
    /// Reach `value` at `time`, ramping linearly from the previous event.
    LinearRamp { time: f64, value: f64 },
}

impl AutomationEvent {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } | AutomationEvent::LinearRamp { time, .. } => time,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { value, .. } | AutomationEvent::LinearRamp { value, .. } => {
                value
            }
        }
    }
}

/// A gain curve over absolute time (seconds on the engine clock).
#[derive(Debug, Clone, PartialEq)]
pub struct GainAutomation {
    /// Value before the first event.
    default_value: f64,
    /// Events kept sorted by time; equal times keep insertion order.
    events: Vec<AutomationEvent>,
}

impl GainAutomation {
    pub fn new(default_value: f64) -> Self {
        GainAutomation {
            default_value,
            events: Vec::new(),
        }
    }

    pub fn set_value_at_time(mut self, value: f64, time: f64) -> Self {
        self.insert(AutomationEvent::SetValue { time, value });
        self
    }

    pub fn linear_ramp_to_value_at_time(mut self, value: f64, time: f64) -> Self {
        self.insert(AutomationEvent::LinearRamp { time, value });
        self
    }

    fn insert(&mut self, event: AutomationEvent) {
        let idx = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(idx, event);
    }

    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    /// Evaluate the curve at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        let idx = self.events.partition_point(|e| e.time() <= time);
        if idx == 0 {
            return match self.events.first() {
                Some(&AutomationEvent::LinearRamp { time: end, value }) if end > 0.0 => {
                    lerp(0.0, self.default_value, end, value, time.max(0.0))
                }
                _ => self.default_value,
            };
        }

        let current = self.events[idx - 1];
        match self.events.get(idx) {
            Some(&AutomationEvent::LinearRamp { time: end, value }) => {
                lerp(current.time(), current.value(), end, value, time)
            }
            _ => current.value(),
        }
    }
}

fn lerp(t0: f64, v0: f64, t1: f64, v1: f64, t: f64) -> f64 {
    if t1 <= t0 {
        return v1;
    }
    let frac = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
    v0 + (v1 - v0) * frac
}

/// Timing of one voice's attack/release envelope and oscillator lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeTiming {
    /// Absolute start time in seconds.
    pub start_time: f64,
    pub attack: f64,
    /// Sustain length before the release deadline is counted.
    pub sustain: f64,
    pub release: f64,
    pub peak_gain: f64,
    /// Extra time after the release before the oscillator is stopped.
    pub stop_padding: f64,
}

impl EnvelopeTiming {
    /// When the gain reaches zero.
    pub fn release_end(&self) -> f64 {
        self.start_time + self.sustain + self.release
    }

    /// When the gain reaches its peak. Never later than the release end.
    pub fn attack_end(&self) -> f64 {
        (self.start_time + self.attack).min(self.release_end())
    }

    /// When the oscillator is stopped and the voice released.
    pub fn stop_time(&self) -> f64 {
        self.release_end() + self.stop_padding
    }

    /// Build the gain curve: 0 up to the start, ramp to peak, ramp back to 0.
    pub fn automation(&self) -> GainAutomation {
        GainAutomation::new(0.0)
            .set_value_at_time(0.0, self.start_time)
            .linear_ramp_to_value_at_time(self.peak_gain, self.attack_end())
            .linear_ramp_to_value_at_time(0.0, self.release_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn timing(attack: f64, sustain: f64, release: f64) -> EnvelopeTiming {
        EnvelopeTiming {
            start_time: 2.0,
            attack,
            sustain,
            release,
            peak_gain: 0.18,
            stop_padding: 0.1,
        }
    }

    #[test]
    fn default_value_before_first_event() {
        let curve = GainAutomation::new(1.0).set_value_at_time(0.0, 1.0);
        assert_eq!(curve.value_at(0.5), 1.0);
        assert_eq!(curve.value_at(1.0), 0.0);
        assert_eq!(curve.value_at(9.0), 0.0);
    }

    #[test]
    fn linear_ramp_interpolates() {
        let curve = GainAutomation::new(1.0)
            .set_value_at_time(0.0, 1.0)
            .linear_ramp_to_value_at_time(0.5, 2.0);
        assert_abs_diff_eq!(curve.value_at(1.5), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.value_at(2.0), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.value_at(3.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn events_sorted_on_insert() {
        let curve = GainAutomation::new(1.0)
            .linear_ramp_to_value_at_time(0.0, 3.0)
            .set_value_at_time(0.0, 1.0)
            .linear_ramp_to_value_at_time(1.0, 2.0);
        let times: Vec<f64> = curve.events().iter().map(|e| e.time()).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn envelope_hits_peak_and_zero() {
        let t = timing(0.05, 1.0, 0.3);
        let curve = t.automation();
        assert_abs_diff_eq!(curve.value_at(t.start_time), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.value_at(t.attack_end()), 0.18, epsilon = 1e-12);
        assert_abs_diff_eq!(curve.value_at(t.release_end()), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.stop_time(), 2.0 + 1.0 + 0.3 + 0.1, epsilon = 1e-12);
    }

    #[test]
    fn envelope_monotone_through_attack_and_release() {
        for (attack, sustain, release) in [
            (0.05, 1.0, 0.3),
            (0.5, 0.1, 0.6),
            (0.0, 0.0, 0.4),
            (1.2, 0.25, 2.0),
        ] {
            let t = timing(attack, sustain, release);
            let curve = t.automation();
            let steps = 400;

            let mut prev = curve.value_at(t.start_time);
            for i in 1..=steps {
                let time = t.start_time + (t.attack_end() - t.start_time) * i as f64 / steps as f64;
                let v = curve.value_at(time);
                assert!(v + 1e-12 >= prev, "attack not monotone at {time}: {prev} -> {v}");
                prev = v;
            }

            let mut prev = curve.value_at(t.attack_end());
            for i in 1..=steps {
                let time =
                    t.attack_end() + (t.release_end() - t.attack_end()) * i as f64 / steps as f64;
                let v = curve.value_at(time);
                assert!(v <= prev + 1e-12, "release not monotone at {time}: {prev} -> {v}");
                prev = v;
            }
            assert_abs_diff_eq!(curve.value_at(t.release_end()), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn silent_before_start() {
        let t = timing(0.05, 1.0, 0.3);
        let curve = t.automation();
        assert_eq!(curve.value_at(0.0), 0.0);
        assert_eq!(curve.value_at(t.start_time - 1e-9), 0.0);
    }

    #[test]
    fn zero_attack_is_instant_onset() {
        let t = timing(0.0, 1.0, 0.3);
        let curve = t.automation();
        assert_abs_diff_eq!(curve.value_at(t.start_time), 0.18, epsilon = 1e-12);
    }

    #[test]
    fn stop_after_start_with_zero_sustain() {
        let t = timing(0.0, 0.0, 0.0);
        assert!(t.stop_time() > t.start_time);
        assert_abs_diff_eq!(t.stop_time(), t.start_time + 0.1, epsilon = 1e-12);
    }

    #[test]
    fn attack_longer_than_note_is_clamped() {
        let t = timing(2.0, 0.5, 0.5);
        assert_abs_diff_eq!(t.attack_end(), t.release_end(), epsilon = 1e-12);
        let curve = t.automation();
        // Still rising until the release end, then silent.
        assert!(curve.value_at(t.start_time + 0.5) > 0.0);
        assert_abs_diff_eq!(curve.value_at(t.release_end() + 0.01), 0.0, epsilon = 1e-12);
    }
}
