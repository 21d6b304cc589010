//! Composition descriptors: the timed, layered note data the engine plays.
//!
//! Descriptors come from an external generator as JSON. Field names are
//! camelCase; the short names the generator service emits (`bpm`, `type`,
//! `attack`, `release`, `start`, `duration`, `frequencies`/`frequency`,
//! `gain`) are accepted as aliases.

use std::collections::BTreeMap;

use ariadne::{Config, Label, Report, ReportKind, Source};
use serde::{Deserialize, Serialize};

use crate::dsp::oscillator::Waveform;
use crate::error::{EngineError, Result};

/// A full composition: tempo plus named layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionDescriptor {
    /// Informational; event times are already in seconds.
    #[serde(alias = "bpm")]
    pub tempo_bpm: f64,
    pub layers: BTreeMap<String, LayerSpec>,
}

/// One layer: a timbre, envelope shape, reverb size and its events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    #[serde(alias = "type")]
    pub waveform: Waveform,
    #[serde(alias = "attack")]
    pub attack_seconds: f64,
    #[serde(alias = "release")]
    pub release_seconds: f64,
    /// Falls back to the layer preset when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb_decay_seconds: Option<f64>,
    /// Layer-wide default peak gain for events that carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_padding_seconds: Option<f64>,
    #[serde(default)]
    pub events: Vec<SoundEvent>,
}

/// A note or chord: one voice per pitch, all sharing start and duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawSoundEvent")]
pub struct SoundEvent {
    pub start_offset_seconds: f64,
    pub duration_seconds: f64,
    pub pitches: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_gain: Option<f64>,
}

/// Wire form of an event: chords list `frequencies`, single notes may use a
/// scalar `frequency`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSoundEvent {
    #[serde(alias = "start")]
    start_offset_seconds: f64,
    #[serde(alias = "duration")]
    duration_seconds: f64,
    #[serde(default, alias = "frequencies")]
    pitches: Vec<f64>,
    #[serde(default)]
    frequency: Option<f64>,
    #[serde(default, alias = "gain")]
    peak_gain: Option<f64>,
}

impl From<RawSoundEvent> for SoundEvent {
    fn from(raw: RawSoundEvent) -> Self {
        let mut pitches = raw.pitches;
        pitches.extend(raw.frequency);
        SoundEvent {
            start_offset_seconds: raw.start_offset_seconds,
            duration_seconds: raw.duration_seconds,
            pitches,
            peak_gain: raw.peak_gain,
        }
    }
}

impl SoundEvent {
    pub fn is_chord(&self) -> bool {
        self.pitches.len() > 1
    }
}

impl CompositionDescriptor {
    /// Check the producer contract. `required_layers` lists layer names that
    /// must be present in addition to the at-least-one-layer rule.
    pub fn validate(&self, required_layers: &[String]) -> Result<()> {
        if !self.tempo_bpm.is_finite() || self.tempo_bpm <= 0.0 {
            return Err(EngineError::contract(
                "tempoBpm",
                format!("must be a positive number, got {}", self.tempo_bpm),
            ));
        }
        if self.layers.is_empty() {
            return Err(EngineError::contract("layers", "at least one layer is required"));
        }
        if let Some(missing) = required_layers.iter().find(|l| !self.layers.contains_key(*l)) {
            return Err(EngineError::contract(
                format!("layers.{missing}"),
                "required layer is missing",
            ));
        }
        for (name, layer) in &self.layers {
            layer.validate(&format!("layers.{name}"))?;
        }
        Ok(())
    }

    /// Total number of voices a full schedule creates.
    pub fn voice_count(&self) -> usize {
        self.layers
            .values()
            .flat_map(|l| &l.events)
            .map(|e| e.pitches.len())
            .sum()
    }

    /// Latest `start + duration + release` over every event, in seconds.
    pub fn release_end_seconds(&self) -> f64 {
        self.layers
            .values()
            .flat_map(|l| {
                l.events
                    .iter()
                    .map(move |e| e.start_offset_seconds + e.duration_seconds + l.release_seconds)
            })
            .fold(0.0, f64::max)
    }
}

impl LayerSpec {
    /// Check one layer; `path` prefixes every reported location.
    pub fn validate(&self, path: &str) -> Result<()> {
        non_negative(self.attack_seconds, &format!("{path}.attackSeconds"))?;
        non_negative(self.release_seconds, &format!("{path}.releaseSeconds"))?;
        if let Some(decay) = self.reverb_decay_seconds {
            positive(decay, &format!("{path}.reverbDecaySeconds"))?;
        }
        if let Some(gain) = self.peak_gain {
            non_negative(gain, &format!("{path}.peakGain"))?;
        }
        if let Some(padding) = self.stop_padding_seconds {
            positive(padding, &format!("{path}.stopPaddingSeconds"))?;
        }

        for (i, event) in self.events.iter().enumerate() {
            let at = format!("{path}.events[{i}]");
            non_negative(event.start_offset_seconds, &format!("{at}.startOffsetSeconds"))?;
            non_negative(event.duration_seconds, &format!("{at}.durationSeconds"))?;
            if let Some(gain) = event.peak_gain {
                non_negative(gain, &format!("{at}.peakGain"))?;
            }
            if event.pitches.is_empty() {
                return Err(EngineError::contract(
                    format!("{at}.pitches"),
                    "an event needs at least one pitch",
                ));
            }
            for (p, &hz) in event.pitches.iter().enumerate() {
                if !hz.is_finite() || hz <= 0.0 {
                    return Err(EngineError::contract(
                        format!("{at}.pitches[{p}]"),
                        format!("frequency must be a positive number of Hz, got {hz}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn non_negative(value: f64, path: &str) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::contract(path, format!("must be a non-negative number, got {value}")))
    }
}

fn positive(value: f64, path: &str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::contract(path, format!("must be a positive number, got {value}")))
    }
}

/// Parse and validate a JSON descriptor. Layer requirements beyond
/// "at least one" are left to the player.
pub fn from_json(json: &str) -> Result<CompositionDescriptor> {
    let descriptor: CompositionDescriptor = serde_json::from_str(json).map_err(|e| {
        EngineError::contract(format!("json:{}:{}", e.line(), e.column()), e.to_string())
    })?;
    descriptor.validate(&[])?;
    Ok(descriptor)
}

/// Render a JSON parse error as a source-annotated report (no ANSI colors).
pub fn render_json_error(source: &str, err: &serde_json::Error) -> String {
    let offset = char_offset(source, err.line(), err.column());
    let end = (offset + 1).min(source.chars().count()).max(offset);
    let span = offset..end;

    let mut out = Vec::new();
    let written = Report::build(ReportKind::Error, span.clone())
        .with_config(Config::default().with_color(false))
        .with_message("invalid composition descriptor")
        .with_label(Label::new(span).with_message(err.to_string()))
        .finish()
        .write(Source::from(source), &mut out);

    match written {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => err.to_string(),
    }
}

/// Char offset of a 1-based (line, column) position, clamped to the source.
fn char_offset(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, text) in source.split('\n').enumerate() {
        let len = text.chars().count();
        if i + 1 == line {
            return offset + column.saturating_sub(1).min(len);
        }
        offset += len + 1;
    }
    source.chars().count()
}
