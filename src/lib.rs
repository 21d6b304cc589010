pub mod descriptor;
pub mod dsp;
pub mod error;
pub mod player;

use crate::descriptor::CompositionDescriptor;
use crate::dsp::engine::GraphRenderer;
use crate::error::EngineError;
use crate::player::{CompositionPlayer, PlayerConfig};
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the moodscape-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

fn js_error(e: EngineError) -> JsValue {
    JsValue::from_str(&format!("{}: {e}", e.error_code()))
}

/// Parse JSON, reporting syntax errors against the source.
fn parse_descriptor(json: &str) -> Result<CompositionDescriptor, JsValue> {
    serde_json::from_str(json)
        .map_err(|e| JsValue::from_str(&descriptor::render_json_error(json, &e)))
}

/// WASM-exposed: validate a descriptor and return it in canonical form.
#[wasm_bindgen]
pub fn validate_composition(json: &str) -> Result<JsValue, JsValue> {
    let descriptor = parse_descriptor(json)?;
    descriptor.validate(&[]).map_err(js_error)?;
    serde_wasm_bindgen::to_value(&descriptor).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render a descriptor to interleaved stereo f32 samples.
#[wasm_bindgen]
pub fn render_composition_samples(json: &str, sample_rate: u32) -> Result<Vec<f32>, JsValue> {
    let descriptor = parse_descriptor(json)?;
    dsp::renderer::render_samples(&descriptor, sample_rate).map_err(js_error)
}

/// WASM-exposed: render a descriptor to a 16-bit stereo WAV byte array.
#[wasm_bindgen]
pub fn render_composition_wav(json: &str, sample_rate: u32) -> Result<Vec<u8>, JsValue> {
    let descriptor = parse_descriptor(json)?;
    dsp::renderer::render_wav(&descriptor, sample_rate).map_err(js_error)
}

/// A player plus its renderer, for driving from an AudioWorklet's `process`.
#[wasm_bindgen]
pub struct CompositionWorklet {
    player: CompositionPlayer,
    renderer: GraphRenderer,
}

#[wasm_bindgen]
impl CompositionWorklet {
    /// `config` is an optional `PlayerConfig` object; its sample rate is
    /// replaced by `sample_rate`.
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64, config: JsValue) -> Result<CompositionWorklet, JsValue> {
        let config: PlayerConfig = if config.is_undefined() || config.is_null() {
            PlayerConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(|e| JsValue::from_str(&format!("{e}")))?
        };
        let (player, renderer) = CompositionPlayer::new(PlayerConfig {
            sample_rate,
            ..config
        })
        .map_err(js_error)?;
        Ok(CompositionWorklet { player, renderer })
    }

    pub fn load(&mut self, json: &str) -> Result<(), JsValue> {
        let descriptor = parse_descriptor(json)?;
        self.player.load(descriptor).map_err(js_error)
    }

    /// Returns the engine-clock time the composition starts at.
    pub fn play(&mut self, start_volume: Option<f64>) -> Result<f64, JsValue> {
        self.player
            .play(start_volume)
            .map(|p| p.start_time)
            .map_err(js_error)
    }

    pub fn pause(&mut self) -> Result<(), JsValue> {
        self.player.pause().map_err(js_error)
    }

    #[wasm_bindgen(js_name = setVolume)]
    pub fn set_volume(&mut self, volume: f64) {
        self.player.set_volume(volume);
    }

    pub fn stop(&mut self) {
        self.player.stop();
    }

    pub fn status(&self) -> String {
        self.player.status().to_string()
    }

    #[wasm_bindgen(js_name = currentTime)]
    pub fn current_time(&self) -> f64 {
        self.player.now()
    }

    #[wasm_bindgen(js_name = activeVoices)]
    pub fn active_voices(&self) -> usize {
        self.player.active_voice_count()
    }

    /// Fill one render quantum of planar stereo output.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.renderer.render(left, right);
    }
}
