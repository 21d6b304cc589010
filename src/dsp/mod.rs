//! DSP engine: synthesis, reverb and the render graph.
//!
//! All DSP runs in Rust so the same code drives a native output device, a
//! browser AudioWorklet (via WASM) and offline WAV rendering.

pub mod convolver;
pub mod engine;
pub mod envelope;
pub mod impulse;
pub mod mixer;
pub mod oscillator;
#[cfg(feature = "device")]
pub mod output;
pub mod renderer;
pub mod reverb;
pub mod scheduler;
pub mod voice;
