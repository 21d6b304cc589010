//! Offline renderer: plays a composition into a buffer instead of a device.

use super::scheduler::LayerPreset;
use super::voice::frame_at_or_after;
use crate::descriptor::CompositionDescriptor;
use crate::error::{EngineError, Result};
use crate::player::{CompositionPlayer, PlayerConfig};

/// Longest offline render, in frames.
pub const MAX_RENDER_FRAMES: u64 = 1 << 25;

/// Length of a full render: the last voice's stop plus its layer's reverb tail.
pub fn render_length_seconds(descriptor: &CompositionDescriptor) -> f64 {
    descriptor
        .layers
        .iter()
        .map(|(name, layer)| {
            let preset = LayerPreset::for_layer(name);
            let padding = layer.stop_padding_seconds.unwrap_or(preset.stop_padding_seconds);
            let decay = layer.reverb_decay_seconds.unwrap_or(preset.reverb_decay_seconds);
            let last_stop = layer
                .events
                .iter()
                .map(|e| e.start_offset_seconds + e.duration_seconds + layer.release_seconds + padding)
                .fold(0.0, f64::max);
            last_stop + decay
        })
        .fold(0.0, f64::max)
}

/// Render to interleaved stereo f32 with default settings.
pub fn render_samples(descriptor: &CompositionDescriptor, sample_rate: u32) -> Result<Vec<f32>> {
    render_samples_with(
        descriptor,
        PlayerConfig {
            sample_rate: sample_rate as f64,
            lookahead_seconds: 0.0,
            ..PlayerConfig::default()
        },
    )
}

/// Render to interleaved stereo f32. The composition starts at frame
/// `lookahead_seconds * sample_rate`.
pub fn render_samples_with(
    descriptor: &CompositionDescriptor,
    config: PlayerConfig,
) -> Result<Vec<f32>> {
    config.validate()?;
    descriptor.validate(&config.required_layers)?;
    let seconds = config.lookahead_seconds + render_length_seconds(descriptor);
    let frames = frame_at_or_after(seconds, config.sample_rate);
    if !seconds.is_finite() || frames > MAX_RENDER_FRAMES {
        return Err(EngineError::contract(
            "layers",
            format!(
                "{seconds}s at {} Hz exceeds the {MAX_RENDER_FRAMES}-frame render limit",
                config.sample_rate
            ),
        ));
    }

    let (mut player, mut renderer) = CompositionPlayer::new(config)?;
    player.load(descriptor.clone())?;
    player.play(None)?;

    let mut out = vec![0.0f32; frames as usize * 2];
    renderer.render_interleaved(&mut out, 2);
    player.stop();
    Ok(out)
}

/// Render to a 16-bit stereo WAV byte buffer.
pub fn render_wav(descriptor: &CompositionDescriptor, sample_rate: u32) -> Result<Vec<u8>> {
    let samples = render_samples(descriptor, sample_rate)?;
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect();
    Ok(encode_wav(&pcm, sample_rate, 2))
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    const BITS: u16 = 16;
    let block_align = channels * BITS / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (samples.len() * 2) as u32;

    let mut buf = Vec::with_capacity(44 + data_size as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&BITS.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf
}
