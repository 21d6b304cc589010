//! Device output: plays a [`GraphRenderer`] through the default system device.
//!
//! The renderer moves into the cpal callback and is pulled directly from the
//! device thread; the control side only talks to it through its command
//! channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::engine::GraphRenderer;
use crate::error::{EngineError, Result};

/// The default output device and the stream configuration it prefers.
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl OutputDevice {
    /// Query the default host for its default output device.
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::device("no audio output device available"))?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::device(format!("failed to get default output config: {e}")))?;
        Ok(OutputDevice { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Build and start a stream that pulls `renderer`. Nothing stays allocated
    /// on failure.
    pub fn start(self, mut renderer: GraphRenderer) -> Result<DeviceOutput> {
        let sample_rate = self.sample_rate();
        let channels = self.channels();
        let format = self.config.sample_format();
        let stream_config: cpal::StreamConfig = self.config.into();
        let ch = channels as usize;

        let stream = match format {
            cpal::SampleFormat::F32 => self.device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render_interleaved(data, ch);
                },
                |err| error!("audio stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::I16 => {
                let mut scratch: Vec<f32> = vec![0.0; 4096];
                self.device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if scratch.len() < data.len() {
                            scratch.resize(data.len(), 0.0);
                        }
                        let buf = &mut scratch[..data.len()];
                        renderer.render_interleaved(buf, ch);
                        for (out, &s) in data.iter_mut().zip(buf.iter()) {
                            *out = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            cpal::SampleFormat::U16 => {
                let mut scratch: Vec<f32> = vec![0.0; 4096];
                self.device.build_output_stream(
                    &stream_config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        if scratch.len() < data.len() {
                            scratch.resize(data.len(), 0.0);
                        }
                        let buf = &mut scratch[..data.len()];
                        renderer.render_interleaved(buf, ch);
                        for (out, &s) in data.iter_mut().zip(buf.iter()) {
                            *out = (s * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16;
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            other => {
                return Err(EngineError::device(format!("unsupported sample format: {other:?}")));
            }
        }
        .map_err(|e| EngineError::device(format!("failed to build audio stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EngineError::device(format!("failed to play audio stream: {e}")))?;

        info!(sample_rate, channels, "audio output started");
        Ok(DeviceOutput {
            _stream: stream,
            sample_rate,
            channels,
        })
    }
}

/// A running output stream. Dropping it stops playback.
pub struct DeviceOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl DeviceOutput {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}
