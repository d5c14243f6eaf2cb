// src/audio.rs

//! Default output device plumbing: one cpal stream whose callback pulls
//! blocks from an `AudioEngine`.

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info};
use std::time::Duration;

use crate::config::AudioParams;
use crate::engine::AudioEngine;

/// Helper struct to hold output device info
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

impl OutputConfig {
    /// Engine format matching this device, keeping `base`'s block size and
    /// mixing in stereo (or mono on a mono device).
    pub fn engine_params(&self, base: AudioParams) -> AudioParams {
        AudioParams {
            sample_rate: self.output_sample_rate,
            channels: self.output_channels.clamp(1, 2),
            ..base
        }
    }
}

/// Finds the default audio output device and its config.
pub fn setup_output_device() -> anyhow::Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let supported_config = device
        .default_output_config()
        .context("querying default output config")?;
    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    info!(
        "output device: {} channels, {} Hz, {:?}",
        output_channels, output_sample_rate, sample_format
    );

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

fn build_stream<T>(output: &OutputConfig, engine: AudioEngine) -> anyhow::Result<Stream>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
{
    let channels = output.output_channels;
    let err_fn = |err| error!("output stream error: {err}");
    output
        .device
        .build_output_stream(
            &output.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                engine.mix_into(data, channels);
            },
            err_fn,
            None,
        )
        .map_err(Into::into)
}

/// A running output stream. Dropping it closes the device.
pub struct OutputHandle {
    stream: Stream,
    engine: AudioEngine,
}

impl OutputHandle {
    /// Stop the device callback and the engine.
    pub fn pause(&self) -> anyhow::Result<()> {
        self.engine.pause();
        self.stream.pause()?;
        Ok(())
    }

    pub fn play(&self) -> anyhow::Result<()> {
        self.engine.play();
        self.stream.play()?;
        Ok(())
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }
}

/// Open a stream on `output` that plays `engine`.
pub fn start_output(output: &OutputConfig, engine: &AudioEngine) -> anyhow::Result<OutputHandle> {
    let stream = match output.sample_format {
        SampleFormat::F32 => build_stream::<f32>(output, engine.clone())?,
        SampleFormat::I16 => build_stream::<i16>(output, engine.clone())?,
        SampleFormat::U16 => build_stream::<u16>(output, engine.clone())?,
        other => return Err(anyhow!("unsupported output sample format {other:?}")),
    };
    stream.play().context("starting output stream")?;
    Ok(OutputHandle {
        stream,
        engine: engine.clone(),
    })
}

/// Stands in for a device when there is none. The caller reports elapsed
/// wall time and the engine is pulled at its sample rate with the result
/// thrown away, so attached streams keep draining and still reach their end.
pub struct SilentOutput {
    engine: AudioEngine,
    scratch: Vec<f32>,
    rendered: u64,
    paused: bool,
}

impl SilentOutput {
    pub fn new(engine: &AudioEngine) -> Self {
        let params = engine.params();
        Self {
            engine: engine.clone(),
            scratch: vec![0.0; params.block_frames.max(1) * params.channels.max(1)],
            rendered: 0,
            paused: false,
        }
    }

    /// Render everything due up to `elapsed` since this output started.
    /// Time spent paused is skipped, not caught up.
    pub fn advance(&mut self, elapsed: Duration) {
        let params = self.engine.params();
        let channels = params.channels.max(1);
        let due = (elapsed.as_secs_f64() * params.sample_rate as f64).round() as u64;
        if self.paused {
            self.rendered = self.rendered.max(due);
            return;
        }
        let block = (self.scratch.len() / channels) as u64;
        while self.rendered < due {
            let frames = (due - self.rendered).min(block) as usize;
            self.engine
                .mix_into(&mut self.scratch[..frames * channels], channels);
            self.rendered += frames as u64;
        }
    }

    pub fn pause(&mut self) {
        self.engine.pause();
        self.paused = true;
    }

    pub fn play(&mut self) {
        self.engine.play();
        self.paused = false;
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }
}
