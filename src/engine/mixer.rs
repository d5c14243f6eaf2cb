// src/engine/mixer.rs

use super::AudioSource;
use crate::decoder::dsp;

/// Float mix bus. Each block: `begin_block`, one `render_source` per
/// registered source, then read the sum back through `mix_buffer_mut`.
pub struct Mixer {
    channels: usize,
    mix_buffer: Vec<f32>,
    scratch_buffer: Vec<f32>,
}

impl Mixer {
    pub fn new(channels: usize, block_frames: usize) -> Self {
        let channels = channels.max(1);
        let initial_capacity = block_frames.max(1) * channels;
        Self {
            channels,
            mix_buffer: Vec::with_capacity(initial_capacity),
            scratch_buffer: Vec::with_capacity(initial_capacity),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Clear the bus for a block of `frames`. Only allocates when the device
    /// asks for more than any block so far.
    pub fn begin_block(&mut self, frames: usize) {
        let needed = frames * self.channels;
        if self.mix_buffer.len() != needed {
            self.mix_buffer.resize(needed, 0.0);
        }
        if self.scratch_buffer.len() < needed {
            self.scratch_buffer.resize(needed, 0.0);
        }
        self.mix_buffer.fill(0.0);
    }

    /// Pull one block from `source` and add it to the bus at `gain`.
    /// Returns the frames the source produced.
    pub fn render_source(&mut self, source: &mut dyn AudioSource, gain: f32) -> usize {
        let total_samples = self.mix_buffer.len();
        let scratch = &mut self.scratch_buffer[..total_samples];

        let written_frames = source.fill_audio_buffer(scratch);
        let samples = (written_frames * self.channels).min(total_samples);
        if gain > 0.0 {
            dsp::mix_add(&mut self.mix_buffer[..samples], &scratch[..samples], gain);
        }
        written_frames
    }

    pub fn mix_buffer(&self) -> &[f32] {
        &self.mix_buffer
    }

    pub fn mix_buffer_mut(&mut self) -> &mut [f32] {
        &mut self.mix_buffer
    }
}
