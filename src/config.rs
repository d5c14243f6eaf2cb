// src/config.rs

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;

/// Output format shared by the audio decoders and the mixing engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: usize,
    /// Expected callback block size in frames; mix buffers are pre-sized to this.
    pub block_frames: usize,
    /// Sample-rate conversion for sources not already at `sample_rate`.
    pub resample: ResampleQuality,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            block_frames: 1024,
            resample: ResampleQuality::default(),
        }
    }
}

/// Sinc interpolator settings used when a decoder converts sample rates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleQuality {
    /// Filter taps. Longer is sharper and slower.
    pub sinc_len: usize,
    pub oversampling_factor: usize,
    /// Input frames per resampler call.
    pub chunk_frames: usize,
}

impl Default for ResampleQuality {
    fn default() -> Self {
        Self {
            sinc_len: 256,
            oversampling_factor: 128,
            chunk_frames: 1024,
        }
    }
}

/// Tunables for the presentation clock.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Fraction of a frame period a delivered frame may be off before the
    /// sampling phase is nudged.
    pub late_frame_threshold: f64,
    /// How far the sampling phase moves per nudge, as a fraction of a frame period.
    pub jitter_step: f64,
    /// Consecutive `StillDecoding` results before the clock stops advancing.
    pub late_frames_before_catchup: u32,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            late_frame_threshold: 0.4,
            jitter_step: 0.05,
            late_frames_before_catchup: 3,
        }
    }
}

/// Master limiter settings. Times in seconds, levels in dB.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    pub threshold_db: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
    pub rms_secs: f32,
    /// Compression ratio; `None` is a brick-wall limiter (infinite ratio).
    pub ratio: Option<f32>,
    pub makeup_gain_db: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold_db: 0.0,
            attack_secs: 0.0,
            release_secs: 0.05,
            rms_secs: 0.0,
            ratio: None,
            makeup_gain_db: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video_queue_len: usize,
    pub audio_queue_len: usize,
    pub audio: AudioParams,
    pub sync: SyncTuning,
    pub limiter: LimiterParams,
    pub master_volume: f32,
    pub post_seek_fade_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_queue_len: 8,
            audio_queue_len: 8,
            audio: AudioParams::default(),
            sync: SyncTuning::default(),
            limiter: LimiterParams::default(),
            master_volume: 1.0,
            post_seek_fade_ms: 10,
        }
    }
}

impl PipelineConfig {
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}
