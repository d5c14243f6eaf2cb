// src/decoder/mod.rs

//! Decode side of the pipeline: the codec collaborator traits, the worker
//! threads that drive them, and the frame buffers they fill.

pub mod control;
pub mod dsp;
pub mod file;
pub mod frame;
pub mod resample;
pub mod test_pattern;
pub mod worker;

use std::time::Duration;

use crate::config::AudioParams;
use crate::error::{DecodeError, PipelineError};

pub use control::{AudioUnit, Command, Message};
pub use file::FileSource;
pub use frame::{Bitmap, FrameHandle, FramePool, PixelFormat, VideoFrame};
pub use test_pattern::{frame_index, TestPatternSource, ToneSpec};

/// What `open()` learned about a source.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub fps: f64,
    pub size: (u32, u32),
    pub pixel_format: Option<PixelFormat>,
    pub duration: Duration,
    /// Format the audio decoder delivers, already converted to the engine's.
    pub audio: Option<AudioParams>,
}

impl StreamInfo {
    pub fn frame_period(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    pub fn num_frames(&self) -> usize {
        (self.duration.as_secs_f64() * self.fps).round() as usize
    }
}

/// Video half of a codec. Lives on the video worker thread only.
pub trait VideoDecoder: Send {
    /// Decode the next picture into `planes`. `Ok(None)` is end of input.
    fn decode_frame(&mut self, planes: &mut [Bitmap]) -> Result<Option<Duration>, DecodeError>;

    /// Reposition and return the time of the first frame that will follow.
    fn seek_to(&mut self, target: Duration) -> Result<Duration, DecodeError>;

    fn set_fps(&mut self, _fps: f64) {}

    fn close(&mut self) {}
}

/// Audio half of a codec. Lives on the audio worker thread only.
pub trait AudioDecoder: Send {
    /// Decode the next chunk of samples. `Ok(None)` is end of input.
    fn decode_audio(&mut self) -> Result<Option<AudioUnit>, DecodeError>;

    /// Reposition and return the time of the first sample that will follow.
    fn seek_to(&mut self, target: Duration) -> Result<Duration, DecodeError>;

    fn close(&mut self) {}
}

/// Result of a successful open: the stream description plus one decoder per
/// stream, ready to be moved onto its worker thread.
pub struct OpenedMedia {
    pub info: StreamInfo,
    pub video: Option<Box<dyn VideoDecoder>>,
    pub audio: Option<Box<dyn AudioDecoder>>,
}

/// Anything the coordinator can open.
pub trait MediaSource {
    /// Human-readable name used in logs and errors.
    fn describe(&self) -> String;

    /// Open synchronously on the caller's thread. This is the only place a
    /// decode failure reaches the caller as an error.
    fn open(&self, params: &AudioParams) -> Result<OpenedMedia, PipelineError>;
}
