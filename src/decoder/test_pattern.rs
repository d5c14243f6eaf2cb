// src/decoder/test_pattern.rs

//! Deterministic synthetic media: numbered frames and a sine tone.
//!
//! Frame `n` has pts `n / fps` and carries `n` as a little-endian `u32` in
//! the first four bytes of its first plane, so consumers can tell exactly
//! which frame they got.

use std::f32::consts::TAU;
use std::thread;
use std::time::Duration;

use super::control::AudioUnit;
use super::frame::{Bitmap, PixelFormat};
use super::{AudioDecoder, MediaSource, OpenedMedia, StreamInfo, VideoDecoder};
use crate::config::AudioParams;
use crate::error::{DecodeError, PipelineError};

const AUDIO_CHUNK_FRAMES: usize = 1024;

/// Constant sine tone written to every channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneSpec {
    pub freq_hz: f32,
    pub amplitude: f32,
}

impl ToneSpec {
    /// Sample value at frame `k` for the given rate.
    pub fn sample(&self, sample_rate: u32, k: u64) -> f32 {
        let phase = (k % sample_rate as u64) as f32 / sample_rate as f32;
        self.amplitude * (TAU * self.freq_hz * phase).sin()
    }
}

#[derive(Clone, Debug)]
pub struct TestPatternSource {
    duration: Duration,
    fps: f64,
    size: (u32, u32),
    format: PixelFormat,
    video: bool,
    tone: Option<ToneSpec>,
    fail_video_at: Option<usize>,
    fail_audio_at: Option<usize>,
    decode_delay: Duration,
}

impl TestPatternSource {
    /// Video-only clip, 16x16 RGBA.
    pub fn new(duration: Duration, fps: f64) -> Self {
        Self {
            duration,
            fps,
            size: (16, 16),
            format: PixelFormat::Rgba,
            video: true,
            tone: None,
            fail_video_at: None,
            fail_audio_at: None,
            decode_delay: Duration::ZERO,
        }
    }

    /// Audio-only clip carrying `tone`.
    pub fn tone_only(duration: Duration, tone: ToneSpec) -> Self {
        Self {
            video: false,
            tone: Some(tone),
            ..Self::new(duration, 0.0)
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_tone(mut self, tone: ToneSpec) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Make decoding of video frame `index` fail.
    pub fn fail_video_at(mut self, index: usize) -> Self {
        self.fail_video_at = Some(index);
        self
    }

    /// Make decoding of audio chunk `index` fail.
    pub fn fail_audio_at(mut self, index: usize) -> Self {
        self.fail_audio_at = Some(index);
        self
    }

    /// Sleep this long per decoded video frame, to simulate a slow codec.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }
}

/// Read back the frame index a pattern frame carries.
pub fn frame_index(plane: &Bitmap) -> Option<u32> {
    let bytes = plane.pixels.get(..4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn pts_of(index: u64, rate: f64) -> Duration {
    Duration::from_nanos((index as f64 * 1e9 / rate).round() as u64)
}

impl MediaSource for TestPatternSource {
    fn describe(&self) -> String {
        format!(
            "test-pattern({:.2}s @ {} fps{})",
            self.duration.as_secs_f64(),
            self.fps,
            if self.tone.is_some() { ", tone" } else { "" }
        )
    }

    fn open(&self, params: &AudioParams) -> Result<OpenedMedia, PipelineError> {
        if !self.video && self.tone.is_none() {
            return Err(PipelineError::NoStreams(self.describe()));
        }
        if self.video && self.fps <= 0.0 {
            return Err(PipelineError::Open {
                path: self.describe(),
                reason: format!("invalid frame rate {}", self.fps),
            });
        }

        let info = StreamInfo {
            has_video: self.video,
            has_audio: self.tone.is_some(),
            fps: if self.video { self.fps } else { 0.0 },
            size: if self.video { self.size } else { (0, 0) },
            pixel_format: self.video.then_some(self.format),
            duration: self.duration,
            audio: self.tone.map(|_| *params),
        };

        let video = self.video.then(|| {
            Box::new(PatternVideo {
                duration: self.duration,
                fps: self.fps,
                next: 0,
                fail_at: self.fail_video_at,
                delay: self.decode_delay,
            }) as Box<dyn VideoDecoder>
        });

        let audio = self.tone.map(|tone| {
            Box::new(PatternAudio {
                tone,
                sample_rate: params.sample_rate,
                channels: params.channels,
                total_frames: (self.duration.as_secs_f64() * params.sample_rate as f64).round()
                    as u64,
                pos: 0,
                chunks: 0,
                fail_at: self.fail_audio_at,
            }) as Box<dyn AudioDecoder>
        });

        Ok(OpenedMedia { info, video, audio })
    }
}

struct PatternVideo {
    duration: Duration,
    fps: f64,
    next: u64,
    fail_at: Option<usize>,
    delay: Duration,
}

impl PatternVideo {
    fn num_frames(&self) -> u64 {
        (self.duration.as_secs_f64() * self.fps).round() as u64
    }
}

impl VideoDecoder for PatternVideo {
    fn decode_frame(&mut self, planes: &mut [Bitmap]) -> Result<Option<Duration>, DecodeError> {
        if self.next >= self.num_frames() {
            return Ok(None);
        }
        if self.fail_at == Some(self.next as usize) {
            return Err(DecodeError::Corrupt(format!("injected failure at frame {}", self.next)));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let n = self.next as u32;
        for plane in planes.iter_mut() {
            plane.pixels.fill((n % 251) as u8);
        }
        if let Some(head) = planes.first_mut().and_then(|p| p.pixels.get_mut(..4)) {
            head.copy_from_slice(&n.to_le_bytes());
        }

        self.next += 1;
        Ok(Some(pts_of(n as u64, self.fps)))
    }

    fn seek_to(&mut self, target: Duration) -> Result<Duration, DecodeError> {
        let index = (target.as_secs_f64() * self.fps).round() as u64;
        self.next = index.min(self.num_frames());
        Ok(pts_of(self.next, self.fps))
    }

    fn set_fps(&mut self, fps: f64) {
        if fps > 0.0 {
            // Keep the current position in time.
            let t = self.next as f64 / self.fps;
            self.fps = fps;
            self.next = (t * fps).round() as u64;
        }
    }
}

struct PatternAudio {
    tone: ToneSpec,
    sample_rate: u32,
    channels: usize,
    total_frames: u64,
    pos: u64,
    chunks: usize,
    fail_at: Option<usize>,
}

impl AudioDecoder for PatternAudio {
    fn decode_audio(&mut self) -> Result<Option<AudioUnit>, DecodeError> {
        if self.pos >= self.total_frames {
            return Ok(None);
        }
        if self.fail_at == Some(self.chunks) {
            return Err(DecodeError::Corrupt(format!("injected failure at chunk {}", self.chunks)));
        }

        let frames = (self.total_frames - self.pos).min(AUDIO_CHUNK_FRAMES as u64);
        let mut samples = Vec::with_capacity(frames as usize * self.channels);
        for k in self.pos..self.pos + frames {
            let s = self.tone.sample(self.sample_rate, k);
            samples.extend(std::iter::repeat_n(s, self.channels));
        }

        let pts = pts_of(self.pos, self.sample_rate as f64);
        self.pos += frames;
        self.chunks += 1;
        Ok(Some(AudioUnit { samples, pts }))
    }

    fn seek_to(&mut self, target: Duration) -> Result<Duration, DecodeError> {
        let frame = (target.as_secs_f64() * self.sample_rate as f64).round() as u64;
        self.pos = frame.min(self.total_frames);
        Ok(pts_of(self.pos, self.sample_rate as f64))
    }
}
