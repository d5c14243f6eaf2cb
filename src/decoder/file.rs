// src/decoder/file.rs

//! Audio files decoded with symphonia and converted to the engine format.

use log::{debug, warn};
use rubato::SincFixedIn;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use symphonia::default::{get_codecs, get_probe};

use super::control::AudioUnit;
use super::{dsp, resample, AudioDecoder, MediaSource, OpenedMedia, StreamInfo};
use crate::config::AudioParams;
use crate::error::{DecodeError, PipelineError};

/// A media file on disk. Only its audio stream is decoded.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_error(&self, reason: impl ToString) -> PipelineError {
        PipelineError::Open {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl MediaSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self, params: &AudioParams) -> Result<OpenedMedia, PipelineError> {
        let file = File::open(&self.path).map_err(|e| self.open_error(e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = self.path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| self.open_error(e))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PipelineError::NoStreams(self.describe()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| self.open_error(e))?;

        let source_rate = codec_params
            .sample_rate
            .ok_or_else(|| self.open_error("unknown sample rate"))?;
        let time_base = codec_params
            .time_base
            .unwrap_or_else(|| TimeBase::new(1, source_rate));
        let duration = codec_params
            .n_frames
            .map(|n| to_duration(time_base.calc_time(n)))
            .unwrap_or(Duration::ZERO);

        let resampler = resample::build_resampler(source_rate, params)
            .map_err(|e| self.open_error(e))?;

        debug!(
            "opened {}: {} Hz -> {} Hz, {:?}",
            self.describe(),
            source_rate,
            params.sample_rate,
            duration
        );

        let info = StreamInfo {
            has_video: false,
            has_audio: true,
            fps: 0.0,
            size: (0, 0),
            pixel_format: None,
            duration,
            audio: Some(*params),
        };

        let audio = FileAudio {
            format,
            decoder,
            track_id,
            time_base,
            out_rate: params.sample_rate,
            out_channels: params.channels,
            resampler,
            stage_planar: vec![Vec::with_capacity(4096); params.channels],
            sample_buf: None,
            pending: Vec::new(),
            skip_source_frames: 0,
            emitted_frames: 0,
            base_time: Duration::ZERO,
            finished: false,
        };

        Ok(OpenedMedia {
            info,
            video: None,
            audio: Some(Box::new(audio)),
        })
    }
}

struct FileAudio {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    time_base: TimeBase,
    out_rate: u32,
    out_channels: usize,
    resampler: Option<SincFixedIn<f32>>,
    stage_planar: Vec<Vec<f32>>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Converted interleaved output not yet handed out.
    pending: Vec<f32>,
    /// Source frames to drop after an accurate seek landed early.
    skip_source_frames: u64,
    /// Output frames emitted since `base_time`.
    emitted_frames: u64,
    base_time: Duration,
    finished: bool,
}

impl FileAudio {
    /// Convert the packet last copied into `sample_buf` into engine-format
    /// samples on `pending`.
    fn absorb(&mut self, in_ch: usize) -> Result<(), DecodeError> {
        let Some(buf) = self.sample_buf.as_ref() else {
            return Ok(());
        };

        let mut src = buf.samples();
        if self.skip_source_frames > 0 {
            let frames = (src.len() / in_ch) as u64;
            let skip = self.skip_source_frames.min(frames);
            src = &src[skip as usize * in_ch..];
            self.skip_source_frames -= skip;
        }
        if src.is_empty() {
            return Ok(());
        }

        let mixed = dsp::updown_mix_interleaved(src, in_ch, self.out_channels);
        match self.resampler.as_mut() {
            Some(r) => {
                dsp::append_interleaved_to_planar(&mixed, &mut self.stage_planar, self.out_channels);
                while let Some(block) = resample::try_process_exact(r, &mut self.stage_planar)? {
                    self.pending.extend(dsp::interleave(&block));
                }
            }
            None => self.pending.extend(mixed),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        self.finished = true;
        if let Some(r) = self.resampler.as_mut() {
            let tail = resample::flush(r, &mut self.stage_planar)?;
            self.pending.extend(dsp::interleave(&tail));
        }
        Ok(())
    }

    fn take_pending(&mut self) -> Option<AudioUnit> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        let pts = self.base_time
            + Duration::from_secs_f64(self.emitted_frames as f64 / self.out_rate as f64);
        self.emitted_frames += (samples.len() / self.out_channels) as u64;
        Some(AudioUnit { samples, pts })
    }
}

impl AudioDecoder for FileAudio {
    fn decode_audio(&mut self) -> Result<Option<AudioUnit>, DecodeError> {
        loop {
            if let Some(unit) = self.take_pending() {
                return Ok(Some(unit));
            }
            if self.finished {
                return Ok(None);
            }

            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finish()?;
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finish()?;
                    continue;
                }
                Err(e) => return Err(from_symphonia(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let in_ch = copy_decoded(&mut self.sample_buf, decoded);
                    self.absorb(in_ch)?;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(from_symphonia(e)),
            }
        }
    }

    fn seek_to(&mut self, target: Duration) -> Result<Duration, DecodeError> {
        let time = Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1_000_000_000f64);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(from_symphonia)?;

        self.decoder.reset();
        resample::reset(self.resampler.as_mut(), &mut self.stage_planar);
        self.pending.clear();
        self.finished = false;
        self.skip_source_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.emitted_frames = 0;
        self.base_time = to_duration(self.time_base.calc_time(seeked.required_ts));
        Ok(self.base_time)
    }
}

/// Copy a decoded packet into the reusable interleaved buffer, growing it
/// when the packet does not fit. Returns the packet's channel count.
fn copy_decoded(sample_buf: &mut Option<SampleBuffer<f32>>, decoded: AudioBufferRef<'_>) -> usize {
    let spec = *decoded.spec();
    let channels = spec.channels.count();
    let needed = decoded.capacity() * channels;
    if sample_buf.as_ref().is_none_or(|buf| buf.capacity() < needed) {
        *sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    if let Some(buf) = sample_buf.as_mut() {
        buf.copy_interleaved_ref(decoded);
    }
    channels
}

fn to_duration(t: Time) -> Duration {
    Duration::from_secs(t.seconds) + Duration::from_secs_f64(t.frac)
}

fn from_symphonia(e: SymphoniaError) -> DecodeError {
    match e {
        SymphoniaError::IoError(e) => DecodeError::Io(e),
        SymphoniaError::Unsupported(what) => DecodeError::Unsupported(what.to_string()),
        other => DecodeError::Corrupt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails_to_open() {
        let src = FileSource::new("/definitely/not/here.wav");
        let err = src.open(&AudioParams::default()).err().unwrap();
        assert!(matches!(err, PipelineError::Open { .. }));
        assert!(err.to_string().contains("not/here.wav"));
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"this is not a riff header").unwrap();
        assert!(matches!(
            FileSource::new(&path).open(&AudioParams::default()),
            Err(PipelineError::Open { .. })
        ));
    }
}
