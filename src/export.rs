// src/export.rs

//! Offline rendering: no device, no clock. The coordinator is drained as
//! fast as the workers decode.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;
use std::path::Path;

use crate::decoder::Bitmap;
use crate::playback::{FrameAvailable, PlaybackCoordinator, StreamSelect, TimeWanted};

const EXPORT_BLOCK_FRAMES: usize = 4096;

/// Write the coordinator's audio stream to a 16-bit WAV at `path` and return
/// the number of frames written. Runs until the stream ends.
pub fn export_audio(coord: &mut PlaybackCoordinator, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let params = coord
        .stream_info()
        .and_then(|info| info.audio)
        .context("stream has no audio to export")?;

    let spec = WavSpec {
        channels: params.channels as u16,
        sample_rate: params.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut block = vec![0.0f32; EXPORT_BLOCK_FRAMES * params.channels];
    let mut total = 0;
    loop {
        let frames = coord.fill_audio_buffer(&mut block);
        for s in &block[..frames * params.channels] {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        total += frames;
        if frames < EXPORT_BLOCK_FRAMES {
            break;
        }
    }
    writer.finalize()?;

    if let Some(kind) = coord.stream_error(StreamSelect::Audio) {
        info!("audio export stopped early: {kind:?}");
    }
    info!("exported {total} frames to {}", path.display());
    Ok(total)
}

/// Walk every remaining video frame in decode order and return how many
/// there were.
pub fn count_video_frames(coord: &mut PlaybackCoordinator) -> usize {
    let Some(info) = coord.stream_info() else {
        return 0;
    };
    let format = info.pixel_format.unwrap_or(crate::decoder::PixelFormat::Rgba);
    let mut planes: Vec<Bitmap> = format.alloc_planes(info.size.0, info.size.1);

    let mut count = 0;
    while let FrameAvailable::NewFrame { .. } = coord.render_to_bmps(TimeWanted::Always, &mut planes) {
        count += 1;
    }
    count
}
