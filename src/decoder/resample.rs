// src/decoder/resample.rs

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::config::AudioParams;
use crate::decoder::dsp;
use crate::error::DecodeError;

/// Build a sinc resampler from `src_rate` into `out`'s rate and channel
/// count, or `None` when the rates already match.
pub fn build_resampler(
    src_rate: u32,
    out: &AudioParams,
) -> Result<Option<SincFixedIn<f32>>, DecodeError> {
    if src_rate == out.sample_rate {
        return Ok(None);
    }
    let quality = out.resample;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: quality.sinc_len,
        f_cutoff: calculate_cutoff(quality.sinc_len, window),
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: quality.oversampling_factor,
        window,
    };
    let ratio = out.sample_rate as f64 / src_rate as f64;
    SincFixedIn::<f32>::new(ratio, 2.0, params, quality.chunk_frames.max(1), out.channels)
        .map(Some)
        .map_err(|e| {
            DecodeError::Unsupported(format!("resampler {src_rate}->{}: {e}", out.sample_rate))
        })
}

/// Run one full input chunk through the resampler if enough is staged.
pub fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>, DecodeError> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    resampler
        .process(&in_block, None)
        .map(Some)
        .map_err(|e| DecodeError::Corrupt(format!("resample: {e}")))
}

/// Push whatever is still staged plus the filter tail. Called once at end of
/// input.
pub fn flush(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Vec<Vec<f32>>, DecodeError> {
    let map = |e: rubato::ResampleError| DecodeError::Corrupt(format!("resample flush: {e}"));

    let have = dsp::planar_len(stage_planar);
    let mut out = if have > 0 {
        let rest = dsp::take_from_planar(stage_planar, have);
        resampler.process_partial(Some(rest.as_slice()), None).map_err(map)?
    } else {
        vec![Vec::new(); stage_planar.len()]
    };

    let tail = resampler.process_partial::<Vec<f32>>(None, None).map_err(map)?;
    for (ch, t) in out.iter_mut().zip(tail) {
        ch.extend(t);
    }
    Ok(out)
}

/// Drop staged input and filter state, e.g. after a seek.
pub fn reset(resampler: Option<&mut SincFixedIn<f32>>, stage_planar: &mut [Vec<f32>]) {
    for ch in stage_planar.iter_mut() {
        ch.clear();
    }
    if let Some(r) = resampler {
        r.reset();
    }
}
