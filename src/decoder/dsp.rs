// src/decoder/dsp.rs

//! Small sample-shuffling helpers shared by the audio decoders and the
//! coordinator's audio feed.

pub fn append_interleaved_to_planar(
    interleaved: &[f32],
    planar: &mut [Vec<f32>],
    channels: usize,
) {
    for row in interleaved.chunks_exact(channels) {
        for (ch, &s) in row.iter().enumerate() {
            planar[ch].push(s);
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    planar
        .iter_mut()
        .map(|ch| {
            let n = frames.min(ch.len());
            let tail = ch.split_off(n);
            std::mem::replace(ch, tail)
        })
        .collect()
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    if channels == 0 {
        return Vec::new();
    }
    let frames = planar_len(planar);
    let mut out = vec![0.0f32; frames * channels];
    for (f, row) in out.chunks_exact_mut(channels).enumerate() {
        for (ch, s) in row.iter_mut().enumerate() {
            *s = planar[ch][f];
        }
    }
    out
}

/// Convert between channel counts. Mono is duplicated, stereo is averaged
/// down; other layouts fold neighbouring channels together or wrap around.
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, 2) => {
            for f in 0..frames {
                let m = input[f];
                out[f * 2] = m;
                out[f * 2 + 1] = m;
            }
        }
        (2, 1) => {
            for f in 0..frames {
                out[f] = 0.5 * (input[f * 2] + input[f * 2 + 1]);
            }
        }
        _ if out_ch < in_ch => {
            let factor = in_ch as f32 / out_ch as f32;
            for f in 0..frames {
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let span = &input[f * in_ch + start..f * in_ch + end];
                    out[f * out_ch + oc] = if span.is_empty() {
                        0.0
                    } else {
                        span.iter().sum::<f32>() / span.len() as f32
                    };
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc % in_ch];
                }
            }
        }
    }

    out
}

#[inline]
pub fn fade_samples_ms(sample_rate: u32, ms: u32) -> usize {
    ((sample_rate as u64 * ms as u64) / 1000) as usize
}

/// Apply a linear fade-in over `total_frames`, continuing from wherever the
/// previous call stopped. `remaining_frames` counts down to zero.
pub fn apply_fade_in(
    samples: &mut [f32],
    channels: usize,
    remaining_frames: &mut usize,
    total_frames: usize,
) {
    if *remaining_frames == 0 || total_frames == 0 || channels == 0 {
        return;
    }
    for row in samples.chunks_exact_mut(channels) {
        if *remaining_frames == 0 {
            break;
        }
        let gain = (total_frames - *remaining_frames) as f32 / total_frames as f32;
        for s in row {
            *s *= gain;
        }
        *remaining_frames -= 1;
    }
}

/// Scale and accumulate `src` into `dst`.
#[inline]
pub fn mix_add(dst: &mut [f32], src: &[f32], gain: f32) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s * gain;
    }
}
