// src/effects/limiter.rs

//! Look-ahead peak limiter for the master bus.
//!
//! Per frame: detect the channel peak (after pre-gain), optionally RMS-smooth
//! it, spread peaks above full scale over the look-ahead window, turn the
//! window's maximum into a gain, run it through an attack/release envelope
//! and two moving averages, then apply it to the input delayed by the
//! look-ahead length. Runs without allocating once constructed.

use ringbuf::storage::Heap;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::wrap::caching::Caching;
use ringbuf::{HeapRb, SharedRb};
use std::sync::Arc;

use crate::config::LimiterParams;

const LOOKAHEAD: usize = 64;
const AVG1: usize = 27;
const AVG2: usize = 38;

/// Running mean over the last `N` control values.
struct MovingAverage<const N: usize> {
    buf: [f64; N],
    idx: usize,
    sum: f64,
}

impl<const N: usize> MovingAverage<N> {
    fn new() -> Self {
        Self {
            buf: [0.0; N],
            idx: 0,
            sum: 0.0,
        }
    }

    /// Push `v` and return the running sum (not yet divided by `N`).
    #[inline]
    fn push(&mut self, v: f64) -> f64 {
        self.sum += v - self.buf[self.idx];
        self.buf[self.idx] = v;
        self.idx = (self.idx + 1) % N;
        self.sum
    }
}

fn time_coef(sample_rate: f64, secs: f32) -> f64 {
    if secs > 0.0 {
        0.001f64.powf(1.0 / (sample_rate * secs as f64))
    } else {
        0.0
    }
}

pub struct Limiter {
    channels: usize,
    sample_rate: f64,
    params: LimiterParams,

    pre_gain: f64,
    post_gain: f64,
    inverse_ratio: f64,
    rms_coef: f64,
    att_coef: f64,
    rel_coef: f64,

    rms1: f64,
    lookahead: [f64; LOOKAHEAD],
    lookahead_idx: usize,
    env: f64,
    avg1: MovingAverage<AVG1>,
    avg2: MovingAverage<AVG2>,

    delay_in: Caching<Arc<SharedRb<Heap<f32>>>, true, false>,
    delay_out: Caching<Arc<SharedRb<Heap<f32>>>, false, true>,
}

impl Limiter {
    pub fn new(sample_rate: u32, channels: usize, params: LimiterParams) -> Self {
        let channels = channels.max(1);
        let (mut delay_in, delay_out) = HeapRb::<f32>::new(LOOKAHEAD * channels).split();
        for _ in 0..LOOKAHEAD * channels {
            let _ = delay_in.try_push(0.0);
        }

        let mut limiter = Self {
            channels,
            sample_rate: sample_rate as f64,
            params,
            pre_gain: 1.0,
            post_gain: 1.0,
            inverse_ratio: 0.0,
            rms_coef: 0.0,
            att_coef: 0.0,
            rel_coef: 0.0,
            rms1: 0.0,
            lookahead: [1.0; LOOKAHEAD],
            lookahead_idx: 0,
            env: 0.0,
            avg1: MovingAverage::new(),
            avg2: MovingAverage::new(),
            delay_in,
            delay_out,
        };
        limiter.set_params(params);
        limiter
    }

    pub fn params(&self) -> LimiterParams {
        self.params
    }

    /// Change settings without resetting the signal state.
    pub fn set_params(&mut self, params: LimiterParams) {
        self.params = params;
        self.pre_gain = 10f64.powf(-params.threshold_db as f64 / 20.0);
        self.post_gain = 10f64.powf(params.makeup_gain_db as f64 / 20.0);
        self.inverse_ratio = params.ratio.map_or(0.0, |r| 1.0 / r as f64);
        self.rms_coef = time_coef(self.sample_rate, params.rms_secs);
        self.att_coef = time_coef(self.sample_rate, params.attack_secs);
        self.rel_coef = time_coef(self.sample_rate, params.release_secs);
    }

    /// Processing delay in frames.
    pub fn latency_frames(&self) -> usize {
        LOOKAHEAD
    }

    fn max_filter(&mut self, level: f64) {
        for slot in self.lookahead.iter_mut() {
            if *slot < level {
                *slot = level;
            }
        }
    }

    /// Limit one interleaved frame in place.
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        let peak = frame
            .iter()
            .map(|s| (*s as f64 * self.pre_gain).abs())
            .fold(0.0, f64::max);

        let ms = (1.0 - self.rms_coef) * peak * peak + self.rms_coef * self.rms1;
        self.rms1 = ms;
        let level = ms.sqrt();
        if level > 1.0 {
            self.max_filter(level);
        }

        // Gain that brings the window maximum down to the ratio curve.
        let max = self.lookahead[self.lookahead_idx];
        let mut c = 10f64.powf(max.log10() * self.inverse_ratio) / max;
        self.lookahead[self.lookahead_idx] = 1.0;
        self.lookahead_idx = (self.lookahead_idx + 1) % LOOKAHEAD;

        c = if self.env <= c {
            c + (self.env - c) * self.rel_coef
        } else {
            c + (self.env - c) * self.att_coef
        };
        self.env = c;

        let c = self.avg1.push(c) / AVG1 as f64;
        let c = self.avg2.push(c) / AVG2 as f64;
        let gain = (c * self.post_gain) as f32;

        for s in frame.iter_mut() {
            let delayed = self.delay_out.try_pop().unwrap_or(0.0);
            let _ = self.delay_in.try_push(*s);
            *s = delayed * gain;
        }
    }

    /// Limit an interleaved block in place.
    pub fn process(&mut self, block: &mut [f32]) {
        let channels = self.channels;
        for frame in block.chunks_exact_mut(channels) {
            self.process_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_constant(limiter: &mut Limiter, level: f32, frames: usize) -> Vec<f32> {
        let mut block = vec![level; frames * 2];
        limiter.process(&mut block);
        block
    }

    #[test]
    fn output_is_delayed_by_lookahead() {
        let mut lim = Limiter::new(48_000, 2, LimiterParams::default());
        let out = run_constant(&mut lim, 0.5, LOOKAHEAD);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn quiet_signal_passes_after_release() {
        let mut lim = Limiter::new(48_000, 2, LimiterParams::default());
        let out = run_constant(&mut lim, 0.5, 48_000);
        let last = out[out.len() - 1];
        assert!((last - 0.5).abs() < 1e-4, "got {last}");
    }

    #[test]
    fn brick_wall_holds_full_scale_across_a_step() {
        let mut lim = Limiter::new(48_000, 2, LimiterParams::default());
        run_constant(&mut lim, 0.5, 48_000);
        let out = run_constant(&mut lim, 1.5, 4_800);
        for s in &out {
            assert!(*s <= 1.0 + 1e-5, "overshoot {s}");
        }
        let last = out[out.len() - 1];
        assert!((last - 1.0).abs() < 1e-4, "got {last}");
    }

    #[test]
    fn threshold_and_makeup_shift_the_ceiling() {
        let params = LimiterParams {
            threshold_db: -6.0,
            makeup_gain_db: 6.0,
            ..LimiterParams::default()
        };
        let mut lim = Limiter::new(48_000, 1, params);
        let mut block = vec![0.9f32; 48_000];
        lim.process(&mut block);
        let last = block[block.len() - 1];
        // 0.9 is above -6 dBFS: limited to the threshold, then made up again.
        let expected = 10f32.powf(-6.0 / 20.0) * 10f32.powf(6.0 / 20.0);
        assert!((last - expected).abs() < 1e-3, "got {last}");
    }

    #[test]
    fn finite_ratio_only_compresses() {
        let params = LimiterParams {
            ratio: Some(2.0),
            ..LimiterParams::default()
        };
        let mut lim = Limiter::new(48_000, 1, params);
        let mut block = vec![2.0f32; 48_000];
        lim.process(&mut block);
        let last = block[block.len() - 1] as f64;
        // 2.0 (+6 dB) at 2:1 comes out at +3 dB.
        assert!((last - 2f64.sqrt()).abs() < 1e-3, "got {last}");
    }
}
