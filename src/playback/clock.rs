// src/playback/clock.rs

use log::debug;
use std::time::Duration;

use super::FrameAvailable;
use crate::config::SyncTuning;

fn nanos(d: Duration) -> i128 {
    d.as_nanos() as i128
}

fn duration(n: i128) -> Duration {
    Duration::from_nanos(n.clamp(0, u64::MAX as i128) as u64)
}

/// Maps render-loop time to media time.
///
/// `frame_time` is whatever monotonic time the render loop runs on, passed
/// in on every call so the clock never reads the wall clock itself.
#[derive(Debug, Clone)]
pub struct PresentationClock {
    tuning: SyncTuning,
    frame_period: i128,
    /// Render time at which media time zero would have been shown. May be
    /// negative after a seek forward.
    start_time: i128,
    pause_accumulated: i128,
    pause_start: Option<i128>,
    jitter: f64,
    last_delivered: Option<Duration>,
    late_in_row: u32,
    frames_played: u64,
    frames_too_late: u64,
}

impl PresentationClock {
    pub fn new(tuning: SyncTuning, frame_period: Duration) -> Self {
        Self {
            tuning,
            frame_period: nanos(frame_period),
            start_time: 0,
            pause_accumulated: 0,
            pause_start: None,
            jitter: 0.0,
            last_delivered: None,
            late_in_row: 0,
            frames_played: 0,
            frames_too_late: 0,
        }
    }

    /// Restart so that `frame_time` shows `media_time`. Pause state is kept.
    pub fn reset(&mut self, frame_time: Duration, media_time: Duration) {
        self.start_time = nanos(frame_time) - nanos(media_time);
        self.pause_accumulated = 0;
        if self.pause_start.is_some() {
            self.pause_start = Some(nanos(frame_time));
        }
        self.last_delivered = None;
        self.late_in_row = 0;
    }

    pub fn set_frame_period(&mut self, period: Duration) {
        self.frame_period = nanos(period);
    }

    pub fn frame_period(&self) -> Duration {
        duration(self.frame_period)
    }

    /// Media time whose frame should be on screen at `frame_time`.
    pub fn next_frame_time(&self, frame_time: Duration) -> Duration {
        let now = self.pause_start.unwrap_or_else(|| nanos(frame_time));
        let offset = (self.jitter * self.frame_period as f64).round() as i128;
        duration(now - self.start_time - self.pause_accumulated - offset)
    }

    pub fn pause(&mut self, frame_time: Duration) {
        if self.pause_start.is_none() {
            self.pause_start = Some(nanos(frame_time));
        }
    }

    pub fn play(&mut self, frame_time: Duration) {
        if let Some(start) = self.pause_start.take() {
            self.pause_accumulated += (nanos(frame_time) - start).max(0);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_start.is_some()
    }

    /// Feed back what the decoder delivered for `wanted` at `frame_time`.
    pub fn on_frame(&mut self, result: FrameAvailable, wanted: Duration, frame_time: Duration) {
        match result {
            FrameAvailable::NewFrame { pts } => {
                self.frames_played += 1;
                self.late_in_row = 0;
                self.last_delivered = Some(pts);

                let off = (nanos(pts) - nanos(wanted)).abs() as f64;
                if off > self.tuning.late_frame_threshold * self.frame_period as f64 {
                    self.jitter = (self.jitter + self.tuning.jitter_step) % 1.0;
                }
            }
            FrameAvailable::StillDecoding => {
                self.frames_played += 1;
                self.frames_too_late += 1;
                self.late_in_row += 1;
                if self.pause_start.is_none()
                    && self.late_in_row >= self.tuning.late_frames_before_catchup
                {
                    // Hold media time still until the decoder catches up.
                    self.pause_accumulated += self.frame_period;
                    let elapsed = nanos(frame_time) - self.start_time;
                    if self.pause_accumulated > elapsed {
                        self.pause_accumulated = elapsed.max(0);
                    }
                    debug!(
                        "decoder {} frames behind, holding clock at {:?}",
                        self.late_in_row,
                        self.next_frame_time(frame_time)
                    );
                }
            }
            FrameAvailable::UseLastFrame => self.late_in_row = 0,
            FrameAvailable::Closed => {}
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn pause_accumulated(&self) -> Duration {
        duration(self.pause_accumulated)
    }

    pub fn last_delivered(&self) -> Option<Duration> {
        self.last_delivered
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn frames_too_late(&self) -> u64 {
        self.frames_too_late
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn clock() -> PresentationClock {
        PresentationClock::new(SyncTuning::default(), ms(40))
    }

    #[test]
    fn follows_render_time_after_reset() {
        let mut c = clock();
        c.reset(ms(1000), ms(5000));
        assert_eq!(c.next_frame_time(ms(1000)), ms(5000));
        assert_eq!(c.next_frame_time(ms(1120)), ms(5120));
    }

    #[test]
    fn never_goes_negative() {
        let mut c = clock();
        c.reset(ms(500), Duration::ZERO);
        assert_eq!(c.next_frame_time(ms(100)), Duration::ZERO);
    }

    #[test]
    fn pause_freezes_and_play_resumes_where_it_left() {
        let mut c = clock();
        c.reset(Duration::ZERO, Duration::ZERO);
        c.pause(ms(200));
        assert_eq!(c.next_frame_time(ms(900)), ms(200));
        c.play(ms(1000));
        assert_eq!(c.pause_accumulated(), ms(800));
        assert_eq!(c.next_frame_time(ms(1040)), ms(240));
    }

    #[test]
    fn catch_up_starts_on_third_late_tick_and_stops_on_new_frame() {
        let mut c = clock();
        c.reset(Duration::ZERO, Duration::ZERO);
        let t = ms(1000);

        c.on_frame(FrameAvailable::StillDecoding, t, t);
        c.on_frame(FrameAvailable::StillDecoding, t, t);
        assert_eq!(c.pause_accumulated(), Duration::ZERO);
        c.on_frame(FrameAvailable::StillDecoding, t, t);
        assert_eq!(c.pause_accumulated(), ms(40));
        c.on_frame(FrameAvailable::StillDecoding, t, t);
        assert_eq!(c.pause_accumulated(), ms(80));

        c.on_frame(FrameAvailable::NewFrame { pts: ms(920) }, ms(920), t);
        c.on_frame(FrameAvailable::StillDecoding, t, t);
        assert_eq!(c.pause_accumulated(), ms(80));
        assert_eq!(c.frames_too_late(), 5);
        assert_eq!(c.frames_played(), 6);
    }

    #[test]
    fn catch_up_cannot_push_time_below_zero() {
        let mut c = clock();
        c.reset(Duration::ZERO, Duration::ZERO);
        for _ in 0..10 {
            c.on_frame(FrameAvailable::StillDecoding, ms(0), ms(50));
        }
        assert_eq!(c.pause_accumulated(), ms(50));
        assert_eq!(c.next_frame_time(ms(50)), Duration::ZERO);
    }

    #[test]
    fn off_center_frames_nudge_jitter_and_wrap() {
        let mut c = clock();
        // Within 40% of a period: untouched.
        c.on_frame(FrameAvailable::NewFrame { pts: ms(100) }, ms(115), ms(0));
        assert_eq!(c.jitter(), 0.0);

        for _ in 0..21 {
            c.on_frame(FrameAvailable::NewFrame { pts: ms(100) }, ms(120), ms(0));
            assert!((0.0..1.0).contains(&c.jitter()));
        }
        assert!((c.jitter() - 0.05).abs() < 1e-9, "wrapped, got {}", c.jitter());

        let mut c = clock();
        c.on_frame(FrameAvailable::NewFrame { pts: ms(0) }, ms(20), ms(0));
        assert!((c.jitter() - 0.05).abs() < 1e-12);
        // 0.05 of 40 ms shifts sampling back by 2 ms.
        assert_eq!(c.next_frame_time(ms(1000)), ms(998));
    }
}
