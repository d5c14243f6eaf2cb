// tests/pipeline.rs

use std::thread;
use std::time::{Duration, Instant};

use avsync::decoder::{frame_index, ToneSpec};
use avsync::{
    Bitmap, DecodeErrorKind, FrameAvailable, PipelineConfig, PixelFormat, PlaybackCoordinator,
    StreamSelect, TestPatternSource, TimeWanted,
};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn tone() -> ToneSpec {
    ToneSpec {
        freq_hz: 440.0,
        amplitude: 0.25,
    }
}

fn started(source: TestPatternSource, config: PipelineConfig) -> PlaybackCoordinator {
    let mut coord = PlaybackCoordinator::new(config);
    coord.open(&source).unwrap();
    coord.start_decoding().unwrap();
    coord
}

fn planes() -> Vec<Bitmap> {
    PixelFormat::Rgba.alloc_planes(16, 16)
}

/// Like a render loop that waits out a slow decoder.
fn render_at(coord: &mut PlaybackCoordinator, t: Duration, dst: &mut [Bitmap]) -> FrameAvailable {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match coord.render_to_bmps(TimeWanted::At(t), dst) {
            FrameAvailable::StillDecoding if Instant::now() < deadline => thread::sleep(ms(1)),
            other => return other,
        }
    }
}

#[test]
fn plays_every_frame_of_a_ten_second_clip_then_ends() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(10), 25.0),
        PipelineConfig::default(),
    );
    let mut dst = planes();

    for i in 0..250u64 {
        let result = render_at(&mut coord, ms(i * 40), &mut dst);
        assert_eq!(result, FrameAvailable::NewFrame { pts: ms(i * 40) }, "tick {i}");
        assert_eq!(frame_index(&dst[0]), Some(i as u32));
    }

    let last = render_at(&mut coord, ms(10_020), &mut dst);
    assert_eq!(last, FrameAvailable::UseLastFrame);
    assert!(coord.is_eof(StreamSelect::Video));
    assert!(coord.is_eof(StreamSelect::All));
    assert_eq!(frame_index(&dst[0]), Some(249));
    coord.close();
}

#[test]
fn seek_mid_playback_delivers_the_target_frame() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(10), 25.0),
        PipelineConfig::default(),
    );
    let mut dst = planes();
    for i in 0..10u64 {
        render_at(&mut coord, ms(i * 40), &mut dst);
    }

    coord.seek(ms(5000)).unwrap();
    match render_at(&mut coord, ms(5000), &mut dst) {
        FrameAvailable::NewFrame { pts } => {
            assert!(pts >= ms(4980) && pts <= ms(5020), "landed at {pts:?}");
        }
        other => panic!("expected a new frame, got {other:?}"),
    }
    assert_eq!(frame_index(&dst[0]), Some(125));
    coord.close();
}

#[test]
fn seek_lands_within_one_frame_across_the_clip() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(10), 25.0).with_tone(tone()),
        PipelineConfig::default(),
    );
    let period = ms(40);
    for target in [0, 1234, 3333, 7001, 9999, 10_000] {
        coord.seek(ms(target)).unwrap();
        let now = coord.cur_time();
        let diff = now.abs_diff(ms(target));
        assert!(diff <= period, "seek {target} ms landed at {now:?}");
        assert!(!coord.is_eof(StreamSelect::Audio));
    }

    // Past the end clamps to the duration.
    coord.seek(Duration::from_secs(30)).unwrap();
    assert!(coord.cur_time().abs_diff(Duration::from_secs(10)) <= period);
    coord.close();
}

#[test]
fn timestamps_never_go_backwards_between_seeks() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(2), 30.0),
        PipelineConfig::default(),
    );
    let mut dst = planes();
    let mut last = None;
    let mut frame_time = Duration::from_secs(1);
    for _ in 0..150 {
        if let FrameAvailable::NewFrame { pts } = coord.render_frame(frame_time, &mut dst) {
            if let Some(prev) = last {
                assert!(pts >= prev, "{pts:?} after {prev:?}");
            }
            last = Some(pts);
        }
        frame_time += ms(16);
        thread::sleep(ms(1));
    }
    assert!(last.is_some());
    coord.close();
}

#[test]
fn audio_fill_is_only_short_at_end_of_stream() {
    let mut coord = started(
        TestPatternSource::tone_only(Duration::from_secs(1), tone()),
        PipelineConfig::default(),
    );
    let mut buf = vec![0.0f32; 1024 * 2];
    let mut total = 0;
    loop {
        let frames = coord.fill_audio_buffer(&mut buf);
        total += frames;
        if frames < 1024 {
            assert!(coord.is_eof(StreamSelect::Audio));
            break;
        }
        assert!(!coord.is_eof(StreamSelect::Audio));
    }
    assert_eq!(total, 48_000);
    assert_eq!(coord.fill_audio_buffer(&mut buf), 0);
    assert!(buf.iter().all(|s| *s == 0.0));
    coord.close();
}

#[test]
fn short_audio_stream_fills_what_exists() {
    // 600 frames at 48 kHz.
    let mut coord = started(
        TestPatternSource::tone_only(Duration::from_micros(12_500), tone()),
        PipelineConfig::default(),
    );
    let mut buf = vec![1.0f32; 1024 * 2];
    assert_eq!(coord.fill_audio_buffer(&mut buf), 600);
    assert!(buf[600 * 2..].iter().all(|s| *s == 0.0));
    coord.close();
}

#[test]
fn close_unblocks_workers_stuck_on_full_queues() {
    let mut config = PipelineConfig::default();
    config.video_queue_len = 2;
    config.audio_queue_len = 1;
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(60), 25.0).with_tone(tone()),
        config,
    );
    thread::sleep(ms(50));
    assert_eq!(coord.num_frames_queued(), 2);

    let begin = Instant::now();
    coord.close();
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert_eq!(
        coord.render_to_bmps(TimeWanted::Always, &mut planes()),
        FrameAvailable::Closed
    );
}

#[test]
fn decode_error_freezes_on_last_good_frame() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(1), 25.0).fail_video_at(5),
        PipelineConfig::default(),
    );
    let mut dst = planes();
    let mut seen = Vec::new();
    while let FrameAvailable::NewFrame { .. } = coord.render_to_bmps(TimeWanted::Always, &mut dst) {
        seen.push(frame_index(&dst[0]).unwrap());
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert!(coord.is_eof(StreamSelect::Video));
    assert_eq!(
        coord.stream_error(StreamSelect::Video),
        Some(DecodeErrorKind::Corrupt)
    );
    assert_eq!(frame_index(&dst[0]), Some(4));

    // Seeking clears the failure and playback resumes before the bad frame.
    coord.seek(ms(40)).unwrap();
    assert!(!coord.is_eof(StreamSelect::Video));
    assert_eq!(coord.stream_error(StreamSelect::Video), None);
    assert_eq!(
        coord.render_to_bmps(TimeWanted::Always, &mut dst),
        FrameAvailable::NewFrame { pts: ms(40) }
    );
    coord.close();
}

#[test]
fn audio_decode_error_is_end_of_stream() {
    let mut coord = started(
        TestPatternSource::tone_only(Duration::from_secs(1), tone()).fail_audio_at(2),
        PipelineConfig::default(),
    );
    let mut buf = vec![0.0f32; 4096 * 2];
    assert_eq!(coord.fill_audio_buffer(&mut buf), 2048);
    assert!(coord.is_eof(StreamSelect::Audio));
    assert_eq!(
        coord.stream_error(StreamSelect::All),
        Some(DecodeErrorKind::Corrupt)
    );
    coord.close();
}

#[test]
fn loop_restarts_from_the_first_frame() {
    let mut coord = started(
        TestPatternSource::new(ms(400), 25.0),
        PipelineConfig::default(),
    );
    let mut dst = planes();
    while let FrameAvailable::NewFrame { .. } = coord.render_to_bmps(TimeWanted::Always, &mut dst) {}
    assert!(coord.is_eof(StreamSelect::All));

    coord.loop_playback().unwrap();
    assert!(!coord.is_eof(StreamSelect::Video));
    assert_eq!(coord.cur_time(), Duration::ZERO);
    assert_eq!(
        render_at(&mut coord, Duration::ZERO, &mut dst),
        FrameAvailable::NewFrame { pts: Duration::ZERO }
    );
    assert_eq!(frame_index(&dst[0]), Some(0));
    coord.close();
}

#[test]
fn yuv_frames_arrive_in_three_planes() {
    let source = TestPatternSource::new(ms(200), 25.0)
        .with_size(8, 6)
        .with_pixel_format(PixelFormat::Yuv420p);
    let mut coord = started(source, PipelineConfig::default());
    let mut dst = PixelFormat::Yuv420p.alloc_planes(8, 6);
    assert_eq!(dst.len(), 3);

    assert_eq!(
        render_at(&mut coord, ms(80), &mut dst),
        FrameAvailable::NewFrame { pts: ms(80) }
    );
    assert_eq!(frame_index(&dst[0]), Some(2));
    assert!(dst[1].pixels.iter().all(|p| *p == 2));
    coord.close();
}

#[test]
fn throw_away_keeps_an_invisible_consumer_in_step() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(1), 25.0),
        PipelineConfig::default(),
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while coord.throw_away_frame(ms(400)) == FrameAvailable::StillDecoding {
        assert!(Instant::now() < deadline);
        thread::sleep(ms(1));
    }
    assert_eq!(coord.cur_frame(), 10);
    assert_eq!(coord.cur_time(), ms(400));

    let mut dst = planes();
    assert_eq!(
        render_at(&mut coord, ms(440), &mut dst),
        FrameAvailable::NewFrame { pts: ms(440) }
    );
    coord.close();
}

#[test]
fn always_after_end_of_stream_returns_immediately() {
    let mut coord = started(
        TestPatternSource::new(ms(200), 25.0),
        PipelineConfig::default(),
    );
    let mut dst = planes();
    let mut count = 0;
    while let FrameAvailable::NewFrame { .. } = coord.render_to_bmps(TimeWanted::Always, &mut dst) {
        count += 1;
    }
    assert_eq!(count, 5);

    // The worker is idle now; a second pass must not wait on it.
    for _ in 0..2 {
        assert_eq!(
            coord.render_to_bmps(TimeWanted::Always, &mut dst),
            FrameAvailable::UseLastFrame
        );
    }
    assert_eq!(frame_index(&dst[0]), Some(4));
    coord.close();
}

#[test]
fn lagging_decoder_holds_the_clock_until_a_frame_arrives() {
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(2), 25.0).with_decode_delay(ms(200)),
        PipelineConfig::default(),
    );
    let mut dst = planes();

    // Every tick lands long before the first decoded frame.
    let mut frame_time = Duration::ZERO;
    let mut held = Vec::new();
    for _ in 0..10 {
        assert_eq!(
            coord.render_frame(frame_time, &mut dst),
            FrameAvailable::StillDecoding
        );
        held.push(coord.clock().pause_accumulated());
        frame_time += ms(40);
    }
    assert_eq!(held[1], Duration::ZERO);
    assert!(held[2] > Duration::ZERO);
    assert!(held[9] > held[5]);
    // Media time stands still while the decoder is behind.
    assert_eq!(coord.clock().next_frame_time(frame_time), ms(80));

    let deadline = Instant::now() + Duration::from_secs(5);
    let pts = loop {
        assert!(Instant::now() < deadline, "no frame ever arrived");
        if let FrameAvailable::NewFrame { pts } = coord.render_frame(frame_time, &mut dst) {
            break pts;
        }
        frame_time += ms(40);
        thread::sleep(ms(20));
    };
    assert!(pts >= ms(80), "delivered {pts:?}");

    // A delivered frame ends the catch-up run.
    let settled = coord.clock().pause_accumulated();
    for _ in 0..2 {
        frame_time += ms(40);
        coord.render_frame(frame_time, &mut dst);
        assert_eq!(coord.clock().pause_accumulated(), settled);
    }
    coord.close();
}
