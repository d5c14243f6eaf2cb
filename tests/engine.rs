// tests/engine.rs

use std::thread;
use std::time::{Duration, Instant};

use avsync::decoder::ToneSpec;
use avsync::{AudioEngine, PipelineConfig, PlaybackCoordinator, TestPatternSource};

fn tone(amplitude: f32) -> ToneSpec {
    ToneSpec {
        freq_hz: 440.0,
        amplitude,
    }
}

fn started(source: TestPatternSource) -> PlaybackCoordinator {
    let mut coord = PlaybackCoordinator::new(PipelineConfig::default());
    coord.open(&source).unwrap();
    coord.start_decoding().unwrap();
    coord
}

/// Run callback-sized blocks until one carries signal.
fn mix_until_audible(engine: &AudioEngine, out: &mut [f32]) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        engine.mix_into(out, 2);
        if out.iter().any(|s| s.abs() > 0.01) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn attached_coordinator_plays_through_the_engine() {
    let engine = AudioEngine::new(&PipelineConfig::default());
    let mut coord = started(TestPatternSource::tone_only(Duration::from_secs(2), tone(0.5)));

    let id = coord.attach_to_engine(&engine, 1.0).unwrap().unwrap();
    assert_eq!(engine.sources(), vec![id]);
    assert_eq!(coord.engine_source(), Some(id));
    // Attaching twice keeps the first registration.
    assert_eq!(coord.attach_to_engine(&engine, 1.0).unwrap(), Some(id));

    let mut out = vec![0.0f32; 512 * 2];
    assert!(mix_until_audible(&engine, &mut out));
    let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak <= 0.5 + 1e-3, "peak {peak}");

    coord.close();
    assert!(engine.sources().is_empty());
}

#[test]
fn video_only_media_does_not_register() {
    let engine = AudioEngine::new(&PipelineConfig::default());
    let mut coord = started(TestPatternSource::new(Duration::from_secs(1), 25.0));
    assert_eq!(coord.attach_to_engine(&engine, 1.0).unwrap(), None);
    assert!(engine.sources().is_empty());
    coord.close();
}

#[test]
fn paused_coordinator_is_silent_in_the_mix() {
    let engine = AudioEngine::new(&PipelineConfig::default());
    let mut coord = started(
        TestPatternSource::new(Duration::from_secs(2), 25.0).with_tone(tone(0.5)),
    );
    coord.attach_to_engine(&engine, 1.0).unwrap();

    let mut out = vec![0.0f32; 512 * 2];
    assert!(mix_until_audible(&engine, &mut out));

    coord.pause(Duration::ZERO);
    // One block flushes the limiter's look-ahead.
    engine.mix_into(&mut out, 2);
    engine.mix_into(&mut out, 2);
    assert!(out.iter().all(|s| *s == 0.0));

    coord.play(Duration::from_millis(100));
    assert!(mix_until_audible(&engine, &mut out));
    coord.close();
}

#[test]
fn seek_while_attached_fades_back_in() {
    let engine = AudioEngine::new(&PipelineConfig::default());
    let mut coord = started(TestPatternSource::tone_only(Duration::from_secs(4), tone(0.5)));
    let id = coord.attach_to_engine(&engine, 0.5).unwrap().unwrap();

    let mut out = vec![0.0f32; 256 * 2];
    assert!(mix_until_audible(&engine, &mut out));

    coord.seek(Duration::from_secs(2)).unwrap();
    assert!(coord.cur_time().abs_diff(Duration::from_secs(2)) < Duration::from_millis(25));
    assert_eq!(engine.source_volume(id).unwrap(), 0.5);

    assert!(mix_until_audible(&engine, &mut out));
    coord.close();
    assert!(engine.remove_source(id).is_err());
}

#[test]
fn two_coordinators_share_one_engine() {
    let engine = AudioEngine::new(&PipelineConfig::default());
    let mut a = started(TestPatternSource::tone_only(Duration::from_secs(1), tone(0.4)));
    let mut b = started(TestPatternSource::tone_only(Duration::from_secs(1), tone(0.4)));
    let ida = a.attach_to_engine(&engine, 1.0).unwrap().unwrap();
    let idb = b.attach_to_engine(&engine, 0.5).unwrap().unwrap();
    assert_ne!(ida, idb);
    assert_eq!(engine.sources().len(), 2);

    a.close();
    assert_eq!(engine.sources(), vec![idb]);
    b.close();
    assert!(engine.sources().is_empty());
}
