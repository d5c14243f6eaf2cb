// src/main.rs

use anyhow::{bail, Context};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use avsync::audio::{self, OutputHandle, SilentOutput};
use avsync::decoder::{MediaSource, ToneSpec};
use avsync::{
    AudioEngine, FileSource, FrameAvailable, PipelineConfig, PixelFormat, PlaybackCoordinator,
    StreamSelect, TestPatternSource,
};

const SEEK_STEP: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "avsync-player", about = "Terminal media player for the avsync pipeline")]
struct Args {
    /// Media file to play.
    path: Option<PathBuf>,

    /// Play a synthetic clip with a 440 Hz tone instead of a file.
    #[arg(long)]
    test_pattern: bool,

    /// Test pattern length in seconds.
    #[arg(long, default_value_t = 10.0)]
    duration: f64,

    /// Test pattern frame rate.
    #[arg(long, default_value_t = 25.0)]
    fps: f64,

    /// Start over at end of stream.
    #[arg(long = "loop")]
    looping: bool,

    /// Pipeline settings as JSON.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn open_source(args: &Args) -> anyhow::Result<Box<dyn MediaSource>> {
    if args.test_pattern {
        let tone = ToneSpec {
            freq_hz: 440.0,
            amplitude: 0.2,
        };
        let source = TestPatternSource::new(Duration::from_secs_f64(args.duration), args.fps)
            .with_size(320, 240)
            .with_tone(tone);
        return Ok(Box::new(source));
    }
    match &args.path {
        Some(path) => Ok(Box::new(FileSource::new(path))),
        None => bail!("nothing to play: pass a file or --test-pattern"),
    }
}

/// Where the engine's mix goes.
enum Output {
    Device(OutputHandle),
    /// No usable device: the mix is pulled in real time and discarded.
    Silent(SilentOutput),
}

impl Output {
    fn engine(&self) -> &AudioEngine {
        match self {
            Output::Device(handle) => handle.engine(),
            Output::Silent(silent) => silent.engine(),
        }
    }

    fn pause(&mut self) -> anyhow::Result<()> {
        match self {
            Output::Device(handle) => handle.pause(),
            Output::Silent(silent) => {
                silent.pause();
                Ok(())
            }
        }
    }

    fn play(&mut self) -> anyhow::Result<()> {
        match self {
            Output::Device(handle) => handle.play(),
            Output::Silent(silent) => {
                silent.play();
                Ok(())
            }
        }
    }

    fn tick(&mut self, elapsed: Duration) {
        if let Output::Silent(silent) = self {
            silent.advance(elapsed);
        }
    }
}

/// Open the default device and an engine in its format. Without a usable
/// device playback continues silently.
fn start_audio(config: &mut PipelineConfig) -> Output {
    let device = match audio::setup_output_device() {
        Ok(device) => device,
        Err(e) => {
            warn!("no audio output: {e:#}");
            return Output::Silent(SilentOutput::new(&AudioEngine::new(config)));
        }
    };
    config.audio = device.engine_params(config.audio);
    let engine = AudioEngine::new(config);
    match audio::start_output(&device, &engine) {
        Ok(handle) => Output::Device(handle),
        Err(e) => {
            warn!("no audio output: {e:#}");
            Output::Silent(SilentOutput::new(&engine))
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_disk(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let mut output = start_audio(&mut config);

    let source = open_source(&args)?;
    let mut coord = PlaybackCoordinator::new(config.clone());
    let info = coord.open(source.as_ref())?;
    coord.start_decoding()?;
    coord.attach_to_engine(output.engine(), config.master_volume)?;

    let mut planes = info
        .pixel_format
        .unwrap_or(PixelFormat::Rgba)
        .alloc_planes(info.size.0, info.size.1);

    println!("[SPACE] Play/Pause | [←/→] Seek 5s | [L] Loop toggle | [Q] Quit");

    enable_raw_mode()?;
    let result = run(&mut coord, &mut planes, args.looping, &mut output);
    disable_raw_mode()?;
    coord.close();
    println!("\r\nExiting player.");
    result
}

fn run(
    coord: &mut PlaybackCoordinator,
    planes: &mut [avsync::Bitmap],
    mut looping: bool,
    output: &mut Output,
) -> anyhow::Result<()> {
    // 60 Hz render loop
    let target_frame_duration = Duration::from_micros(16_667);
    let start = Instant::now();
    let mut shown = 0u64;

    loop {
        if event::poll(target_frame_duration)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        break;
                    }
                    let now = start.elapsed();
                    match ev.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => break,
                        KeyCode::Char(' ') => {
                            if coord.is_paused() {
                                coord.play(now);
                                output.play()?;
                            } else {
                                coord.pause(now);
                                output.pause()?;
                            }
                        }
                        KeyCode::Left => coord.seek(coord.cur_time().saturating_sub(SEEK_STEP))?,
                        KeyCode::Right => coord.seek(coord.cur_time() + SEEK_STEP)?,
                        KeyCode::Char('l') | KeyCode::Char('L') => {
                            looping = !looping;
                            info!("looping {}", if looping { "on" } else { "off" });
                        }
                        _ => {}
                    }
                }
            }
        }

        let frame_time = start.elapsed();
        output.tick(frame_time);
        if let FrameAvailable::NewFrame { .. } = coord.render_frame(frame_time, planes) {
            shown += 1;
        }

        if coord.is_eof(StreamSelect::All) {
            if looping {
                coord.loop_playback()?;
            } else {
                break;
            }
        }

        print!(
            "\r{:>8.2}s  frame {:>5}/{:<5}  queued {:>2}  shown {:>6}{}",
            coord.cur_time().as_secs_f64(),
            coord.cur_frame(),
            coord.num_frames(),
            coord.num_frames_queued(),
            shown,
            if coord.is_paused() { "  [paused]" } else { "" }
        );
        std::io::stdout().flush()?;
    }
    Ok(())
}
