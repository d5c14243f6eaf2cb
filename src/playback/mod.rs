// src/playback/mod.rs

//! The playback coordinator: consumer-facing facade over the decode workers.
//!
//! All methods are meant to be called from one thread, normally the render
//! loop. The only state shared with another thread is the audio feed, which
//! the engine callback reads under `try_lock`.

pub mod audio_feed;
pub mod clock;

pub use audio_feed::CoordinatorAudioSource;
pub use clock::PresentationClock;

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use audio_feed::AudioFeed;
use crate::config::PipelineConfig;
use crate::decoder::{
    dsp, worker, AudioDecoder, Bitmap, Command, FramePool, MediaSource, Message, PixelFormat,
    StreamInfo, VideoDecoder, VideoFrame,
};
use crate::engine::{AudioEngine, SourceId};
use crate::error::{DecodeErrorKind, PipelineError, Result};
use crate::queue::{self, QueueReceiver, QueueSender, TryPushError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    Closed,
    Opened,
    Decoding,
}

impl DecoderState {
    pub fn name(self) -> &'static str {
        match self {
            DecoderState::Closed => "closed",
            DecoderState::Opened => "opened",
            DecoderState::Decoding => "decoding",
        }
    }
}

/// Which frame the caller wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeWanted {
    /// The frame due at this media time.
    At(Duration),
    /// The next frame in the stream, whatever its time. Blocks until one is
    /// decoded. For batch work that is not paced by a clock.
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameAvailable {
    NewFrame { pts: Duration },
    UseLastFrame,
    StillDecoding,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSelect {
    Video,
    Audio,
    All,
}

struct VideoChannel {
    commands: QueueSender<Command>,
    messages: QueueReceiver<Message>,
    thread: Option<JoinHandle<()>>,
    eof: bool,
    error: Option<DecodeErrorKind>,
    last_frame_time: Option<Duration>,
}

struct AudioChannel {
    commands: QueueSender<Command>,
    feed: Arc<Mutex<AudioFeed>>,
    thread: Option<JoinHandle<()>>,
}

/// Decoders waiting between `open` and `start_decoding`.
struct PendingDecoders {
    video: Option<Box<dyn VideoDecoder>>,
    audio: Option<Box<dyn AudioDecoder>>,
}

pub struct PlaybackCoordinator {
    config: PipelineConfig,
    state: DecoderState,
    name: String,
    info: Option<StreamInfo>,
    pending: Option<PendingDecoders>,
    video: Option<VideoChannel>,
    audio: Option<AudioChannel>,
    clock: PresentationClock,
    /// Media time the clock must show on the next render tick.
    anchor: Option<Duration>,
    cur_video_time: Duration,
    engine: Option<(AudioEngine, SourceId)>,
}

impl PlaybackCoordinator {
    pub fn new(config: PipelineConfig) -> Self {
        let clock = PresentationClock::new(config.sync, Duration::ZERO);
        Self {
            config,
            state: DecoderState::Closed,
            name: String::new(),
            info: None,
            pending: None,
            video: None,
            audio: None,
            clock,
            anchor: None,
            cur_video_time: Duration::ZERO,
            engine: None,
        }
    }

    fn expect_state(&self, op: &'static str, wanted: DecoderState) -> Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                op,
                state: self.state.name(),
            })
        }
    }

    /// Open `source` on the calling thread. No worker runs yet.
    pub fn open(&mut self, source: &dyn MediaSource) -> Result<StreamInfo> {
        self.expect_state("open", DecoderState::Closed)?;

        let opened = source.open(&self.config.audio)?;
        let info = opened.info;
        if !info.has_video && !info.has_audio {
            return Err(PipelineError::NoStreams(source.describe()));
        }

        info!(
            "opened {}: video={} audio={} fps={} duration={:?}",
            source.describe(),
            info.has_video,
            info.has_audio,
            info.fps,
            info.duration
        );

        self.clock = PresentationClock::new(self.config.sync, info.frame_period());
        self.name = source.describe();
        self.pending = Some(PendingDecoders {
            video: opened.video,
            audio: opened.audio,
        });
        self.info = Some(info.clone());
        self.cur_video_time = Duration::ZERO;
        self.state = DecoderState::Opened;
        Ok(info)
    }

    /// Spawn the worker threads.
    pub fn start_decoding(&mut self) -> Result<()> {
        self.expect_state("start decoding", DecoderState::Opened)?;
        let Some(info) = self.info.clone() else {
            return Err(PipelineError::InvalidState {
                op: "start decoding",
                state: "missing stream info",
            });
        };
        let pending = self.pending.take().unwrap_or(PendingDecoders {
            video: None,
            audio: None,
        });

        if let Some(decoder) = pending.video {
            let capacity = self.config.video_queue_len.max(1);
            let (cmd_tx, cmd_rx) = queue::bounded(capacity * 2 + 4);
            let (msg_tx, msg_rx) = queue::bounded(capacity);
            let format = info.pixel_format.unwrap_or(PixelFormat::Rgba);
            let pool = FramePool::new(info.size.0, info.size.1, format);
            let thread = worker::spawn_video_worker(decoder, pool, cmd_rx, msg_tx)?;
            self.video = Some(VideoChannel {
                commands: cmd_tx,
                messages: msg_rx,
                thread: Some(thread),
                eof: false,
                error: None,
                last_frame_time: None,
            });
        }

        if let Some(decoder) = pending.audio {
            let params = info.audio.unwrap_or(self.config.audio);
            let (cmd_tx, cmd_rx) = queue::bounded(8);
            let (msg_tx, msg_rx) = queue::bounded(self.config.audio_queue_len.max(1));
            let thread = worker::spawn_audio_worker(decoder, cmd_rx, msg_tx)?;
            let fade = dsp::fade_samples_ms(params.sample_rate, self.config.post_seek_fade_ms);
            let feed = AudioFeed::new(msg_rx, params.channels, params.sample_rate, fade);
            self.audio = Some(AudioChannel {
                commands: cmd_tx,
                feed: Arc::new(Mutex::new(feed)),
                thread: Some(thread),
            });
        }

        self.anchor = Some(Duration::ZERO);
        self.state = DecoderState::Decoding;
        debug!("{}: decoding started", self.name);
        Ok(())
    }

    /// Deliver the frame due at `wanted` into `dst`, one bitmap per plane.
    pub fn render_to_bmps(&mut self, wanted: TimeWanted, dst: &mut [Bitmap]) -> FrameAvailable {
        let (result, frame) = self.frame_for_time(wanted);
        if let Some(frame) = frame {
            for (d, s) in dst.iter_mut().zip(frame.planes()) {
                d.copy_pixels(s);
            }
            self.return_frame(frame);
        }
        result
    }

    /// Advance to `wanted` like `render_to_bmps` without copying anything.
    /// Keeps an invisible consumer in sync.
    pub fn throw_away_frame(&mut self, wanted: Duration) -> FrameAvailable {
        let (result, frame) = self.frame_for_time(TimeWanted::At(wanted));
        if let Some(frame) = frame {
            self.return_frame(frame);
        }
        result
    }

    fn frame_for_time(&mut self, wanted: TimeWanted) -> (FrameAvailable, Option<VideoFrame>) {
        if self.state != DecoderState::Decoding {
            return (FrameAvailable::Closed, None);
        }
        let period = self.clock.frame_period().as_nanos() as i128;
        let Some(video) = self.video.as_mut() else {
            return (FrameAvailable::Closed, None);
        };

        let frame = match wanted {
            // The worker sends EndOfStream once and then idles, so a blocking
            // pop past the end would never return.
            TimeWanted::Always if video.eof => return (FrameAvailable::UseLastFrame, None),
            TimeWanted::Always => match video.next_frame(true) {
                Some(frame) => frame,
                None => return (FrameAvailable::UseLastFrame, None),
            },
            TimeWanted::At(t) => {
                let t = t.as_nanos() as i128;
                if let Some(last) = video.last_frame_time {
                    let last = last.as_nanos() as i128;
                    // Still current, or the stream is already ahead of the clock.
                    if 2 * (t - last).abs() < period || last > t + period {
                        return (FrameAvailable::UseLastFrame, None);
                    }
                }
                if video.eof {
                    return (FrameAvailable::UseLastFrame, None);
                }
                loop {
                    match video.next_frame(false) {
                        Some(frame) => {
                            let pts = frame.pts().as_nanos() as i128;
                            if 2 * (pts - t) < -period {
                                video.give_back(frame);
                                continue;
                            }
                            break frame;
                        }
                        None if video.eof => return (FrameAvailable::UseLastFrame, None),
                        None => return (FrameAvailable::StillDecoding, None),
                    }
                }
            }
        };

        video.last_frame_time = Some(frame.pts());
        self.cur_video_time = frame.pts();
        (FrameAvailable::NewFrame { pts: frame.pts() }, Some(frame))
    }

    fn return_frame(&mut self, frame: VideoFrame) {
        if let Some(video) = self.video.as_mut() {
            video.give_back(frame);
        }
    }

    /// Fill `out` (interleaved, engine format) from the audio stream and
    /// return the number of frames written.
    ///
    /// Blocks until the request is met. Comes back short only once end of
    /// stream is confirmed; the unfilled tail is zeroed.
    pub fn fill_audio_buffer(&mut self, out: &mut [f32]) -> usize {
        match (&self.state, &self.audio) {
            (DecoderState::Decoding, Some(audio)) => audio_feed::lock(&audio.feed).fill(out, true),
            _ => {
                out.fill(0.0);
                0
            }
        }
    }

    /// Jump to `target`, clamped to the stream duration. Returns once both
    /// streams have confirmed the seek and all stale data has been dropped.
    pub fn seek(&mut self, target: Duration) -> Result<()> {
        self.expect_state("seek", DecoderState::Decoding)?;
        let duration = self.info.as_ref().map_or(Duration::ZERO, |i| i.duration);
        let target = if duration.is_zero() {
            target
        } else {
            target.min(duration)
        };

        // Holding the feed keeps the engine callback out for the whole barrier.
        let mut feed = self.audio.as_ref().map(|a| audio_feed::lock(&a.feed));

        // Both workers get the command before any failure is reported, and
        // every worker that took it is drained, so no stale SeekDone is left
        // queued for the next barrier.
        let video_sent = self
            .video
            .as_ref()
            .map(|v| v.commands.push(Command::Seek(target)));
        let audio_sent = self
            .audio
            .as_ref()
            .map(|a| a.commands.push(Command::Seek(target)));

        let mut video_time = None;
        if let (Some(video), Some(Ok(()))) = (self.video.as_mut(), &video_sent) {
            loop {
                match video.messages.pop(true) {
                    Ok(Some(Message::Frame(frame))) => video.give_back(frame),
                    Ok(Some(Message::SeekDone { video_time: t, .. })) => {
                        video.eof = false;
                        video.error = None;
                        video_time = t;
                        break;
                    }
                    Ok(Some(_)) | Ok(None) => {}
                    Err(_) => {
                        warn!("{}: video worker gone during seek", self.name);
                        video.eof = true;
                        break;
                    }
                }
            }
            video.last_frame_time = None;
        }

        let mut audio_time = None;
        if let (Some(feed), Some(Ok(()))) = (feed.as_mut(), &audio_sent) {
            let mut confirmed = false;
            loop {
                match feed.messages().pop(true) {
                    Ok(Some(Message::SeekDone { audio_time: t, .. })) => {
                        audio_time = t;
                        confirmed = true;
                        break;
                    }
                    Ok(Some(_)) | Ok(None) => {}
                    Err(_) => break,
                }
            }
            if confirmed {
                feed.restart_at(audio_time.unwrap_or(target));
            } else {
                warn!("{}: audio worker gone during seek", self.name);
                feed.mark_worker_gone();
            }
        }
        drop(feed);

        let landed = video_time.or(audio_time).unwrap_or(target);
        self.cur_video_time = video_time.unwrap_or(target);
        self.anchor = Some(landed);
        debug!(
            "{}: seek to {:?} landed video={:?} audio={:?}",
            self.name, target, video_time, audio_time
        );

        if let Some(Err(e)) = video_sent {
            if let Some(video) = self.video.as_mut() {
                video.eof = true;
            }
            return Err(e);
        }
        if let Some(Err(e)) = audio_sent {
            if let Some(audio) = &self.audio {
                audio_feed::lock(&audio.feed).mark_worker_gone();
            }
            return Err(e);
        }

        if let Some((engine, id)) = &self.engine {
            engine.notify_seek(*id)?;
        }
        Ok(())
    }

    /// Restart from the beginning, clearing end of stream.
    pub fn loop_playback(&mut self) -> Result<()> {
        self.seek(Duration::ZERO)
    }

    pub fn is_eof(&self, stream: StreamSelect) -> bool {
        match stream {
            StreamSelect::Video => self.video.as_ref().map_or(!self.has(|i| i.has_video), |v| v.eof),
            StreamSelect::Audio => self
                .audio
                .as_ref()
                .map_or(!self.has(|i| i.has_audio), |a| audio_feed::lock(&a.feed).is_eof()),
            StreamSelect::All => self.is_eof(StreamSelect::Video) && self.is_eof(StreamSelect::Audio),
        }
    }

    fn has(&self, f: impl Fn(&StreamInfo) -> bool) -> bool {
        self.info.as_ref().is_some_and(f)
    }

    /// The decode failure that ended `stream`, if any.
    pub fn stream_error(&self, stream: StreamSelect) -> Option<DecodeErrorKind> {
        match stream {
            StreamSelect::Video => self.video.as_ref().and_then(|v| v.error),
            StreamSelect::Audio => self
                .audio
                .as_ref()
                .and_then(|a| audio_feed::lock(&a.feed).error()),
            StreamSelect::All => self
                .stream_error(StreamSelect::Video)
                .or_else(|| self.stream_error(StreamSelect::Audio)),
        }
    }

    /// Media time of the last delivered frame, or of the audio stream for
    /// audio-only media.
    pub fn cur_time(&self) -> Duration {
        match &self.audio {
            Some(audio) if !self.has(|i| i.has_video) => audio_feed::lock(&audio.feed).cur_time(),
            _ => self.cur_video_time,
        }
    }

    pub fn num_frames_queued(&self) -> usize {
        self.video.as_ref().map_or(0, |v| v.messages.len())
    }

    pub fn cur_frame(&self) -> usize {
        let fps = self.info.as_ref().map_or(0.0, |i| i.fps);
        (self.cur_video_time.as_secs_f64() * fps + 0.5) as usize
    }

    pub fn num_frames(&self) -> usize {
        self.info.as_ref().map_or(0, StreamInfo::num_frames)
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn clock(&self) -> &PresentationClock {
        &self.clock
    }

    /// Change the video frame rate. Ignored for media with audio, whose rate
    /// is fixed by the sound card.
    pub fn set_fps(&mut self, fps: f64) -> Result<()> {
        if self.state == DecoderState::Closed {
            return Err(PipelineError::InvalidState {
                op: "set fps",
                state: self.state.name(),
            });
        }
        if self.has(|i| i.has_audio) {
            warn!("{}: ignoring set_fps({fps}) on media with audio", self.name);
            return Ok(());
        }
        if fps <= 0.0 {
            warn!("{}: ignoring invalid fps {fps}", self.name);
            return Ok(());
        }

        if let Some(info) = self.info.as_mut() {
            info.fps = fps;
        }
        self.clock
            .set_frame_period(Duration::from_secs_f64(1.0 / fps));
        if let Some(pending) = self.pending.as_mut() {
            if let Some(video) = pending.video.as_mut() {
                video.set_fps(fps);
            }
        }
        if let Some(video) = &self.video {
            video.commands.push(Command::SetFps(fps))?;
        }
        Ok(())
    }

    fn apply_anchor(&mut self, frame_time: Duration) {
        if let Some(media_time) = self.anchor.take() {
            self.clock.reset(frame_time, media_time);
        }
    }

    pub fn pause(&mut self, frame_time: Duration) {
        self.apply_anchor(frame_time);
        self.clock.pause(frame_time);
        if let Some(audio) = &self.audio {
            audio_feed::lock(&audio.feed).set_paused(true);
        }
    }

    pub fn play(&mut self, frame_time: Duration) {
        self.apply_anchor(frame_time);
        self.clock.play(frame_time);
        if let Some(audio) = &self.audio {
            audio_feed::lock(&audio.feed).set_paused(false);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// One render tick: pick the due frame for `frame_time` and feed the
    /// result back into the clock.
    ///
    /// While the audio stream is playing through an engine, video follows
    /// the audio position instead of the clock.
    pub fn render_frame(&mut self, frame_time: Duration, dst: &mut [Bitmap]) -> FrameAvailable {
        self.apply_anchor(frame_time);

        let audio_master = match (&self.engine, &self.audio) {
            (Some(_), Some(audio)) if !self.clock.is_paused() => {
                let feed = audio_feed::lock(&audio.feed);
                (!feed.is_eof()).then(|| feed.cur_time())
            }
            _ => None,
        };
        let wanted = audio_master.unwrap_or_else(|| self.clock.next_frame_time(frame_time));

        let result = self.render_to_bmps(TimeWanted::At(wanted), dst);
        self.clock.on_frame(result, wanted, frame_time);
        result
    }

    /// Register the audio stream with `engine` at `volume`. Returns `None`
    /// for media without audio.
    pub fn attach_to_engine(&mut self, engine: &AudioEngine, volume: f32) -> Result<Option<SourceId>> {
        self.expect_state("attach to engine", DecoderState::Decoding)?;
        let Some(audio) = &self.audio else {
            return Ok(None);
        };
        if let Some((_, id)) = &self.engine {
            return Ok(Some(*id));
        }
        let source = CoordinatorAudioSource::new(audio.feed.clone());
        let id = engine.add_source(Box::new(source), volume);
        self.engine = Some((engine.clone(), id));
        Ok(Some(id))
    }

    /// The engine registration made by `attach_to_engine`.
    pub fn engine_source(&self) -> Option<SourceId> {
        self.engine.as_ref().map(|(_, id)| *id)
    }

    /// Stop both workers and join them. Safe to call in any state.
    pub fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }

        if let Some((engine, id)) = self.engine.take() {
            if let Err(e) = engine.remove_source(id) {
                debug!("{}: {e}", self.name);
            }
        }

        if let Some(mut video) = self.video.take() {
            stop_worker(&video.commands, &video.messages);
            join_worker("video", video.thread.take());
        }
        if let Some(mut audio) = self.audio.take() {
            {
                let feed = audio_feed::lock(&audio.feed);
                stop_worker(&audio.commands, feed.messages());
            }
            join_worker("audio", audio.thread.take());
        }

        if self.clock.frames_too_late() > 0 {
            info!(
                "{}: {} of {} frames too late",
                self.name,
                self.clock.frames_too_late(),
                self.clock.frames_played()
            );
        }
        info!("{}: closed", self.name);

        self.pending = None;
        self.info = None;
        self.anchor = None;
        self.state = DecoderState::Closed;
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl VideoChannel {
    /// Next frame from the queue. Terminal messages set `eof` and yield
    /// `None`, as does an empty queue when not blocking.
    fn next_frame(&mut self, block: bool) -> Option<VideoFrame> {
        loop {
            match self.messages.pop(block) {
                Ok(Some(Message::Frame(frame))) => return Some(frame),
                Ok(Some(Message::EndOfStream)) => {
                    self.eof = true;
                    return None;
                }
                Ok(Some(Message::Error { kind })) => {
                    self.eof = true;
                    self.error = Some(kind);
                    return None;
                }
                Ok(Some(other)) => debug!("video: skipping {other:?}"),
                Ok(None) => return None,
                Err(_) => {
                    self.eof = true;
                    return None;
                }
            }
        }
    }

    fn give_back(&self, frame: VideoFrame) {
        match self.commands.try_push(Command::ReturnFrame(frame)) {
            Ok(()) => {}
            Err(TryPushError::Full(Command::ReturnFrame(frame))) => {
                debug!("command queue full, dropping frame {:?}", frame.handle());
            }
            Err(_) => {}
        }
    }
}

/// Ask a worker to stop, emptying its message queue so a worker blocked on
/// a full queue can see the command, then wait for it to hang up.
fn stop_worker(commands: &QueueSender<Command>, messages: &QueueReceiver<Message>) {
    let mut cmd = Command::Stop;
    loop {
        match commands.try_push(cmd) {
            Ok(()) => break,
            Err(TryPushError::Full(back)) => {
                cmd = back;
                if messages.pop(false).is_err() {
                    return;
                }
                std::thread::yield_now();
            }
            Err(TryPushError::Closed(_)) => return,
        }
    }
    while messages.pop(true).is_ok() {}
}

fn join_worker(name: &str, thread: Option<JoinHandle<()>>) {
    if let Some(thread) = thread {
        if thread.join().is_err() {
            warn!("{name} worker panicked");
        }
    }
}
