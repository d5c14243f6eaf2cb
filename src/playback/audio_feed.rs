// src/playback/audio_feed.rs

//! Consumer end of the audio message queue.
//!
//! The feed sits behind a mutex shared by the coordinator (seek barrier,
//! blocking fills) and the engine callback (non-blocking fills). The
//! callback only ever uses `try_lock`, so a seek in progress costs it one
//! block of silence instead of a stall.

use log::{debug, warn};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use crate::decoder::dsp;
use crate::decoder::Message;
use crate::engine::AudioSource;
use crate::error::DecodeErrorKind;
use crate::queue::QueueReceiver;

pub(crate) struct AudioFeed {
    messages: QueueReceiver<Message>,
    channels: usize,
    sample_rate: u32,
    chunk: Vec<f32>,
    chunk_pts: Duration,
    pos: usize,
    eof: bool,
    error: Option<DecodeErrorKind>,
    paused: bool,
    fade_frames: usize,
    fade_remaining: usize,
}

impl AudioFeed {
    pub(crate) fn new(
        messages: QueueReceiver<Message>,
        channels: usize,
        sample_rate: u32,
        fade_frames: usize,
    ) -> Self {
        Self {
            messages,
            channels: channels.max(1),
            sample_rate,
            chunk: Vec::new(),
            chunk_pts: Duration::ZERO,
            pos: 0,
            eof: false,
            error: None,
            paused: false,
            fade_frames,
            fade_remaining: 0,
        }
    }

    pub(crate) fn messages(&self) -> &QueueReceiver<Message> {
        &self.messages
    }

    /// Copy queued samples into `out` and return the number of frames
    /// written. The rest of `out` is zeroed.
    ///
    /// A blocking fill only comes back short at confirmed end of stream. A
    /// non-blocking fill also comes back short when the decoder is behind.
    pub(crate) fn fill(&mut self, out: &mut [f32], block: bool) -> usize {
        let wanted = out.len() - out.len() % self.channels;
        let mut written = 0;

        while written < wanted {
            if self.pos < self.chunk.len() {
                let n = (self.chunk.len() - self.pos).min(wanted - written);
                out[written..written + n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                written += n;
                continue;
            }
            if self.eof {
                break;
            }
            match self.messages.pop(block) {
                Ok(Some(Message::Audio(unit))) => {
                    self.chunk = unit.samples;
                    self.chunk_pts = unit.pts;
                    self.pos = 0;
                }
                Ok(Some(Message::Error { kind })) => {
                    self.eof = true;
                    self.error = Some(kind);
                }
                Ok(Some(Message::EndOfStream)) => self.eof = true,
                Ok(Some(other)) => {
                    warn!("audio feed dropping unexpected {other:?}");
                }
                Ok(None) => break,
                // Worker gone without a terminal message.
                Err(_) => self.eof = true,
            }
        }

        dsp::apply_fade_in(
            &mut out[..written],
            self.channels,
            &mut self.fade_remaining,
            self.fade_frames,
        );
        out[written..].fill(0.0);
        written / self.channels
    }

    /// Media time of the next sample this feed will hand out.
    pub(crate) fn cur_time(&self) -> Duration {
        let frames = (self.pos / self.channels) as f64;
        self.chunk_pts + Duration::from_secs_f64(frames / self.sample_rate as f64)
    }

    /// Forget everything buffered and continue from `time`.
    pub(crate) fn restart_at(&mut self, time: Duration) {
        self.chunk.clear();
        self.pos = 0;
        self.chunk_pts = time;
        self.eof = false;
        self.error = None;
    }

    pub(crate) fn start_fade_in(&mut self) {
        self.fade_remaining = self.fade_frames;
    }

    /// The worker can no longer answer. Whatever is buffered is stale.
    pub(crate) fn mark_worker_gone(&mut self) {
        self.chunk.clear();
        self.pos = 0;
        self.eof = true;
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn error(&self) -> Option<DecodeErrorKind> {
        self.error
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

/// Lock the feed, recovering from a poisoned mutex.
pub(crate) fn lock(feed: &Mutex<AudioFeed>) -> std::sync::MutexGuard<'_, AudioFeed> {
    feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engine-side view of a coordinator's audio stream.
pub struct CoordinatorAudioSource {
    feed: Arc<Mutex<AudioFeed>>,
}

impl CoordinatorAudioSource {
    pub(crate) fn new(feed: Arc<Mutex<AudioFeed>>) -> Self {
        Self { feed }
    }
}

impl AudioSource for CoordinatorAudioSource {
    fn fill_audio_buffer(&mut self, out: &mut [f32]) -> usize {
        let mut feed = match self.feed.try_lock() {
            Ok(feed) => feed,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                // Coordinator is inside a seek barrier.
                out.fill(0.0);
                return 0;
            }
        };
        if feed.paused || feed.is_eof() && feed.pos >= feed.chunk.len() {
            out.fill(0.0);
            return 0;
        }
        feed.fill(out, false)
    }

    fn notify_seek(&mut self) {
        debug!("audio source fading in after seek");
        lock(&self.feed).start_fade_in();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::AudioUnit;
    use crate::queue::{self, QueueSender};
    use std::thread;

    fn unit(samples: Vec<f32>, ms: u64) -> Message {
        Message::Audio(AudioUnit {
            samples,
            pts: Duration::from_millis(ms),
        })
    }

    fn feed(capacity: usize) -> (QueueSender<Message>, AudioFeed) {
        let (tx, rx) = queue::bounded(capacity);
        (tx, AudioFeed::new(rx, 2, 1000, 0))
    }

    #[test]
    fn fills_across_chunk_boundaries_and_tracks_time() {
        let (tx, mut feed) = feed(4);
        tx.push(unit(vec![0.1; 6], 0)).unwrap();
        tx.push(unit(vec![0.2; 6], 3)).unwrap();

        let mut out = [9.0f32; 8];
        assert_eq!(feed.fill(&mut out, false), 4);
        assert_eq!(out, [0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.2, 0.2]);
        assert_eq!(feed.cur_time(), Duration::from_millis(4));
    }

    #[test]
    fn non_blocking_fill_pads_with_silence_when_behind() {
        let (tx, mut feed) = feed(4);
        tx.push(unit(vec![0.5; 4], 0)).unwrap();
        let mut out = [9.0f32; 8];
        assert_eq!(feed.fill(&mut out, false), 2);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert!(!feed.is_eof());
    }

    #[test]
    fn blocking_fill_waits_for_end_of_stream_before_short_filling() {
        let (tx, mut feed) = feed(4);
        tx.push(unit(vec![0.5; 2 * 600], 0)).unwrap();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.push(Message::EndOfStream).unwrap();
        });

        let mut out = vec![0.0f32; 2 * 1024];
        let frames = feed.fill(&mut out, true);
        producer.join().unwrap();
        assert_eq!(frames, 600);
        assert!(feed.is_eof());
    }

    #[test]
    fn error_message_ends_stream_and_is_recorded() {
        let (tx, mut feed) = feed(4);
        tx.push(Message::Error {
            kind: DecodeErrorKind::Corrupt,
        })
        .unwrap();
        let mut out = [1.0f32; 4];
        assert_eq!(feed.fill(&mut out, true), 0);
        assert_eq!(feed.error(), Some(DecodeErrorKind::Corrupt));
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn source_is_silent_while_paused_or_locked() {
        let (tx, feed) = feed(4);
        tx.push(unit(vec![0.5; 8], 0)).unwrap();
        let feed = Arc::new(Mutex::new(feed));
        let mut source = CoordinatorAudioSource::new(feed.clone());

        let mut out = [1.0f32; 4];
        {
            let _held = feed.lock().unwrap();
            assert_eq!(source.fill_audio_buffer(&mut out), 0);
            assert_eq!(out, [0.0; 4]);
        }

        lock(&feed).set_paused(true);
        assert_eq!(source.fill_audio_buffer(&mut out), 0);

        lock(&feed).set_paused(false);
        assert_eq!(source.fill_audio_buffer(&mut out), 2);
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn fade_in_after_seek_notification() {
        let (tx, rx) = queue::bounded(4);
        let feed = Arc::new(Mutex::new(AudioFeed::new(rx, 1, 1000, 4)));
        tx.push(unit(vec![1.0; 8], 0)).unwrap();

        let mut source = CoordinatorAudioSource::new(feed);
        source.notify_seek();
        let mut out = [0.0f32; 6];
        assert_eq!(source.fill_audio_buffer(&mut out), 6);
        assert_eq!(out, [0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
    }
}
