// src/decoder/control.rs

use std::time::Duration;

use super::frame::VideoFrame;
use crate::error::DecodeErrorKind;

/// Commands a decode worker handles between decode steps.
#[derive(Debug)]
pub enum Command {
    /// Flush decode state, reposition, answer with exactly one `SeekDone`.
    Seek(Duration),
    /// Push `EndOfStream` (unless already there) and leave the loop.
    Stop,
    /// Change the output frame rate of a video decoder.
    SetFps(f64),
    /// Hand a delivered frame back to the worker's pool.
    ReturnFrame(VideoFrame),
}

/// A chunk of interleaved f32 samples in the engine's output format.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioUnit {
    pub samples: Vec<f32>,
    pub pts: Duration,
}

/// Everything a decode worker can send to the coordinator.
///
/// Each message is produced once and consumed once; none is shared.
#[derive(Debug)]
pub enum Message {
    Frame(VideoFrame),
    Audio(AudioUnit),
    EndOfStream,
    /// Answer to `Command::Seek`. Each worker fills in only its own stream.
    SeekDone {
        video_time: Option<Duration>,
        audio_time: Option<Duration>,
    },
    /// Terminal decode failure; treated like `EndOfStream` by the consumer.
    Error { kind: DecodeErrorKind },
}
