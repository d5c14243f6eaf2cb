// src/error.rs

use thiserror::Error;

use crate::engine::SourceId;

/// Errors reported directly to the caller of the pipeline API.
///
/// Only `open()` and the control surface return these. Failures that happen
/// on a decode thread never show up here; they arrive as terminal messages
/// and surface through `is_eof()` / `stream_error()`.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The media source could not be opened (unreadable or unsupported).
    #[error("failed to open '{path}': {reason}")]
    Open { path: String, reason: String },

    /// The source opened but contains neither a video nor an audio stream.
    #[error("'{0}' contains no playable stream")]
    NoStreams(String),

    /// An operation was called in a decoder state that does not allow it.
    #[error("cannot {op} while decoder is {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    /// The other end of a queue went away. Only expected during shutdown.
    #[error("queue closed")]
    QueueClosed,

    #[error("unknown audio source {0:?}")]
    UnknownSource(SourceId),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single decode step. Lives and dies on the worker thread.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("corrupt stream data: {0}")]
    Corrupt(String),

    #[error("unsupported stream: {0}")]
    Unsupported(String),

    #[error("IO error during decode: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn kind(&self) -> DecodeErrorKind {
        match self {
            DecodeError::Corrupt(_) => DecodeErrorKind::Corrupt,
            DecodeError::Unsupported(_) => DecodeErrorKind::Unsupported,
            DecodeError::Io(_) => DecodeErrorKind::Io,
        }
    }
}

/// Payload-free classification carried by `Message::Error` across threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    Corrupt,
    Unsupported,
    Io,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
