// src/lib.rs

pub mod audio;
pub mod config;
pub mod decoder;
pub mod effects;
pub mod engine;
pub mod error;
pub mod export;
pub mod playback;
pub mod queue;

pub use config::PipelineConfig;
pub use decoder::{Bitmap, FileSource, MediaSource, PixelFormat, StreamInfo, TestPatternSource};
pub use engine::{AudioEngine, AudioSource, SourceId};
pub use error::{DecodeError, DecodeErrorKind, PipelineError};
pub use playback::{FrameAvailable, PlaybackCoordinator, StreamSelect, TimeWanted};
