// src/decoder/worker.rs

//! Decode worker threads.
//!
//! Each worker owns one decoder and loops: drain pending commands without
//! blocking, decode one unit, push it. Pushing blocks while the message
//! queue is full. At end of stream the worker parks on its command queue
//! until it is told to seek or stop.

use log::{debug, info, warn};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::control::{Command, Message};
use super::frame::FramePool;
use super::{AudioDecoder, VideoDecoder};
use crate::error::DecodeError;
use crate::queue::{QueueReceiver, QueueSender};

/// One decoding stream as seen by the worker loop.
trait Stage: Send {
    /// Decode one unit. `Ok(None)` is end of input.
    fn step(&mut self) -> Result<Option<Message>, DecodeError>;

    /// Reposition and build the `SeekDone` reply.
    fn seek(&mut self, target: Duration) -> Result<Message, DecodeError>;

    /// The reply to send when repositioning failed.
    fn failed_seek(&self) -> Message {
        Message::SeekDone {
            video_time: None,
            audio_time: None,
        }
    }

    fn command(&mut self, cmd: Command);

    fn close(&mut self);
}

struct VideoStage {
    decoder: Box<dyn VideoDecoder>,
    pool: FramePool,
}

impl Stage for VideoStage {
    fn step(&mut self) -> Result<Option<Message>, DecodeError> {
        let mut frame = self.pool.acquire();
        match self.decoder.decode_frame(&mut frame.planes) {
            Ok(Some(pts)) => {
                frame.pts = pts;
                Ok(Some(Message::Frame(frame)))
            }
            Ok(None) => {
                self.pool.release(frame);
                Ok(None)
            }
            Err(e) => {
                self.pool.release(frame);
                Err(e)
            }
        }
    }

    fn seek(&mut self, target: Duration) -> Result<Message, DecodeError> {
        let actual = self.decoder.seek_to(target)?;
        Ok(Message::SeekDone {
            video_time: Some(actual),
            audio_time: None,
        })
    }

    fn command(&mut self, cmd: Command) {
        match cmd {
            Command::ReturnFrame(frame) => {
                self.pool.release(frame);
            }
            Command::SetFps(fps) => self.decoder.set_fps(fps),
            Command::Seek(_) | Command::Stop => {}
        }
    }

    fn close(&mut self) {
        if self.pool.checked_out() > 0 {
            debug!(
                "video worker closing with {} of {} frames still checked out",
                self.pool.checked_out(),
                self.pool.num_slots()
            );
        }
        self.decoder.close();
    }
}

struct AudioStage {
    decoder: Box<dyn AudioDecoder>,
}

impl Stage for AudioStage {
    fn step(&mut self) -> Result<Option<Message>, DecodeError> {
        Ok(self.decoder.decode_audio()?.map(Message::Audio))
    }

    fn seek(&mut self, target: Duration) -> Result<Message, DecodeError> {
        let actual = self.decoder.seek_to(target)?;
        Ok(Message::SeekDone {
            video_time: None,
            audio_time: Some(actual),
        })
    }

    fn command(&mut self, cmd: Command) {
        if let Command::ReturnFrame(frame) = cmd {
            warn!("audio worker got frame {:?} back; dropping it", frame.handle());
        }
    }

    fn close(&mut self) {
        self.decoder.close();
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Worker<S: Stage> {
    name: &'static str,
    stage: S,
    commands: QueueReceiver<Command>,
    messages: QueueSender<Message>,
    at_eof: bool,
    units: u64,
}

impl<S: Stage + 'static> Worker<S> {
    fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("avsync-{}", self.name))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!("{} worker started", self.name);
        loop {
            // Commands first. At end of stream there is nothing to decode, so
            // wait for one instead of spinning.
            loop {
                let cmd = match self.commands.pop(self.at_eof) {
                    Ok(Some(cmd)) => cmd,
                    Ok(None) => break,
                    Err(_) => {
                        debug!("{} worker: command queue closed", self.name);
                        self.stage.close();
                        return;
                    }
                };
                if let Flow::Exit = self.handle(cmd) {
                    return;
                }
            }

            let msg = match self.stage.step() {
                Ok(Some(msg)) => {
                    self.units += 1;
                    msg
                }
                Ok(None) => {
                    debug!("{} worker reached end of stream", self.name);
                    self.at_eof = true;
                    Message::EndOfStream
                }
                Err(e) => {
                    warn!("{} decode error, ending stream: {e}", self.name);
                    self.at_eof = true;
                    Message::Error { kind: e.kind() }
                }
            };

            if self.messages.push(msg).is_err() {
                debug!("{} worker: consumer gone", self.name);
                self.stage.close();
                return;
            }
        }
    }

    fn handle(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Seek(target) => {
                let reply = match self.stage.seek(target) {
                    Ok(reply) => {
                        self.at_eof = false;
                        reply
                    }
                    Err(e) => {
                        warn!("{} seek to {:?} failed: {e}", self.name, target);
                        self.at_eof = true;
                        let reply = self.stage.failed_seek();
                        if self.messages.push(reply).is_err() {
                            return self.exit();
                        }
                        Message::Error { kind: e.kind() }
                    }
                };
                debug!("{} worker seeked to {:?}", self.name, target);
                if self.messages.push(reply).is_err() {
                    return self.exit();
                }
                Flow::Continue
            }
            Command::Stop => {
                if !self.at_eof {
                    // Receiver may already be gone; nothing to do about it then.
                    let _ = self.messages.push(Message::EndOfStream);
                }
                self.exit()
            }
            other => {
                self.stage.command(other);
                Flow::Continue
            }
        }
    }

    fn exit(&mut self) -> Flow {
        info!("{} worker stopping after {} units", self.name, self.units);
        self.stage.close();
        Flow::Exit
    }
}

/// Start the video worker. Frames come out of `pool` and go back to it via
/// `Command::ReturnFrame`.
pub fn spawn_video_worker(
    decoder: Box<dyn VideoDecoder>,
    pool: FramePool,
    commands: QueueReceiver<Command>,
    messages: QueueSender<Message>,
) -> io::Result<JoinHandle<()>> {
    Worker {
        name: "video",
        stage: VideoStage { decoder, pool },
        commands,
        messages,
        at_eof: false,
        units: 0,
    }
    .spawn()
}

pub fn spawn_audio_worker(
    decoder: Box<dyn AudioDecoder>,
    commands: QueueReceiver<Command>,
    messages: QueueSender<Message>,
) -> io::Result<JoinHandle<()>> {
    Worker {
        name: "audio",
        stage: AudioStage { decoder },
        commands,
        messages,
        at_eof: false,
        units: 0,
    }
    .spawn()
}
