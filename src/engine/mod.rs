// src/engine/mod.rs

//! Audio mixing engine.
//!
//! One engine per output device, passed around as a cloneable handle. The
//! source registry, mix bus and limiter sit behind a single mutex that the
//! control API locks and the device callback only ever `try_lock`s; a
//! callback that loses the race outputs one block of silence.

pub mod mixer;

pub use mixer::Mixer;

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::config::{AudioParams, LimiterParams, PipelineConfig};
use crate::effects::Limiter;
use crate::error::{PipelineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

/// Something the engine can pull interleaved samples from.
///
/// Called on the real-time thread: implementations must not block.
pub trait AudioSource: Send {
    /// Fill `out` (interleaved, engine format) and return the frames
    /// written. Whatever is not written must be zeroed.
    fn fill_audio_buffer(&mut self, out: &mut [f32]) -> usize;

    /// The source jumped to a new position.
    fn notify_seek(&mut self) {}
}

struct SourceSlot {
    source: Box<dyn AudioSource>,
    volume: f32,
}

struct EngineCore {
    params: AudioParams,
    sources: BTreeMap<SourceId, SourceSlot>,
    next_id: u64,
    mixer: Mixer,
    limiter: Limiter,
    master_volume: f32,
    playing: bool,
}

impl EngineCore {
    fn slot_mut(&mut self, id: SourceId) -> Result<&mut SourceSlot> {
        self.sources
            .get_mut(&id)
            .ok_or(PipelineError::UnknownSource(id))
    }

    fn render<T>(&mut self, out: &mut [T], out_channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let out_channels = out_channels.max(1);
        let channels = self.params.channels.max(1);
        let frames = out.len() / out_channels;

        self.mixer.begin_block(frames);
        if self.playing {
            let master = self.master_volume;
            for slot in self.sources.values_mut() {
                self.mixer
                    .render_source(slot.source.as_mut(), slot.volume * master);
            }
        }

        let mix = self.mixer.mix_buffer_mut();
        self.limiter.process(mix);

        for (dst, src) in out.chunks_mut(out_channels).zip(mix.chunks_exact(channels)) {
            for (ch, sample) in dst.iter_mut().enumerate() {
                let s = if channels == 1 {
                    src[0]
                } else {
                    src.get(ch).copied().unwrap_or(0.0)
                };
                *sample = T::from_sample(s);
            }
        }
        for sample in out[frames * out_channels..].iter_mut() {
            *sample = T::EQUILIBRIUM;
        }
    }
}

/// Cloneable handle to the process-wide mixer.
#[derive(Clone)]
pub struct AudioEngine {
    core: Arc<Mutex<EngineCore>>,
}

impl AudioEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        let params = config.audio;
        let core = EngineCore {
            params,
            sources: BTreeMap::new(),
            next_id: 0,
            mixer: Mixer::new(params.channels, params.block_frames),
            limiter: Limiter::new(params.sample_rate, params.channels, config.limiter),
            master_volume: config.master_volume,
            playing: true,
        };
        info!(
            "audio engine: {} Hz, {} channels",
            params.sample_rate, params.channels
        );
        Self {
            core: Arc::new(Mutex::new(core)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn params(&self) -> AudioParams {
        self.lock().params
    }

    /// Register `source` at `volume` and return its id. Ids are never reused.
    pub fn add_source(&self, source: Box<dyn AudioSource>, volume: f32) -> SourceId {
        let mut core = self.lock();
        let id = SourceId(core.next_id);
        core.next_id += 1;
        core.sources.insert(id, SourceSlot { source, volume });
        debug!("engine: added source {id:?} at volume {volume}");
        id
    }

    pub fn remove_source(&self, id: SourceId) -> Result<()> {
        let removed = self.lock().sources.remove(&id);
        match removed {
            Some(_) => {
                debug!("engine: removed source {id:?}");
                Ok(())
            }
            None => Err(PipelineError::UnknownSource(id)),
        }
    }

    pub fn set_source_volume(&self, id: SourceId, volume: f32) -> Result<()> {
        self.lock().slot_mut(id)?.volume = volume;
        Ok(())
    }

    pub fn source_volume(&self, id: SourceId) -> Result<f32> {
        Ok(self.lock().slot_mut(id)?.volume)
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.lock().sources.keys().copied().collect()
    }

    /// Tell source `id` that its stream position jumped.
    pub fn notify_seek(&self, id: SourceId) -> Result<()> {
        self.lock().slot_mut(id)?.source.notify_seek();
        Ok(())
    }

    pub fn pause(&self) {
        self.lock().playing = false;
    }

    pub fn play(&self) {
        self.lock().playing = true;
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.lock().master_volume = volume.max(0.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.lock().master_volume
    }

    pub fn set_limiter_params(&self, params: LimiterParams) {
        self.lock().limiter.set_params(params);
    }

    /// Mix one device block into `out`, which is interleaved with
    /// `out_channels` channels. Called from the real-time callback: never
    /// waits for the control lock.
    pub fn mix_into<T>(&self, out: &mut [T], out_channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let mut core = match self.core.try_lock() {
            Ok(core) => core,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(T::EQUILIBRIUM);
                return;
            }
        };
        core.render(out, out_channels);
    }
}
