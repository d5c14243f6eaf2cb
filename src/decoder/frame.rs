// src/decoder/frame.rs

use log::warn;
use std::time::Duration;

/// Pixel layouts a decoder can hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Bgra,
    /// Planar 4:2:0, delivered as three `Gray8` planes (Y, Cb, Cr).
    Yuv420p,
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel of a single plane of this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
            PixelFormat::Yuv420p | PixelFormat::Gray8 => 1,
        }
    }

    pub fn num_planes(self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            _ => 1,
        }
    }

    /// Allocate the bitmaps that make up one frame of `width` x `height`.
    pub fn alloc_planes(self, width: u32, height: u32) -> Vec<Bitmap> {
        match self {
            PixelFormat::Yuv420p => {
                let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
                vec![
                    Bitmap::new(width, height, PixelFormat::Gray8),
                    Bitmap::new(cw, ch, PixelFormat::Gray8),
                    Bitmap::new(cw, ch, PixelFormat::Gray8),
                ]
            }
            other => vec![Bitmap::new(width, height, other)],
        }
    }
}

/// One plane of pixel data.
#[derive(Clone, Debug, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            stride,
            format,
            pixels: vec![0u8; stride * height as usize],
        }
    }

    /// Copy geometry and pixels from `src`, reusing this bitmap's allocation.
    pub fn copy_pixels(&mut self, src: &Bitmap) {
        self.width = src.width;
        self.height = src.height;
        self.stride = src.stride;
        self.format = src.format;
        self.pixels.clone_from(&src.pixels);
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.pixels[start..start + self.stride]
    }
}

/// Index of a buffer slot in a [`FramePool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(u32);

impl FrameHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A decoded picture checked out of a worker's pool.
///
/// Ownership moves through the message queue, so whichever side holds the
/// value is the only one able to write it. It goes back to the pool via a
/// `ReturnFrame` command.
#[derive(Debug)]
pub struct VideoFrame {
    pub(crate) handle: FrameHandle,
    pub(crate) pts: Duration,
    pub(crate) planes: Vec<Bitmap>,
}

impl VideoFrame {
    pub fn handle(&self) -> FrameHandle {
        self.handle
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn planes(&self) -> &[Bitmap] {
        &self.planes
    }
}

enum Slot {
    Free(Vec<Bitmap>),
    CheckedOut,
}

/// Arena of frame buffers owned by the video decode worker.
pub struct FramePool {
    slots: Vec<Slot>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FramePool {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            slots: Vec::new(),
            width,
            height,
            format,
        }
    }

    /// Check out a buffer, reusing a returned one when possible.
    pub fn acquire(&mut self) -> VideoFrame {
        // Swapping `CheckedOut` for `CheckedOut` is a no-op, so the scan can
        // take the first free slot in one pass.
        let free = self.slots.iter_mut().enumerate().find_map(|(index, slot)| {
            match std::mem::replace(slot, Slot::CheckedOut) {
                Slot::Free(planes) => Some((index, planes)),
                Slot::CheckedOut => None,
            }
        });

        let (index, planes) = match free {
            Some(found) => found,
            None => {
                self.slots.push(Slot::CheckedOut);
                (
                    self.slots.len() - 1,
                    self.format.alloc_planes(self.width, self.height),
                )
            }
        };

        VideoFrame {
            handle: FrameHandle(index as u32),
            pts: Duration::ZERO,
            planes,
        }
    }

    /// Check a buffer back in. Returns `false` (and drops the buffer) if the
    /// handle is unknown or the slot is not checked out.
    pub fn release(&mut self, frame: VideoFrame) -> bool {
        match self.slots.get_mut(frame.handle.index()) {
            Some(slot @ Slot::CheckedOut) => {
                *slot = Slot::Free(frame.planes);
                true
            }
            _ => {
                warn!("Ignoring return of frame {:?}: slot not checked out", frame.handle);
                false
            }
        }
    }

    pub fn checked_out(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::CheckedOut))
            .count()
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}
