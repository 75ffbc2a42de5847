// swrend/src/platform/software/compositor.rs
//
//! An in-process stand-in for the display compositor: it hands out drawable buffers and keeps the
//! frames swapped into them.

use crate::error::Error;
use crate::surface::{DrawableProvider, SurfaceHandle};

use euclid::default::Size2D;
use fnv::FnvHashMap;
use log::debug;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) struct FrontBuffer {
    pub(crate) size: Size2D<i32>,
    /// RGBA8, top row first, as a compositor would scan it out.
    pub(crate) pixels: Vec<u8>,
    pub(crate) swaps: u64,
}

/// A platform drawable buffer. Clones refer to the same buffer.
#[derive(Clone)]
pub struct Drawable(Arc<Mutex<FrontBuffer>>);

impl Debug for Drawable {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let size = self.default_size();
        write!(f, "Drawable({}x{})", size.width, size.height)
    }
}

impl Default for Drawable {
    fn default() -> Drawable {
        Drawable::new()
    }
}

impl Drawable {
    pub fn new() -> Drawable {
        Drawable(Arc::new(Mutex::new(FrontBuffer {
            size: Size2D::zero(),
            pixels: vec![],
            swaps: 0,
        })))
    }

    pub(crate) fn lock(&self) -> MutexGuard<FrontBuffer> {
        self.0.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// The size context-surfaces bound to this drawable are created with.
    pub fn default_size(&self) -> Size2D<i32> {
        self.lock().size
    }

    /// Storage for the front buffer is only allocated by the first swap.
    pub fn set_default_size(&self, size: &Size2D<i32>) {
        self.lock().size = *size;
    }

    /// The last frame swapped into this drawable, RGBA8 with the top row first. Empty until the
    /// first swap.
    pub fn front_buffer(&self) -> Vec<u8> {
        self.lock().pixels.clone()
    }

    /// How many times a context-surface has posted to this drawable.
    pub fn swap_count(&self) -> u64 {
        self.lock().swaps
    }
}

struct Entry {
    drawable: Drawable,
    frames_available: u64,
}

/// Allocates `Drawable`s with increasing handles and tracks frame availability per handle.
pub struct Compositor {
    next_handle: AtomicI64,
    entries: Mutex<FnvHashMap<SurfaceHandle, Entry>>,
}

impl Default for Compositor {
    fn default() -> Compositor {
        Compositor::new()
    }
}

impl Compositor {
    pub fn new() -> Compositor {
        Compositor {
            next_handle: AtomicI64::new(1),
            entries: Mutex::new(FnvHashMap::default()),
        }
    }

    fn entries(&self) -> MutexGuard<FnvHashMap<SurfaceHandle, Entry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// The drawable registered under `handle`, if it hasn't been released.
    pub fn drawable(&self, handle: SurfaceHandle) -> Option<Drawable> {
        self.entries()
            .get(&handle)
            .map(|entry| entry.drawable.clone())
    }

    /// The frame the compositor would display for `handle`: RGBA8, top row first.
    pub fn frame(&self, handle: SurfaceHandle) -> Option<Vec<u8>> {
        self.drawable(handle).map(|drawable| drawable.front_buffer())
    }

    /// How many frames were announced for `handle`.
    pub fn frames_available(&self, handle: SurfaceHandle) -> Option<u64> {
        self.entries()
            .get(&handle)
            .map(|entry| entry.frames_available)
    }

    pub fn is_registered(&self, handle: SurfaceHandle) -> bool {
        self.entries().contains_key(&handle)
    }
}

impl DrawableProvider for Compositor {
    type Drawable = Drawable;

    fn allocate(&self) -> Result<(Drawable, SurfaceHandle), Error> {
        let handle = SurfaceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let drawable = Drawable::new();
        self.entries().insert(
            handle,
            Entry {
                drawable: drawable.clone(),
                frames_available: 0,
            },
        );
        debug!("Allocated drawable for {}", handle);
        Ok((drawable, handle))
    }

    fn set_default_buffer_size(&self, drawable: &Drawable, size: &Size2D<i32>) {
        drawable.set_default_size(size);
    }

    fn mark_frame_available(&self, handle: SurfaceHandle) {
        if let Some(entry) = self.entries().get_mut(&handle) {
            entry.frames_available += 1;
        }
    }

    fn release(&self, handle: SurfaceHandle) {
        if self.entries().remove(&handle).is_some() {
            debug!("Released drawable for {}", handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Compositor;
    use crate::surface::DrawableProvider;

    use euclid::default::Size2D;

    #[test]
    fn test_handles_are_unique_and_released() {
        let compositor = Compositor::new();
        let (first, a) = compositor.allocate().unwrap();
        let (_, b) = compositor.allocate().unwrap();
        assert_ne!(a, b);

        compositor.set_default_buffer_size(&first, &Size2D::new(3, 2));
        assert_eq!(first.default_size(), Size2D::new(3, 2));
        assert!(compositor.frame(a).unwrap().is_empty());

        compositor.mark_frame_available(a);
        compositor.mark_frame_available(a);
        assert_eq!(compositor.frames_available(a), Some(2));
        assert_eq!(compositor.frames_available(b), Some(0));

        compositor.release(a);
        assert!(!compositor.is_registered(a));
        assert!(compositor.is_registered(b));
        assert_eq!(compositor.frames_available(a), None);
    }
}
