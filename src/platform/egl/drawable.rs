// swrend/src/platform/egl/drawable.rs
//
//! Drawable buffers that EGL surfaces can be bound to.

use crate::error::Error;
use crate::surface::{DrawableProvider, SurfaceHandle};

use euclid::default::Size2D;
use log::debug;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// A native window owned by the host, such as an `ANativeWindow`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NativeWindow(pub *mut c_void);

// The host keeps the window alive while a surface is bound to it.
unsafe impl Send for NativeWindow {}
unsafe impl Sync for NativeWindow {}

/// The size of an off-screen pbuffer, settable until a surface is created for it.
#[derive(Clone, Debug, Default)]
pub struct PbufferTarget(Arc<Mutex<Size2D<i32>>>);

impl PbufferTarget {
    pub fn size(&self) -> Size2D<i32> {
        *self.0.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn set_size(&self, size: &Size2D<i32>) {
        *self.0.lock().unwrap_or_else(|err| err.into_inner()) = *size;
    }
}

#[derive(Clone, Debug)]
pub enum NativeDrawable {
    /// Presents into a window; its buffers are sized by the window's owner.
    Window(NativeWindow),
    /// Renders off-screen.
    Pbuffer(PbufferTarget),
}

/// Hands out off-screen pbuffer drawables, for hosts without a compositor.
pub struct OffscreenProvider {
    next_handle: AtomicI64,
}

impl Default for OffscreenProvider {
    fn default() -> OffscreenProvider {
        OffscreenProvider::new()
    }
}

impl OffscreenProvider {
    pub fn new() -> OffscreenProvider {
        OffscreenProvider {
            next_handle: AtomicI64::new(1),
        }
    }
}

impl DrawableProvider for OffscreenProvider {
    type Drawable = NativeDrawable;

    fn allocate(&self) -> Result<(NativeDrawable, SurfaceHandle), Error> {
        let handle = SurfaceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        Ok((NativeDrawable::Pbuffer(PbufferTarget::default()), handle))
    }

    fn set_default_buffer_size(&self, drawable: &NativeDrawable, size: &Size2D<i32>) {
        match *drawable {
            NativeDrawable::Pbuffer(ref target) => target.set_size(size),
            NativeDrawable::Window(window) => {
                debug!("Window {:?} keeps the size its owner gave it", window)
            }
        }
    }

    fn release(&self, handle: SurfaceHandle) {
        debug!("Released pbuffer for {}", handle);
    }
}
