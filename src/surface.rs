// swrend/src/surface.rs
//
//! Presentable surfaces: a drawable buffer, its context-surface, and the texture streamed into it.

use crate::device::Device;
use crate::error::Error;

use euclid::default::Size2D;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

/// The caller-visible identity of a surface, assigned by the drawable buffer provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub i64);

impl Display for SurfaceHandle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supplies platform drawable buffers and hands their frames to the display compositor.
///
/// Drawable buffers belong to the provider. The engine binds to them but never frees them.
pub trait DrawableProvider: Send + Sync {
    type Drawable: Clone + Send + Sync + 'static;

    /// Allocates a new drawable buffer along with its unique external handle.
    fn allocate(&self) -> Result<(Self::Drawable, SurfaceHandle), Error>;

    /// Sets the size the drawable's buffers are created with.
    fn set_default_buffer_size(&self, drawable: &Self::Drawable, size: &Size2D<i32>);

    /// Tells the compositor that a new frame was swapped into the drawable for `handle`.
    fn mark_frame_available(&self, _handle: SurfaceHandle) {}

    /// The engine no longer uses the drawable for `handle`; the provider may free it.
    fn release(&self, _handle: SurfaceHandle) {}
}

pub struct PresentableSurface<D: Device> {
    handle: SurfaceHandle,
    size: Size2D<i32>,
    // Held for as long as the context-surface is bound to it.
    #[allow(dead_code)]
    drawable: D::Drawable,
    context_surface: D::Surface,
    texture: D::Texture,
    // Only touched on the graphics thread.
    live: AtomicBool,
}

impl<D: Device> Debug for PresentableSurface<D> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "PresentableSurface({}, {}x{}, {:?})",
            self.handle, self.size.width, self.size.height, self.texture
        )
    }
}

impl<D: Device> PresentableSurface<D> {
    pub(crate) fn new(
        handle: SurfaceHandle,
        size: Size2D<i32>,
        drawable: D::Drawable,
        context_surface: D::Surface,
        texture: D::Texture,
    ) -> PresentableSurface<D> {
        PresentableSurface {
            handle,
            size,
            drawable,
            context_surface,
            texture,
            live: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> Size2D<i32> {
        self.size
    }

    #[inline]
    pub fn context_surface(&self) -> &D::Surface {
        &self.context_surface
    }

    #[inline]
    pub fn texture(&self) -> D::Texture {
        self.texture
    }

    /// Fails with `NoTexture` once the surface's GPU objects have been released.
    pub(crate) fn ensure_live(&self) -> Result<(), Error> {
        if self.live.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NoTexture(self.handle))
        }
    }

    pub(crate) fn mark_released(&self) {
        self.live.store(false, Ordering::Relaxed);
    }
}

/// Reverses the row order of a tightly packed RGBA8 image `width` pixels wide.
///
/// Read-back has its origin at the bottom left; this converts it to top-left origin and back.
pub fn flip_rows(pixels: &mut [u8], width: usize) {
    let stride = width * 4;
    if stride == 0 {
        return;
    }
    let rows = pixels.len() / stride;
    for row in 0..rows / 2 {
        let (top, bottom) = pixels.split_at_mut((rows - 1 - row) * stride);
        top[row * stride..(row + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

#[cfg(test)]
mod tests {
    use super::flip_rows;

    #[test]
    fn test_flip_rows_reverses_row_order() {
        // Three rows of two pixels, each row filled with its index.
        let mut pixels: Vec<u8> = (0..3u8).flat_map(|row| vec![row; 8]).collect();
        flip_rows(&mut pixels, 2);
        let rows: Vec<u8> = pixels.chunks(8).map(|row| row[0]).collect();
        assert_eq!(rows, vec![2, 1, 0]);
        assert!(pixels.chunks(8).all(|row| row.iter().all(|&b| b == row[0])));
    }

    #[test]
    fn test_flip_rows_tolerates_empty_input() {
        let mut pixels = Vec::new();
        flip_rows(&mut pixels, 0);
        flip_rows(&mut pixels, 4);
        assert!(pixels.is_empty());
    }
}
