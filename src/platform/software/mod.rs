// swrend/src/platform/software/mod.rs
//
//! A pure-Rust backend: a CPU device and an in-process compositor.
//!
//! It needs no display server or driver, which makes it the backend for headless hosts and tests.

mod compositor;
mod device;
mod raster;

pub use self::compositor::{Compositor, Drawable};
pub use self::device::{Buffer, Device, PixelFormat, Program, Shader, Surface, Texture};
pub use self::device::UniformLocation;
