// swrend/src/platform/egl/mod.rs
//
//! A backend using EGL displays and OpenGL ES 2 through `glow`.
//!
//! `libEGL` and `libGLESv2` are opened at runtime, so the crate builds and links on machines
//! without them; `initialize` reports `NoGLLibraryFound` instead.

mod device;
mod drawable;
mod error;
mod loader;

pub use self::device::{Device, Surface};
pub use self::drawable::{NativeDrawable, NativeWindow, OffscreenProvider, PbufferTarget};
