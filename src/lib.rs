// swrend/src/lib.rs
//
//! Streams software-rendered pixel buffers into GPU textures.
//!
//! A host creates surfaces by size, uploads RGBA8 pixel regions into them, asks for them to be
//! presented, and reads back what was presented. All graphics API work happens on one dedicated
//! thread that owns the only rendering context; callers on any thread submit work to it and
//! block until it completes. Each surface pairs a texture with a context-surface bound to a
//! drawable buffer supplied by a `DrawableProvider`, and is identified by the provider's handle.

pub mod platform;

pub mod error;
pub use crate::error::{Error, ErrorCodes, GraphicsApiError, WindowingApiError};

mod context;
pub use crate::context::{rgba_len, ContextAttributeFlags, ContextAttributes};
pub use crate::context::{ContextState, GraphicsContext};

pub mod device;
pub use crate::device::Device;

mod engine;
pub use crate::engine::{Engine, EngineConfig, PresentMode};

mod queue;
pub use crate::queue::TaskQueue;

mod registry;

mod request;
pub use crate::request::{Region, Request, Response};

mod surface;
pub use crate::surface::{flip_rows, DrawableProvider, PresentableSurface, SurfaceHandle};

#[cfg(egl_backend)]
#[allow(non_camel_case_types)]
mod egl {
    use std::os::raw::{c_long, c_void};
    pub type khronos_utime_nanoseconds_t = khronos_uint64_t;
    pub type khronos_uint64_t = u64;
    pub type khronos_ssize_t = c_long;
    pub type EGLint = i32;
    pub type EGLNativeDisplayType = *const c_void;
    pub type EGLNativePixmapType = *const c_void;
    pub type EGLNativeWindowType = *const c_void;
    pub type NativeDisplayType = EGLNativeDisplayType;
    pub type NativePixmapType = EGLNativePixmapType;
    pub type NativeWindowType = EGLNativeWindowType;
    include!(concat!(env!("OUT_DIR"), "/egl_bindings.rs"));
}

#[cfg(test)]
mod tests;
