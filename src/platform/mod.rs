// swrend/src/platform/mod.rs
//
//! Graphics backends.

pub mod software;

#[cfg(egl_backend)]
pub mod egl;
