// swrend/src/error.rs
//
//! Various errors that methods can produce.

use crate::surface::SurfaceHandle;

use std::error;
use std::fmt::{self, Display, Formatter};

/// The success value of the windowing (EGL-style) error query.
pub const WINDOWING_SUCCESS: i32 = 0x3000;
/// The success value of the rendering (GL-style) error query.
pub const RENDERING_NO_ERROR: u32 = 0;

#[derive(Debug)]
pub enum Error {
    /// A graphics API call reported an error. The context can no longer be trusted.
    Graphics(GraphicsApiError),
    /// A previous graphics API error left the context unusable.
    ContextLost,
    /// The graphics context has not been initialized, or has been torn down.
    NotInitialized,
    /// No display connection could be obtained.
    NoDisplay,
    /// The display connection could not be initialized.
    InitializeFailed(WindowingApiError),
    /// Choosing a pixel format failed.
    PixelFormatSelectionFailed(WindowingApiError),
    /// The system has no pixel format matching the requested attributes.
    NoPixelFormatFound,
    /// The system couldn't create the graphics context.
    ContextCreationFailed(WindowingApiError),
    /// A context-surface couldn't be bound to the drawable buffer.
    SurfaceCreationFailed(WindowingApiError),
    /// The system couldn't make the context-surface current.
    MakeCurrentFailed(WindowingApiError),
    /// Compiling a shader failed. Carries the compiler info log.
    ShaderCompilationFailed(String),
    /// Linking the shader program failed. Carries the linker info log.
    ProgramLinkFailed(String),
    /// The system graphics library couldn't be located.
    NoGLLibraryFound,
    /// No surface is registered under this handle.
    NoTexture(SurfaceHandle),
    /// A surface was requested with a non-positive width or height.
    InvalidSize { width: i64, height: i64 },
    /// A surface was requested larger than the device's maximum texture size.
    SurfaceTooLarge { width: i64, height: i64, max: i32 },
    /// An upload region is empty, negative, or not contained in the surface.
    InvalidRegion { x: i32, y: i32, width: i32, height: i32 },
    /// The pixel buffer length doesn't match the region.
    PixelDataLength { expected: usize, actual: usize },
    /// The drawable buffer provider couldn't allocate a buffer.
    DrawableAllocationFailed,
    /// The engine has been stopped.
    EngineStopped,
    /// The dedicated graphics thread couldn't be spawned.
    ThreadSpawnFailed,
    /// The dedicated graphics thread exited before completing the task.
    WorkerGone,
    /// A task on the graphics thread tried to wait for another task.
    RecursiveSubmission,
}

impl Error {
    /// The error code reported to the request bridge.
    pub fn code(&self) -> &'static str {
        match *self {
            Error::NoTexture(_) => "NO_TEX",
            Error::InvalidSize { .. } => "MISSING",
            Error::SurfaceTooLarge { .. }
            | Error::InvalidRegion { .. }
            | Error::PixelDataLength { .. } => "INVALID",
            Error::EngineStopped => "STOPPED",
            _ => "FATAL",
        }
    }

    /// Returns true if the error leaves the engine usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            *self,
            Error::NoTexture(_)
                | Error::InvalidSize { .. }
                | Error::SurfaceTooLarge { .. }
                | Error::InvalidRegion { .. }
                | Error::PixelDataLength { .. }
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Error::Graphics(ref err) => write!(f, "{}", err),
            Error::ContextLost => write!(f, "graphics context lost after a previous fault"),
            Error::NotInitialized => write!(f, "graphics context is not initialized"),
            Error::NoDisplay => write!(f, "failed to get display"),
            Error::InitializeFailed(err) => write!(f, "failed to initialize display: {:?}", err),
            Error::PixelFormatSelectionFailed(err) => {
                write!(f, "failed to choose a config: {:?}", err)
            }
            Error::NoPixelFormatFound => write!(f, "got zero configs"),
            Error::ContextCreationFailed(err) => write!(f, "failed to get context: {:?}", err),
            Error::SurfaceCreationFailed(err) => write!(f, "obtained no surface: {:?}", err),
            Error::MakeCurrentFailed(err) => {
                write!(f, "failed to make surface current: {:?}", err)
            }
            Error::ShaderCompilationFailed(ref log) => write!(f, "shader compile failed: {}", log),
            Error::ProgramLinkFailed(ref log) => write!(f, "program link failed: {}", log),
            Error::NoGLLibraryFound => write!(f, "no graphics library found"),
            Error::NoTexture(handle) => write!(f, "No texture with id {}", handle),
            Error::InvalidSize { width, height } => {
                write!(f, "invalid surface size {}x{}", width, height)
            }
            Error::SurfaceTooLarge { width, height, max } => write!(
                f,
                "surface size {}x{} exceeds the maximum texture size {}",
                width, height, max
            ),
            Error::InvalidRegion {
                x,
                y,
                width,
                height,
            } => write!(f, "invalid region ({}, {}, {}, {})", x, y, width, height),
            Error::PixelDataLength { expected, actual } => write!(
                f,
                "pixel buffer holds {} bytes, region needs {}",
                actual, expected
            ),
            Error::DrawableAllocationFailed => write!(f, "failed to allocate a drawable buffer"),
            Error::EngineStopped => write!(f, "engine stopped"),
            Error::ThreadSpawnFailed => write!(f, "failed to spawn the graphics thread"),
            Error::WorkerGone => write!(f, "graphics thread exited"),
            Error::RecursiveSubmission => {
                write!(f, "blocking submission from the graphics thread")
            }
        }
    }
}

impl error::Error for Error {}

impl From<GraphicsApiError> for Error {
    fn from(err: GraphicsApiError) -> Error {
        Error::Graphics(err)
    }
}

/// The pair of numeric error codes reported by the windowing and rendering layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCodes {
    pub windowing: i32,
    pub rendering: u32,
}

impl ErrorCodes {
    pub const SUCCESS: ErrorCodes = ErrorCodes {
        windowing: WINDOWING_SUCCESS,
        rendering: RENDERING_NO_ERROR,
    };

    #[inline]
    pub fn is_success(&self) -> bool {
        self.windowing == WINDOWING_SUCCESS && self.rendering == RENDERING_NO_ERROR
    }
}

impl Default for ErrorCodes {
    fn default() -> ErrorCodes {
        ErrorCodes::SUCCESS
    }
}

/// A graphics API call failed. Carries the operation name and both error codes.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsApiError {
    pub operation: String,
    pub codes: ErrorCodes,
}

impl GraphicsApiError {
    pub fn new(operation: &str, codes: ErrorCodes) -> GraphicsApiError {
        GraphicsApiError {
            operation: operation.to_owned(),
            codes,
        }
    }

    #[inline]
    pub fn windowing_error(&self) -> WindowingApiError {
        WindowingApiError::from_code(self.codes.windowing)
    }
}

impl Display for GraphicsApiError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}({:?}) : {}({})",
            self.operation,
            self.codes.windowing,
            self.windowing_error(),
            self.codes.rendering,
            rendering_error_name(self.codes.rendering)
        )
    }
}

/// Abstraction of the errors that the windowing layer returns.
///
/// The numeric values follow EGL, which the software backend reuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowingApiError {
    /// No error.
    Success,
    /// Miscellaneous error.
    Failed,
    /// The display is not initialized, or could not be initialized.
    NotInitialized,
    /// A requested resource can't be accessed (for example a context bound in another thread).
    BadAccess,
    /// Resources for the requested operation couldn't be allocated.
    BadAlloc,
    /// An unrecognized attribute or attribute value was passed in the attribute list.
    BadAttribute,
    /// An argument does not name a valid pixel format configuration.
    BadConfig,
    /// An argument does not name a valid rendering context.
    BadContext,
    /// The current surface of the calling thread is no longer valid.
    BadCurrentSurface,
    /// An argument does not name a valid display connection.
    BadDisplay,
    /// Arguments are inconsistent.
    BadMatch,
    /// A native pixmap argument is not valid.
    BadNativePixmap,
    /// A native window argument is not valid.
    BadNativeWindow,
    /// One or more argument values are invalid.
    BadParameter,
    /// A surface argument does not name a valid surface.
    BadSurface,
    /// A power management event occurred; all state must be recreated.
    ContextLost,
}

impl WindowingApiError {
    pub fn from_code(code: i32) -> WindowingApiError {
        match code {
            0x3000 => WindowingApiError::Success,
            0x3001 => WindowingApiError::NotInitialized,
            0x3002 => WindowingApiError::BadAccess,
            0x3003 => WindowingApiError::BadAlloc,
            0x3004 => WindowingApiError::BadAttribute,
            0x3005 => WindowingApiError::BadConfig,
            0x3006 => WindowingApiError::BadContext,
            0x3007 => WindowingApiError::BadCurrentSurface,
            0x3008 => WindowingApiError::BadDisplay,
            0x3009 => WindowingApiError::BadMatch,
            0x300a => WindowingApiError::BadNativePixmap,
            0x300b => WindowingApiError::BadNativeWindow,
            0x300c => WindowingApiError::BadParameter,
            0x300d => WindowingApiError::BadSurface,
            0x300e => WindowingApiError::ContextLost,
            _ => WindowingApiError::Failed,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            WindowingApiError::Success => 0x3000,
            WindowingApiError::NotInitialized => 0x3001,
            WindowingApiError::BadAccess => 0x3002,
            WindowingApiError::BadAlloc => 0x3003,
            WindowingApiError::BadAttribute => 0x3004,
            WindowingApiError::BadConfig => 0x3005,
            WindowingApiError::BadContext => 0x3006,
            WindowingApiError::BadCurrentSurface => 0x3007,
            WindowingApiError::BadDisplay => 0x3008,
            WindowingApiError::BadMatch => 0x3009,
            WindowingApiError::BadNativePixmap => 0x300a,
            WindowingApiError::BadNativeWindow => 0x300b,
            WindowingApiError::BadParameter => 0x300c,
            WindowingApiError::BadSurface => 0x300d,
            WindowingApiError::ContextLost => 0x300e,
            WindowingApiError::Failed => -1,
        }
    }
}

// Names follow the GL error enumerants.
pub(crate) fn rendering_error_name(code: u32) -> &'static str {
    match code {
        0 => "NO_ERROR",
        0x0500 => "INVALID_ENUM",
        0x0501 => "INVALID_VALUE",
        0x0502 => "INVALID_OPERATION",
        0x0505 => "OUT_OF_MEMORY",
        0x0506 => "INVALID_FRAMEBUFFER_OPERATION",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_error_message_names_operation_and_codes() {
        let err = GraphicsApiError::new(
            "Texture buffer subregion",
            ErrorCodes {
                windowing: WINDOWING_SUCCESS,
                rendering: 0x0501,
            },
        );
        assert_eq!(
            err.to_string(),
            "Texture buffer subregion - 12288(Success) : 1281(INVALID_VALUE)"
        );
        assert_eq!(Error::from(err).code(), "FATAL");
    }

    #[test]
    fn test_unknown_windowing_code_is_generic_failure() {
        assert_eq!(WindowingApiError::from_code(0x300d), WindowingApiError::BadSurface);
        assert_eq!(WindowingApiError::from_code(0x1234), WindowingApiError::Failed);
    }

    #[test]
    fn test_identity_errors_are_recoverable() {
        assert!(Error::NoTexture(SurfaceHandle(7)).is_recoverable());
        assert_eq!(Error::NoTexture(SurfaceHandle(7)).code(), "NO_TEX");
        assert!(!Error::ContextLost.is_recoverable());
    }
}
