// swrend/src/device.rs
//
//! The abstract interface that all graphics backends conform to.
//!
//! A device is a thin, stateful command interface in the shape of EGL plus OpenGL ES. It is
//! created on, and only ever called from, the dedicated graphics thread. Calls that fail report
//! through `error_codes()` the way `eglGetError()`/`glGetError()` do; the graphics context checks
//! the codes after every call.

use crate::context::ContextAttributes;
use crate::error::{Error, ErrorCodes};

use euclid::default::{Rect, Size2D};
use std::fmt::Debug;

/// The shader stage being compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

/// A thread-affine handle to a display connection and its one rendering context.
pub trait Device {
    /// The platform drawable buffer a context-surface is bound to. Owned externally.
    type Drawable: Clone + Send + Sync + 'static;
    /// The context-surface binding a drawable buffer to the rendering context.
    type Surface: Debug + Send + Sync + 'static;
    /// A GPU texture name.
    type Texture: Copy + Debug + PartialEq + Send + Sync + 'static;
    type Shader: Copy + Debug;
    type Program: Copy + Debug;
    type UniformLocation: Clone + Debug;
    type Buffer: Copy + Debug;

    // Display and context.

    /// Opens the display connection, chooses a pixel format matching `attributes`, and creates
    /// the rendering context.
    fn initialize(&mut self, attributes: &ContextAttributes) -> Result<(), Error>;

    /// Destroys the rendering context and closes the display connection.
    fn terminate(&mut self);

    /// Returns and clears the pending windowing and rendering error codes.
    fn error_codes(&mut self) -> ErrorCodes;

    /// The largest width or height a texture may have, like `GL_MAX_TEXTURE_SIZE`.
    fn max_texture_size(&mut self) -> i32;

    // Context-surfaces.

    /// Binds a new context-surface to `drawable`. Returns `None` on failure.
    fn create_surface(
        &mut self,
        drawable: &Self::Drawable,
        size: &Size2D<i32>,
    ) -> Option<Self::Surface>;

    /// Makes `surface` the draw and read target of the rendering context.
    fn make_current(&mut self, surface: &Self::Surface) -> bool;

    /// Posts the back buffer of `surface` to its drawable buffer.
    fn swap_buffers(&mut self, surface: &Self::Surface) -> bool;

    fn destroy_surface(&mut self, surface: &Self::Surface) -> bool;

    // Shaders.

    fn create_shader(&mut self, kind: ShaderKind) -> Option<Self::Shader>;

    /// Sets the source of `shader` and compiles it, returning the compile status.
    fn compile_shader(&mut self, shader: Self::Shader, source: &str) -> bool;

    fn shader_info_log(&mut self, shader: Self::Shader) -> String;

    fn delete_shader(&mut self, shader: Self::Shader);

    fn create_program(&mut self) -> Option<Self::Program>;

    /// Attaches `shaders` to `program` and links it, returning the link status.
    fn link_program(&mut self, program: Self::Program, shaders: &[Self::Shader]) -> bool;

    fn program_info_log(&mut self, program: Self::Program) -> String;

    fn delete_program(&mut self, program: Self::Program);

    fn attrib_location(&mut self, program: Self::Program, name: &str) -> Option<u32>;

    fn uniform_location(
        &mut self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation>;

    fn use_program(&mut self, program: Option<Self::Program>);

    fn uniform_1i(&mut self, location: Option<&Self::UniformLocation>, value: i32);

    // Vertex data.

    /// Creates a static vertex buffer holding `data`.
    fn create_vertex_buffer(&mut self, data: &[f32]) -> Option<Self::Buffer>;

    fn delete_buffer(&mut self, buffer: Self::Buffer);

    /// Sources vertex attribute `index` from `buffer`, `components` floats per vertex, and
    /// enables the attribute array.
    fn vertex_attrib_buffer(&mut self, index: u32, buffer: Self::Buffer, components: i32);

    // Textures.

    fn create_texture(&mut self) -> Option<Self::Texture>;

    /// Binds `texture` to the active texture unit.
    fn bind_texture(&mut self, texture: Option<Self::Texture>);

    fn active_texture(&mut self, unit: u32);

    /// Samples the bound texture nearest-neighbor, clamped to its edges.
    fn set_nearest_clamped_sampling(&mut self);

    /// Allocates RGBA8 storage of `size` for the bound texture, initialized from `pixels`.
    fn texture_storage(&mut self, size: &Size2D<i32>, pixels: &[u8]);

    /// Replaces `region` of the bound texture with RGBA8 `pixels`.
    fn texture_sub_image(&mut self, region: &Rect<i32>, pixels: &[u8]);

    fn delete_texture(&mut self, texture: Self::Texture);

    // Drawing and read-back.

    fn viewport(&mut self, rect: &Rect<i32>);

    fn clear_color(&mut self, rgba: [f32; 4]);

    /// Clears the color buffer of the current surface.
    fn clear(&mut self);

    /// Draws `count` vertices starting at `first` as a triangle strip.
    fn draw_triangle_strip(&mut self, first: i32, count: i32);

    /// Blocks until all submitted commands have completed.
    fn finish(&mut self);

    /// Reads `rect` of the current surface as RGBA8, bottom row first.
    fn read_pixels(&mut self, rect: &Rect<i32>) -> Vec<u8>;
}
