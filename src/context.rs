// swrend/src/context.rs
//
//! The graphics context: the one rendering context, the shared quad geometry, and the single
//! compiled shader program.
//!
//! A `GraphicsContext` lives on the dedicated graphics thread and is only reached through the
//! engine's task queue. Every device call is followed by an error check; any failure is fatal
//! and leaves the context lost.

use crate::device::{Device, ShaderKind};
use crate::error::{Error, GraphicsApiError};

use bitflags::bitflags;
use euclid::default::{Point2D, Rect, Size2D};
use log::{debug, error, info};
use std::fmt::{self, Debug, Formatter};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ContextAttributeFlags: u8 {
        const ALPHA   = 0x01;
        const DEPTH   = 0x02;
        const STENCIL = 0x04;
    }
}

/// The pixel format requested when the context is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextAttributes {
    pub flags: ContextAttributeFlags,
    /// Bits per color channel.
    pub color_bits: u8,
    /// Bits in the depth buffer, if `DEPTH` is requested.
    pub depth_bits: u8,
}

impl ContextAttributes {
    pub fn alpha_bits(&self) -> u8 {
        if self.flags.contains(ContextAttributeFlags::ALPHA) {
            self.color_bits
        } else {
            0
        }
    }

    pub fn required_depth_bits(&self) -> u8 {
        if self.flags.contains(ContextAttributeFlags::DEPTH) {
            self.depth_bits
        } else {
            0
        }
    }

    pub fn required_stencil_bits(&self) -> u8 {
        if self.flags.contains(ContextAttributeFlags::STENCIL) {
            8
        } else {
            0
        }
    }
}

impl Default for ContextAttributes {
    /// 8-bit RGBA color with a 16-bit depth buffer.
    fn default() -> ContextAttributes {
        ContextAttributes {
            flags: ContextAttributeFlags::ALPHA | ContextAttributeFlags::DEPTH,
            color_bits: 8,
            depth_bits: 16,
        }
    }
}

// Pass through position and UV values, flipping V.
pub(crate) static VERTEX_SHADER_SOURCE: &str = "\
#version 100
precision mediump float;

attribute vec2 position;
attribute vec2 uv;

varying vec2 uvOut;

void main() {
    gl_Position = vec4(position, -0.5, 1.0);
    uvOut = vec2(uv.x, 1.0 - uv.y);
}
";

pub(crate) static FRAGMENT_SHADER_SOURCE: &str = "\
#version 100
precision mediump float;

varying vec2 uvOut;

uniform sampler2D tex;

void main() {
    gl_FragColor = texture2D(tex, uvOut);
}
";

// Flat square, drawn as a triangle strip.
static QUAD_POSITIONS: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
static QUAD_UVS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Ready,
    /// A graphics API call failed. Nothing further will run.
    Lost,
    TornDown,
}

struct QuadProgram<D: Device> {
    program: D::Program,
    texture_uniform: Option<D::UniformLocation>,
    position_attribute: u32,
    uv_attribute: u32,
}

struct QuadGeometry<D: Device> {
    positions: D::Buffer,
    uvs: D::Buffer,
}

pub struct GraphicsContext<D: Device> {
    device: D,
    attributes: ContextAttributes,
    state: ContextState,
    program: Option<QuadProgram<D>>,
    geometry: Option<QuadGeometry<D>>,
}

impl<D: Device> Debug for GraphicsContext<D> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "GraphicsContext({:?})", self.state)
    }
}

impl<D: Device> GraphicsContext<D> {
    pub fn new(device: D, attributes: ContextAttributes) -> GraphicsContext<D> {
        GraphicsContext {
            device,
            attributes,
            state: ContextState::Uninitialized,
            program: None,
            geometry: None,
        }
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        match self.state {
            ContextState::Ready => Ok(()),
            ContextState::Lost => Err(Error::ContextLost),
            ContextState::Uninitialized | ContextState::TornDown => Err(Error::NotInitialized),
        }
    }

    // Raises a fatal error if either layer reported one.
    fn check(&mut self, operation: &str) -> Result<(), Error> {
        let codes = self.device.error_codes();
        if codes.is_success() {
            return Ok(());
        }
        Err(self.lose(GraphicsApiError::new(operation, codes)))
    }

    // Raises a fatal error for a call that reported failure through its return value.
    fn fail(&mut self, operation: &str) -> Error {
        let codes = self.device.error_codes();
        self.lose(GraphicsApiError::new(operation, codes))
    }

    fn lose(&mut self, err: GraphicsApiError) -> Error {
        error!("Graphics context lost: {}", err);
        self.state = ContextState::Lost;
        Error::Graphics(err)
    }

    /// Opens the display, negotiates the pixel format, and creates the context.
    ///
    /// Calling this on a ready context does nothing.
    pub fn initialize(&mut self) -> Result<(), Error> {
        match self.state {
            ContextState::Ready => return Ok(()),
            ContextState::Lost => return Err(Error::ContextLost),
            ContextState::Uninitialized | ContextState::TornDown => {}
        }

        debug!("Setting up graphics context");
        if let Err(err) = self.device.initialize(&self.attributes) {
            error!("Failed to set up graphics context: {}", err);
            self.state = ContextState::Lost;
            return Err(err);
        }
        self.state = ContextState::Ready;
        info!("Graphics context ready");
        Ok(())
    }

    /// Binds a context-surface to `drawable` and makes it current. The first call also builds
    /// the shared shader program and quad geometry.
    pub fn create_presentable_surface(
        &mut self,
        drawable: &D::Drawable,
        size: &Size2D<i32>,
    ) -> Result<D::Surface, Error> {
        self.ensure_ready()?;

        let surface = match self.device.create_surface(drawable, size) {
            Some(surface) => surface,
            None => return Err(self.fail("Obtained no surface")),
        };
        self.check("Create surface")?;

        if !self.device.make_current(&surface) {
            return Err(self.fail("Failed to make surface current"));
        }
        self.check("Make surface current")?;

        if self.program.is_none() {
            self.build_program()?;
        }
        if self.geometry.is_none() {
            self.build_geometry()?;
        }
        debug!("Created surface {:?} of size {:?}", surface, size);
        Ok(surface)
    }

    fn build_program(&mut self) -> Result<(), Error> {
        let vertex_shader = self.compile_shader(ShaderKind::Vertex, VERTEX_SHADER_SOURCE)?;
        let fragment_shader = self.compile_shader(ShaderKind::Fragment, FRAGMENT_SHADER_SOURCE)?;

        let program = match self.device.create_program() {
            Some(program) => program,
            None => return Err(self.fail("Create program")),
        };
        self.check("Create program")?;

        let linked = self
            .device
            .link_program(program, &[vertex_shader, fragment_shader]);
        self.check("Link program")?;
        let log = self.device.program_info_log(program);
        debug!("Linking program {:?} : {}", program, log);

        // The program keeps the compiled stages alive.
        self.device.delete_shader(vertex_shader);
        self.device.delete_shader(fragment_shader);
        self.check("Release shaders")?;

        if !linked {
            self.device.delete_program(program);
            let err = Error::ProgramLinkFailed(log);
            self.state = ContextState::Lost;
            return Err(err);
        }

        let texture_uniform = self.device.uniform_location(program, "tex");
        self.check("Getting uniform location")?;
        let position_attribute = self.device.attrib_location(program, "position");
        let uv_attribute = self.device.attrib_location(program, "uv");
        self.check("Getting attribute locations")?;

        let (position_attribute, uv_attribute) = match (position_attribute, uv_attribute) {
            (Some(position), Some(uv)) => (position, uv),
            _ => {
                self.device.delete_program(program);
                self.state = ContextState::Lost;
                return Err(Error::ProgramLinkFailed(
                    "quad program lacks position or uv attribute".to_owned(),
                ));
            }
        };

        self.program = Some(QuadProgram {
            program,
            texture_uniform,
            position_attribute,
            uv_attribute,
        });
        Ok(())
    }

    fn compile_shader(&mut self, kind: ShaderKind, source: &str) -> Result<D::Shader, Error> {
        let shader = match self.device.create_shader(kind) {
            Some(shader) => shader,
            None => return Err(self.fail("Could not create shader")),
        };
        self.check("Create shader")?;

        let compiled = self.device.compile_shader(shader, source);
        self.check("Compile shader")?;

        let log = self.device.shader_info_log(shader);
        debug!("Compiling {:?} shader {:?} : {}", kind, shader, log);
        if !compiled {
            self.device.delete_shader(shader);
            self.state = ContextState::Lost;
            return Err(Error::ShaderCompilationFailed(log));
        }
        Ok(shader)
    }

    fn build_geometry(&mut self) -> Result<(), Error> {
        let positions = match self.device.create_vertex_buffer(&QUAD_POSITIONS) {
            Some(buffer) => buffer,
            None => return Err(self.fail("Create position buffer")),
        };
        let uvs = match self.device.create_vertex_buffer(&QUAD_UVS) {
            Some(buffer) => buffer,
            None => return Err(self.fail("Create uv buffer")),
        };
        self.check("Upload quad geometry")?;
        self.geometry = Some(QuadGeometry { positions, uvs });
        Ok(())
    }

    /// The largest width or height the device accepts for a texture.
    pub fn max_texture_size(&mut self) -> Result<i32, Error> {
        self.ensure_ready()?;

        let max_texture_size = self.device.max_texture_size();
        self.check("Get max texture size")?;
        Ok(max_texture_size)
    }

    /// Allocates a zeroed RGBA8 texture sampled nearest-neighbor and clamped to its edges.
    pub fn create_texture(&mut self, size: &Size2D<i32>) -> Result<D::Texture, Error> {
        self.ensure_ready()?;
        let zeroed = match rgba_len(size) {
            Some(len) => vec![0; len],
            None => {
                return Err(Error::InvalidSize {
                    width: size.width as i64,
                    height: size.height as i64,
                })
            }
        };

        let texture = match self.device.create_texture() {
            Some(texture) => texture,
            None => return Err(self.fail("Generate texture")),
        };
        self.check("Generate texture")?;

        self.device.bind_texture(Some(texture));
        self.check("Bind texture")?;

        self.device.set_nearest_clamped_sampling();
        self.check("Set texture parameters")?;

        self.device.texture_storage(size, &zeroed);
        self.check("Create texture buffer")?;

        debug!("Generated texture {:?} of size {:?}", texture, size);
        Ok(texture)
    }

    /// Sets the viewport to the full surface and makes `surface` the rendering target.
    pub fn bind_current(&mut self, surface: &D::Surface, size: &Size2D<i32>) -> Result<(), Error> {
        self.ensure_ready()?;

        self.device.viewport(&Rect::new(Point2D::origin(), *size));
        self.check("Set viewport")?;
        if !self.device.make_current(surface) {
            return Err(self.fail("Failed to make surface current"));
        }
        self.check("Make surface current")
    }

    /// Replaces `region` of `texture` with RGBA8 `pixels`, without conversion.
    pub fn upload_region(
        &mut self,
        texture: D::Texture,
        region: &Rect<i32>,
        pixels: &[u8],
    ) -> Result<(), Error> {
        self.ensure_ready()?;

        self.device.bind_texture(Some(texture));
        self.device.texture_sub_image(region, pixels);
        self.check("Texture buffer subregion")
    }

    /// Draws `texture` over the whole current surface through the quad program, then swaps.
    pub fn present_quad(&mut self, texture: D::Texture, surface: &D::Surface) -> Result<(), Error> {
        self.ensure_ready()?;
        let (program, texture_uniform, position_attribute, uv_attribute) = match self.program {
            Some(ref program) => (
                program.program,
                program.texture_uniform.clone(),
                program.position_attribute,
                program.uv_attribute,
            ),
            None => return Err(Error::NotInitialized),
        };
        let (positions, uvs) = match self.geometry {
            Some(ref geometry) => (geometry.positions, geometry.uvs),
            None => return Err(Error::NotInitialized),
        };

        self.device.clear_color([0.0, 0.0, 0.0, 0.0]);
        self.device.clear();
        self.check("Clear screen")?;

        self.device.use_program(Some(program));
        self.check("Set shader program")?;

        self.device.active_texture(0);
        self.check("Activate texture 0")?;
        self.device.bind_texture(Some(texture));
        self.check(&format!("Binding texture {:?}", texture))?;
        self.device.uniform_1i(texture_uniform.as_ref(), 0);
        self.check("Set texture uniform")?;

        self.device.vertex_attrib_buffer(position_attribute, positions, 2);
        self.check("Enable Attribute 0")?;
        self.device.vertex_attrib_buffer(uv_attribute, uvs, 2);
        self.check("Enable Attribute 1")?;

        self.device.draw_triangle_strip(0, 4);
        self.check("Draw arrays")?;
        self.device.finish();
        self.check("Finished GL")?;

        if !self.device.swap_buffers(surface) {
            return Err(self.fail("Swapped buffers"));
        }
        self.check("Swapped buffers")
    }

    /// Reads the current viewport as RGBA8 with the origin at the bottom left.
    pub fn readback(&mut self, size: &Size2D<i32>) -> Result<Vec<u8>, Error> {
        self.ensure_ready()?;

        let pixels = self.device.read_pixels(&Rect::new(Point2D::origin(), *size));
        self.check("Read pixels")?;
        Ok(pixels)
    }

    pub fn delete_texture(&mut self, texture: D::Texture) -> Result<(), Error> {
        self.ensure_ready()?;

        self.device.delete_texture(texture);
        self.check("Delete texture")?;
        debug!("Deleted texture {:?}", texture);
        Ok(())
    }

    /// Unbinds and destroys a context-surface. The drawable buffer it was bound to is untouched.
    pub fn destroy_surface(&mut self, surface: &D::Surface) -> Result<(), Error> {
        self.ensure_ready()?;

        if !self.device.destroy_surface(surface) {
            return Err(self.fail("Destroy surface"));
        }
        self.check("Destroy surface")
    }

    /// Releases the program and quad geometry and closes the display.
    pub fn teardown(&mut self) {
        match self.state {
            ContextState::Uninitialized | ContextState::TornDown => return,
            ContextState::Ready | ContextState::Lost => {}
        }

        if let Some(program) = self.program.take() {
            self.device.use_program(None);
            self.device.delete_program(program.program);
        }
        if let Some(geometry) = self.geometry.take() {
            self.device.delete_buffer(geometry.positions);
            self.device.delete_buffer(geometry.uvs);
        }
        // Errors no longer matter: the context is going away.
        let codes = self.device.error_codes();
        if !codes.is_success() {
            debug!("Ignoring errors during teardown: {:?}", codes);
        }

        self.device.terminate();
        self.state = ContextState::TornDown;
        info!("Graphics context torn down");
    }
}

/// Byte length of an RGBA8 buffer of `size`, or `None` if a dimension is negative or the length
/// overflows.
pub fn rgba_len(size: &Size2D<i32>) -> Option<usize> {
    let width = usize::try_from(size.width).ok()?;
    let height = usize::try_from(size.height).ok()?;
    width.checked_mul(height)?.checked_mul(4)
}

#[cfg(test)]
mod tests {
    use super::rgba_len;

    use euclid::default::Size2D;

    #[test]
    fn test_rgba_len_rejects_negative_sizes() {
        assert_eq!(rgba_len(&Size2D::new(3, 2)), Some(24));
        assert_eq!(rgba_len(&Size2D::new(0, 5)), Some(0));
        assert_eq!(rgba_len(&Size2D::new(-1, 5)), None);
        assert_eq!(rgba_len(&Size2D::new(5, i32::MIN)), None);
    }
}
