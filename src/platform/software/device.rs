// swrend/src/platform/software/device.rs
//
//! A device that renders with the CPU.
//!
//! It keeps the same state a GL ES context does (texture units, the program in use, attribute
//! bindings, the viewport) and reports misuse through EGL- and GL-style error codes, so the
//! graphics context can't tell it apart from a real driver. Shaders are checked for their
//! interface (attributes, uniforms, and an entry point); the quad program itself runs as a fixed
//! pass that samples the texture bound to the program's sampler.

use super::compositor::Drawable;
use super::raster::{self, Sampler, Target};
use crate::context::{rgba_len, ContextAttributes};
use crate::device::{self, ShaderKind};
use crate::error::{Error, ErrorCodes, RENDERING_NO_ERROR, WINDOWING_SUCCESS};
use crate::surface;

use euclid::default::{Point2D, Rect, Size2D};
use fnv::FnvHashMap;
use log::debug;

const NOT_INITIALIZED: i32 = 0x3001;
const BAD_ALLOC: i32 = 0x3003;
const BAD_NATIVE_WINDOW: i32 = 0x300b;
const BAD_SURFACE: i32 = 0x300d;

const INVALID_ENUM: u32 = 0x0500;
const INVALID_VALUE: u32 = 0x0501;
const INVALID_OPERATION: u32 = 0x0502;
const OUT_OF_MEMORY: u32 = 0x0505;
const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

const MAX_TEXTURE_UNITS: u32 = 8;
const MAX_VERTEX_ATTRIBS: u32 = 16;
const DEFAULT_MAX_TEXTURE_SIZE: i32 = 4096;

/// A framebuffer configuration the device can create a context with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
    pub depth_bits: u8,
    pub stencil_bits: u8,
}

impl PixelFormat {
    pub const RGBA8_DEPTH16: PixelFormat = PixelFormat {
        red_bits: 8,
        green_bits: 8,
        blue_bits: 8,
        alpha_bits: 8,
        depth_bits: 16,
        stencil_bits: 0,
    };

    pub const RGBA8_DEPTH24_STENCIL8: PixelFormat = PixelFormat {
        red_bits: 8,
        green_bits: 8,
        blue_bits: 8,
        alpha_bits: 8,
        depth_bits: 24,
        stencil_bits: 8,
    };

    pub const RGB565: PixelFormat = PixelFormat {
        red_bits: 5,
        green_bits: 6,
        blue_bits: 5,
        alpha_bits: 0,
        depth_bits: 0,
        stencil_bits: 0,
    };

    /// Sizes are minimums, as with `eglChooseConfig`.
    pub fn satisfies(&self, attributes: &ContextAttributes) -> bool {
        self.red_bits >= attributes.color_bits
            && self.green_bits >= attributes.color_bits
            && self.blue_bits >= attributes.color_bits
            && self.alpha_bits >= attributes.alpha_bits()
            && self.depth_bits >= attributes.required_depth_bits()
            && self.stencil_bits >= attributes.required_stencil_bits()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Texture(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shader(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Program(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Buffer(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLocation {
    program: u32,
    index: u32,
}

/// A context-surface bound to a `Drawable`.
#[derive(Debug)]
pub struct Surface {
    id: u32,
    size: Size2D<i32>,
}

impl Surface {
    #[inline]
    pub fn size(&self) -> Size2D<i32> {
        self.size
    }
}

struct SurfaceData {
    drawable: Drawable,
    size: Size2D<i32>,
    // RGBA8, bottom row first.
    back_buffer: Vec<u8>,
}

struct TextureData {
    size: Size2D<i32>,
    pixels: Vec<u8>,
    // Default parameters expect mipmaps, which leaves the texture incomplete.
    nearest_clamped: bool,
}

struct ShaderData {
    kind: ShaderKind,
    compiled: bool,
    attributes: Vec<String>,
    uniforms: Vec<String>,
    samplers: Vec<String>,
    log: String,
}

#[derive(Default)]
struct ProgramData {
    linked: bool,
    attributes: Vec<String>,
    uniforms: Vec<String>,
    // Index of the uniform the quad pass samples through.
    sampler: Option<u32>,
    uniform_values: FnvHashMap<u32, i32>,
    log: String,
}

#[derive(Clone, Copy)]
struct AttributeBinding {
    buffer: u32,
    components: i32,
}

pub struct Device {
    pixel_formats: Vec<PixelFormat>,
    display_available: bool,
    max_texture_size: i32,
    texture_memory: Option<usize>,

    pixel_format: Option<PixelFormat>,
    windowing_error: i32,
    rendering_error: u32,
    next_name: u32,

    surfaces: FnvHashMap<u32, SurfaceData>,
    current_surface: Option<u32>,
    viewport: Option<Rect<i32>>,
    clear_color: [f32; 4],

    textures: FnvHashMap<u32, TextureData>,
    texture_units: [Option<u32>; MAX_TEXTURE_UNITS as usize],
    active_unit: u32,

    shaders: FnvHashMap<u32, ShaderData>,
    programs: FnvHashMap<u32, ProgramData>,
    program_in_use: Option<u32>,

    buffers: FnvHashMap<u32, Vec<f32>>,
    attributes: FnvHashMap<u32, AttributeBinding>,
}

impl Default for Device {
    fn default() -> Device {
        Device::new()
    }
}

impl Device {
    /// A device offering an 8-bit RGBA format with a 16-bit depth buffer, an 8-bit RGBA format
    /// with depth and stencil, and RGB565.
    pub fn new() -> Device {
        Device {
            pixel_formats: vec![
                PixelFormat::RGBA8_DEPTH16,
                PixelFormat::RGBA8_DEPTH24_STENCIL8,
                PixelFormat::RGB565,
            ],
            display_available: true,
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            texture_memory: None,
            pixel_format: None,
            windowing_error: WINDOWING_SUCCESS,
            rendering_error: RENDERING_NO_ERROR,
            next_name: 1,
            surfaces: FnvHashMap::default(),
            current_surface: None,
            viewport: None,
            clear_color: [0.0; 4],
            textures: FnvHashMap::default(),
            texture_units: [None; MAX_TEXTURE_UNITS as usize],
            active_unit: 0,
            shaders: FnvHashMap::default(),
            programs: FnvHashMap::default(),
            program_in_use: None,
            buffers: FnvHashMap::default(),
            attributes: FnvHashMap::default(),
        }
    }

    /// Replaces the formats offered by the display.
    pub fn with_pixel_formats(mut self, pixel_formats: Vec<PixelFormat>) -> Device {
        self.pixel_formats = pixel_formats;
        self
    }

    /// Makes `initialize` fail as if no display connection could be opened.
    pub fn without_display(mut self) -> Device {
        self.display_available = false;
        self
    }

    /// Limits the width and height of textures and surfaces.
    pub fn with_max_texture_size(mut self, max_texture_size: i32) -> Device {
        self.max_texture_size = max_texture_size;
        self
    }

    /// Limits the bytes of texture storage held at once. Storage beyond it raises
    /// `GL_OUT_OF_MEMORY`.
    pub fn with_texture_memory(mut self, bytes: usize) -> Device {
        self.texture_memory = Some(bytes);
        self
    }

    /// The format chosen at initialization.
    #[inline]
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.pixel_format
    }

    // Errors are sticky until queried, like `glGetError`.
    fn windowing_fault(&mut self, code: i32) {
        if self.windowing_error == WINDOWING_SUCCESS {
            self.windowing_error = code;
        }
    }

    fn rendering_fault(&mut self, code: u32) {
        if self.rendering_error == RENDERING_NO_ERROR {
            self.rendering_error = code;
        }
    }

    fn display_initialized(&mut self) -> bool {
        if self.pixel_format.is_none() {
            self.windowing_fault(NOT_INITIALIZED);
            return false;
        }
        true
    }

    // GL calls need a context.
    fn has_context(&mut self) -> bool {
        if self.pixel_format.is_none() {
            self.rendering_fault(INVALID_OPERATION);
            return false;
        }
        true
    }

    fn current_surface_id(&mut self) -> Option<u32> {
        if !self.has_context() {
            return None;
        }
        if self.current_surface.is_none() {
            self.rendering_fault(INVALID_FRAMEBUFFER_OPERATION);
        }
        self.current_surface
    }

    fn gen_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn bound_texture(&mut self) -> Option<u32> {
        let bound = self.texture_units[self.active_unit as usize];
        if bound.is_none() {
            self.rendering_fault(INVALID_OPERATION);
        }
        bound
    }

    fn linked_program(&mut self, program: u32) -> Option<&mut ProgramData> {
        let linked = match self.programs.get(&program) {
            None => {
                self.rendering_fault(INVALID_VALUE);
                return None;
            }
            Some(data) => data.linked,
        };
        if !linked {
            self.rendering_fault(INVALID_OPERATION);
            return None;
        }
        self.programs.get_mut(&program)
    }

    fn vertices(&mut self, index: u32, first: usize, count: usize) -> Option<Vec<[f32; 2]>> {
        let binding = match self.attributes.get(&index) {
            Some(binding) => *binding,
            None => {
                self.rendering_fault(INVALID_OPERATION);
                return None;
            }
        };
        let len = self.buffers.get(&binding.buffer).map_or(0, Vec::len);
        let stride = binding.components as usize;
        if stride < 2 || (first + count) * stride > len {
            self.rendering_fault(INVALID_OPERATION);
            return None;
        }
        let data = self.buffers.get(&binding.buffer)?;
        Some(
            (first..first + count)
                .map(|vertex| [data[vertex * stride], data[vertex * stride + 1]])
                .collect(),
        )
    }
}

// Collects the names of declarations beginning with `qualifier`.
fn declared_names(source: &str, qualifier: &str) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(qualifier) && line.ends_with(';'))
        .filter_map(|line| line.trim_end_matches(';').split_whitespace().last())
        .map(str::to_owned)
        .collect()
}

fn compile(kind: ShaderKind, source: &str) -> ShaderData {
    let attributes = declared_names(source, "attribute ");
    let uniforms = declared_names(source, "uniform ");
    let samplers = declared_names(source, "uniform sampler2D ");

    let opened = source.matches('{').count();
    let closed = source.matches('}').count();
    let log = if !source.contains("void main") {
        "ERROR: 0:1: 'main' : function not defined".to_owned()
    } else if opened != closed {
        "ERROR: 0:1: '' : syntax error: unbalanced braces".to_owned()
    } else if kind == ShaderKind::Fragment && !attributes.is_empty() {
        "ERROR: 0:1: 'attribute' : supported in vertex shaders only".to_owned()
    } else {
        String::new()
    };

    ShaderData {
        kind,
        compiled: log.is_empty(),
        attributes,
        uniforms,
        samplers,
        log,
    }
}

impl device::Device for Device {
    type Drawable = Drawable;
    type Surface = Surface;
    type Texture = Texture;
    type Shader = Shader;
    type Program = Program;
    type UniformLocation = UniformLocation;
    type Buffer = Buffer;

    fn initialize(&mut self, attributes: &ContextAttributes) -> Result<(), Error> {
        if !self.display_available {
            return Err(Error::NoDisplay);
        }
        if self.pixel_format.is_some() {
            return Ok(());
        }

        let pixel_format = self
            .pixel_formats
            .iter()
            .find(|format| format.satisfies(attributes))
            .cloned()
            .ok_or(Error::NoPixelFormatFound)?;
        debug!("Chose pixel format {:?}", pixel_format);
        self.pixel_format = Some(pixel_format);
        Ok(())
    }

    fn terminate(&mut self) {
        let fresh = Device::new();
        *self = Device {
            pixel_formats: self.pixel_formats.split_off(0),
            display_available: self.display_available,
            max_texture_size: self.max_texture_size,
            texture_memory: self.texture_memory,
            next_name: self.next_name,
            ..fresh
        };
    }

    fn error_codes(&mut self) -> ErrorCodes {
        let codes = ErrorCodes {
            windowing: self.windowing_error,
            rendering: self.rendering_error,
        };
        self.windowing_error = WINDOWING_SUCCESS;
        self.rendering_error = RENDERING_NO_ERROR;
        codes
    }

    fn max_texture_size(&mut self) -> i32 {
        if !self.has_context() {
            return 0;
        }
        self.max_texture_size
    }

    fn create_surface(&mut self, drawable: &Drawable, size: &Size2D<i32>) -> Option<Surface> {
        if !self.display_initialized() {
            return None;
        }

        // Window surfaces take the drawable's size; fall back to the requested one if unset.
        let mut surface_size = drawable.default_size();
        if surface_size.is_empty() {
            surface_size = *size;
        }
        if surface_size.width <= 0 || surface_size.height <= 0 {
            self.windowing_fault(BAD_NATIVE_WINDOW);
            return None;
        }
        let len = match rgba_len(&surface_size) {
            Some(len)
                if surface_size.width <= self.max_texture_size
                    && surface_size.height <= self.max_texture_size =>
            {
                len
            }
            _ => {
                self.windowing_fault(BAD_ALLOC);
                return None;
            }
        };

        let id = self.gen_name();
        self.surfaces.insert(
            id,
            SurfaceData {
                drawable: drawable.clone(),
                size: surface_size,
                back_buffer: vec![0; len],
            },
        );
        Some(Surface {
            id,
            size: surface_size,
        })
    }

    fn make_current(&mut self, surface: &Surface) -> bool {
        if !self.display_initialized() {
            return false;
        }
        let size = match self.surfaces.get(&surface.id) {
            Some(data) => data.size,
            None => {
                self.windowing_fault(BAD_SURFACE);
                return false;
            }
        };
        self.current_surface = Some(surface.id);
        // The viewport starts out covering the first surface made current.
        if self.viewport.is_none() {
            self.viewport = Some(Rect::new(Point2D::origin(), size));
        }
        true
    }

    fn swap_buffers(&mut self, surface: &Surface) -> bool {
        if !self.display_initialized() {
            return false;
        }
        if self.current_surface != Some(surface.id) {
            self.windowing_fault(BAD_SURFACE);
            return false;
        }
        let data = match self.surfaces.get(&surface.id) {
            Some(data) => data,
            None => {
                self.windowing_fault(BAD_SURFACE);
                return false;
            }
        };

        // The back buffer is preserved across the swap.
        let mut front = data.back_buffer.clone();
        surface::flip_rows(&mut front, data.size.width as usize);
        let mut buffer = data.drawable.lock();
        buffer.size = data.size;
        buffer.pixels = front;
        buffer.swaps += 1;
        true
    }

    fn destroy_surface(&mut self, surface: &Surface) -> bool {
        if !self.display_initialized() {
            return false;
        }
        if self.surfaces.remove(&surface.id).is_none() {
            self.windowing_fault(BAD_SURFACE);
            return false;
        }
        if self.current_surface == Some(surface.id) {
            self.current_surface = None;
        }
        true
    }

    fn create_shader(&mut self, kind: ShaderKind) -> Option<Shader> {
        if !self.has_context() {
            return None;
        }
        let name = self.gen_name();
        self.shaders.insert(
            name,
            ShaderData {
                kind,
                compiled: false,
                attributes: vec![],
                uniforms: vec![],
                samplers: vec![],
                log: String::new(),
            },
        );
        Some(Shader(name))
    }

    fn compile_shader(&mut self, shader: Shader, source: &str) -> bool {
        let kind = match self.shaders.get(&shader.0) {
            Some(data) => data.kind,
            None => {
                self.rendering_fault(INVALID_VALUE);
                return false;
            }
        };
        let compiled = compile(kind, source);
        let status = compiled.compiled;
        self.shaders.insert(shader.0, compiled);
        status
    }

    fn shader_info_log(&mut self, shader: Shader) -> String {
        match self.shaders.get(&shader.0) {
            Some(data) => data.log.clone(),
            None => {
                self.rendering_fault(INVALID_VALUE);
                String::new()
            }
        }
    }

    fn delete_shader(&mut self, shader: Shader) {
        self.shaders.remove(&shader.0);
    }

    fn create_program(&mut self) -> Option<Program> {
        if !self.has_context() {
            return None;
        }
        let name = self.gen_name();
        self.programs.insert(name, ProgramData::default());
        Some(Program(name))
    }

    fn link_program(&mut self, program: Program, shaders: &[Shader]) -> bool {
        if !self.programs.contains_key(&program.0) {
            self.rendering_fault(INVALID_VALUE);
            return false;
        }

        if shaders
            .iter()
            .any(|shader| !self.shaders.contains_key(&shader.0))
        {
            self.rendering_fault(INVALID_VALUE);
            return false;
        }
        let stages: Vec<&ShaderData> = shaders
            .iter()
            .filter_map(|shader| self.shaders.get(&shader.0))
            .collect();

        let vertex = stages.iter().find(|data| data.kind == ShaderKind::Vertex);
        let fragment = stages.iter().find(|data| data.kind == ShaderKind::Fragment);
        let linked = match (vertex, fragment) {
            (Some(vertex), Some(fragment)) if vertex.compiled && fragment.compiled => {
                let mut uniforms = vertex.uniforms.clone();
                for uniform in &fragment.uniforms {
                    if !uniforms.contains(uniform) {
                        uniforms.push(uniform.clone());
                    }
                }
                let sampler = uniforms
                    .iter()
                    .position(|uniform| {
                        vertex.samplers.contains(uniform) || fragment.samplers.contains(uniform)
                    })
                    .map(|index| index as u32);
                ProgramData {
                    linked: true,
                    attributes: vertex.attributes.clone(),
                    uniforms,
                    sampler,
                    uniform_values: FnvHashMap::default(),
                    log: String::new(),
                }
            }
            _ => ProgramData {
                log: "Link error: a compiled vertex and fragment shader are required".to_owned(),
                ..ProgramData::default()
            },
        };

        let status = linked.linked;
        self.programs.insert(program.0, linked);
        status
    }

    fn program_info_log(&mut self, program: Program) -> String {
        match self.programs.get(&program.0) {
            Some(data) => data.log.clone(),
            None => {
                self.rendering_fault(INVALID_VALUE);
                String::new()
            }
        }
    }

    fn delete_program(&mut self, program: Program) {
        self.programs.remove(&program.0);
        if self.program_in_use == Some(program.0) {
            self.program_in_use = None;
        }
    }

    fn attrib_location(&mut self, program: Program, name: &str) -> Option<u32> {
        let data = self.linked_program(program.0)?;
        data.attributes
            .iter()
            .position(|attribute| attribute == name)
            .map(|index| index as u32)
    }

    fn uniform_location(&mut self, program: Program, name: &str) -> Option<UniformLocation> {
        let data = self.linked_program(program.0)?;
        data.uniforms
            .iter()
            .position(|uniform| uniform == name)
            .map(|index| UniformLocation {
                program: program.0,
                index: index as u32,
            })
    }

    fn use_program(&mut self, program: Option<Program>) {
        match program {
            None => self.program_in_use = None,
            Some(program) => {
                if self.linked_program(program.0).is_some() {
                    self.program_in_use = Some(program.0);
                }
            }
        }
    }

    fn uniform_1i(&mut self, location: Option<&UniformLocation>, value: i32) {
        // A missing location is silently ignored, like location -1.
        let location = match location {
            Some(location) => *location,
            None => return,
        };
        if self.program_in_use != Some(location.program) {
            self.rendering_fault(INVALID_OPERATION);
            return;
        }
        if let Some(data) = self.programs.get_mut(&location.program) {
            data.uniform_values.insert(location.index, value);
        }
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Option<Buffer> {
        if !self.has_context() {
            return None;
        }
        let name = self.gen_name();
        self.buffers.insert(name, data.to_vec());
        Some(Buffer(name))
    }

    fn delete_buffer(&mut self, buffer: Buffer) {
        self.buffers.remove(&buffer.0);
        self.attributes
            .retain(|_, binding| binding.buffer != buffer.0);
    }

    fn vertex_attrib_buffer(&mut self, index: u32, buffer: Buffer, components: i32) {
        if index >= MAX_VERTEX_ATTRIBS || !(1..=4).contains(&components) {
            self.rendering_fault(INVALID_VALUE);
            return;
        }
        if !self.buffers.contains_key(&buffer.0) {
            self.rendering_fault(INVALID_OPERATION);
            return;
        }
        self.attributes.insert(
            index,
            AttributeBinding {
                buffer: buffer.0,
                components,
            },
        );
    }

    fn create_texture(&mut self) -> Option<Texture> {
        if !self.has_context() {
            return None;
        }
        let name = self.gen_name();
        self.textures.insert(
            name,
            TextureData {
                size: Size2D::zero(),
                pixels: vec![],
                nearest_clamped: false,
            },
        );
        Some(Texture(name))
    }

    fn bind_texture(&mut self, texture: Option<Texture>) {
        if let Some(texture) = texture {
            if !self.textures.contains_key(&texture.0) {
                self.rendering_fault(INVALID_VALUE);
                return;
            }
        }
        self.texture_units[self.active_unit as usize] = texture.map(|texture| texture.0);
    }

    fn active_texture(&mut self, unit: u32) {
        if unit >= MAX_TEXTURE_UNITS {
            self.rendering_fault(INVALID_ENUM);
            return;
        }
        self.active_unit = unit;
    }

    fn set_nearest_clamped_sampling(&mut self) {
        if let Some(name) = self.bound_texture() {
            if let Some(data) = self.textures.get_mut(&name) {
                data.nearest_clamped = true;
            }
        }
    }

    fn texture_storage(&mut self, size: &Size2D<i32>, pixels: &[u8]) {
        let name = match self.bound_texture() {
            Some(name) => name,
            None => return,
        };
        if size.width < 0
            || size.height < 0
            || size.width > self.max_texture_size
            || size.height > self.max_texture_size
        {
            self.rendering_fault(INVALID_VALUE);
            return;
        }
        let len = match rgba_len(size) {
            Some(len) => len,
            None => {
                self.rendering_fault(INVALID_VALUE);
                return;
            }
        };
        if pixels.len() < len {
            self.rendering_fault(INVALID_OPERATION);
            return;
        }
        if let Some(limit) = self.texture_memory {
            let held: usize = self
                .textures
                .iter()
                .filter(|&(&other, _)| other != name)
                .map(|(_, data)| data.pixels.len())
                .sum();
            if held + len > limit {
                self.rendering_fault(OUT_OF_MEMORY);
                return;
            }
        }
        if let Some(data) = self.textures.get_mut(&name) {
            data.size = *size;
            data.pixels = pixels[..len].to_vec();
        }
    }

    fn texture_sub_image(&mut self, region: &Rect<i32>, pixels: &[u8]) {
        let name = match self.bound_texture() {
            Some(name) => name,
            None => return,
        };
        let texture_size = match self.textures.get(&name) {
            Some(data) => data.size,
            None => return,
        };
        if region.origin.x < 0
            || region.origin.y < 0
            || region.size.width < 0
            || region.size.height < 0
            || region.max_x() > texture_size.width
            || region.max_y() > texture_size.height
        {
            self.rendering_fault(INVALID_VALUE);
            return;
        }
        if rgba_len(&region.size).map_or(true, |len| pixels.len() < len) {
            self.rendering_fault(INVALID_OPERATION);
            return;
        }

        let data = match self.textures.get_mut(&name) {
            Some(data) => data,
            None => return,
        };
        let row_len = region.size.width as usize * 4;
        for row in 0..region.size.height as usize {
            let dst_row = region.origin.y as usize + row;
            let dst = (dst_row * texture_size.width as usize + region.origin.x as usize) * 4;
            let src = row * row_len;
            data.pixels[dst..dst + row_len].copy_from_slice(&pixels[src..src + row_len]);
        }
    }

    fn delete_texture(&mut self, texture: Texture) {
        if self.textures.remove(&texture.0).is_some() {
            for unit in self.texture_units.iter_mut() {
                if *unit == Some(texture.0) {
                    *unit = None;
                }
            }
        }
    }

    fn viewport(&mut self, rect: &Rect<i32>) {
        if rect.size.width < 0 || rect.size.height < 0 {
            self.rendering_fault(INVALID_VALUE);
            return;
        }
        self.viewport = Some(*rect);
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn clear(&mut self) {
        let id = match self.current_surface_id() {
            Some(id) => id,
            None => return,
        };
        if let Some(data) = self.surfaces.get_mut(&id) {
            let mut target = Target {
                pixels: &mut data.back_buffer,
                size: data.size,
            };
            raster::clear(&mut target, self.clear_color);
        }
    }

    fn draw_triangle_strip(&mut self, first: i32, count: i32) {
        if first < 0 || count < 0 {
            self.rendering_fault(INVALID_VALUE);
            return;
        }
        let id = match self.current_surface_id() {
            Some(id) => id,
            None => return,
        };
        let program = self
            .program_in_use
            .and_then(|name| self.programs.get(&name))
            .map(|program| {
                let unit = program
                    .sampler
                    .and_then(|index| program.uniform_values.get(&index).cloned())
                    .unwrap_or(0);
                (program.attributes.len(), unit)
            });
        // The first attribute is the clip-space position, the second the texture coordinate.
        let unit = match program {
            Some((attributes, unit)) if attributes >= 2 => unit,
            _ => {
                self.rendering_fault(INVALID_OPERATION);
                return;
            }
        };
        if count < 3 {
            return;
        }

        let (first, count) = (first as usize, count as usize);
        let positions = match self.vertices(0, first, count) {
            Some(positions) => positions,
            None => return,
        };
        let uvs = match self.vertices(1, first, count) {
            Some(uvs) => uvs,
            None => return,
        };
        if unit < 0 || unit as u32 >= MAX_TEXTURE_UNITS {
            self.rendering_fault(INVALID_OPERATION);
            return;
        }

        let viewport = self.viewport.unwrap_or_else(Rect::zero);
        let texture = self.texture_units[unit as usize]
            .and_then(|name| self.textures.get(&name))
            .filter(|texture| texture.nearest_clamped);
        let sampler = match texture {
            Some(texture) => Sampler {
                pixels: &texture.pixels,
                size: texture.size,
            },
            None => Sampler {
                pixels: &[],
                size: Size2D::zero(),
            },
        };
        if let Some(data) = self.surfaces.get_mut(&id) {
            let mut target = Target {
                pixels: &mut data.back_buffer,
                size: data.size,
            };
            raster::draw_triangle_strip(&mut target, &viewport, &positions, &uvs, &sampler);
        }
    }

    fn finish(&mut self) {}

    fn read_pixels(&mut self, rect: &Rect<i32>) -> Vec<u8> {
        if rect.size.width < 0 || rect.size.height < 0 {
            self.rendering_fault(INVALID_VALUE);
            return vec![];
        }
        let id = match self.current_surface_id() {
            Some(id) => id,
            None => return vec![],
        };
        let data = match self.surfaces.get(&id) {
            Some(data) => data,
            None => return vec![],
        };

        // Pixels outside the surface read as zero.
        let mut pixels = match rgba_len(&rect.size) {
            Some(len) => vec![0; len],
            None => {
                self.rendering_fault(INVALID_VALUE);
                return vec![];
            }
        };
        let bounds = Rect::new(Point2D::origin(), data.size);
        for row in 0..rect.size.height {
            for column in 0..rect.size.width {
                let point = Point2D::new(rect.origin.x + column, rect.origin.y + row);
                if !bounds.contains(point) {
                    continue;
                }
                let src = ((point.y * data.size.width + point.x) * 4) as usize;
                let dst = ((row * rect.size.width + column) * 4) as usize;
                pixels[dst..dst + 4].copy_from_slice(&data.back_buffer[src..src + 4]);
            }
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::{Device, PixelFormat, Texture};
    use crate::context::{ContextAttributeFlags, ContextAttributes};
    use crate::device::Device as DeviceInterface;
    use crate::device::ShaderKind;
    use crate::error::{Error, ErrorCodes};
    use crate::platform::software::Drawable;

    use euclid::default::{Point2D, Rect, Size2D};

    fn ready_device() -> Device {
        let mut device = Device::new();
        device.initialize(&ContextAttributes::default()).unwrap();
        device
    }

    #[test]
    fn test_default_attributes_choose_rgba8_depth16() {
        let device = ready_device();
        assert_eq!(device.pixel_format(), Some(PixelFormat::RGBA8_DEPTH16));
    }

    #[test]
    fn test_stencil_request_chooses_depth_stencil_format() {
        let mut device = Device::new();
        let attributes = ContextAttributes {
            flags: ContextAttributeFlags::all(),
            ..ContextAttributes::default()
        };
        device.initialize(&attributes).unwrap();
        assert_eq!(
            device.pixel_format(),
            Some(PixelFormat::RGBA8_DEPTH24_STENCIL8)
        );
    }

    #[test]
    fn test_initialize_reports_missing_display_and_formats() {
        let mut device = Device::new().without_display();
        match device.initialize(&ContextAttributes::default()) {
            Err(Error::NoDisplay) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        let mut device = Device::new().with_pixel_formats(vec![PixelFormat::RGB565]);
        match device.initialize(&ContextAttributes::default()) {
            Err(Error::NoPixelFormatFound) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_calls_before_initialize_raise_errors() {
        let mut device = Device::new();
        assert!(device.create_texture().is_none());
        assert_eq!(device.error_codes().rendering, 0x0502);
        assert!(device.create_surface(&Drawable::new(), &Size2D::new(4, 4)).is_none());
        assert_eq!(device.error_codes().windowing, 0x3001);
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);
    }

    #[test]
    fn test_sub_image_outside_texture_is_invalid_value() {
        let mut device = ready_device();
        let texture = device.create_texture().unwrap();
        device.bind_texture(Some(texture));
        device.texture_storage(&Size2D::new(4, 4), &[0; 64]);
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);

        let region = Rect::new(Point2D::new(2, 2), Size2D::new(4, 4));
        device.texture_sub_image(&region, &[0; 64]);
        assert_eq!(device.error_codes().rendering, 0x0501);
    }

    #[test]
    fn test_binding_deleted_texture_fails() {
        let mut device = ready_device();
        let texture = device.create_texture().unwrap();
        device.delete_texture(texture);
        device.bind_texture(Some(texture));
        assert_eq!(device.error_codes().rendering, 0x0501);
        device.bind_texture(Some(Texture(999)));
        assert_eq!(device.error_codes().rendering, 0x0501);
    }

    #[test]
    fn test_texture_storage_respects_size_limit() {
        let mut device = Device::new().with_max_texture_size(16);
        assert_eq!(device.max_texture_size(), 0);
        assert_eq!(device.error_codes().rendering, 0x0502);

        device.initialize(&ContextAttributes::default()).unwrap();
        assert_eq!(device.max_texture_size(), 16);
        let texture = device.create_texture().unwrap();
        device.bind_texture(Some(texture));
        device.set_nearest_clamped_sampling();
        device.texture_storage(&Size2D::new(32, 8), &vec![0; 32 * 8 * 4]);
        assert_eq!(device.error_codes().rendering, 0x0501);

        let surface = device.create_surface(&Drawable::new(), &Size2D::new(8, 17));
        assert!(surface.is_none());
        assert_eq!(device.error_codes().windowing, 0x3003);
    }

    #[test]
    fn test_texture_storage_beyond_memory_limit_is_out_of_memory() {
        let mut device = Device::new().with_texture_memory(8 * 8 * 4);
        device.initialize(&ContextAttributes::default()).unwrap();
        let first = device.create_texture().unwrap();
        device.bind_texture(Some(first));
        device.texture_storage(&Size2D::new(8, 8), &[0; 8 * 8 * 4]);
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);

        // Respecifying the same texture doesn't count twice.
        device.texture_storage(&Size2D::new(8, 8), &[0; 8 * 8 * 4]);
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);

        let second = device.create_texture().unwrap();
        device.bind_texture(Some(second));
        device.texture_storage(&Size2D::new(1, 1), &[0; 4]);
        assert_eq!(device.error_codes().rendering, 0x0505);

        device.delete_texture(first);
        device.texture_storage(&Size2D::new(1, 1), &[0; 4]);
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);
    }

    #[test]
    fn test_shader_without_main_fails_to_compile() {
        let mut device = ready_device();
        let shader = device.create_shader(ShaderKind::Vertex).unwrap();
        assert!(!device.compile_shader(shader, "attribute vec2 position;\n"));
        assert!(device.shader_info_log(shader).contains("main"));

        let program = device.create_program().unwrap();
        assert!(!device.link_program(program, &[shader]));
        assert!(!device.program_info_log(program).is_empty());
        assert_eq!(device.error_codes(), ErrorCodes::SUCCESS);
    }

    #[test]
    fn test_swap_requires_current_surface() {
        let mut device = ready_device();
        let drawable = Drawable::new();
        let surface = device.create_surface(&drawable, &Size2D::new(2, 2)).unwrap();
        assert!(!device.swap_buffers(&surface));
        assert_eq!(device.error_codes().windowing, 0x300d);

        assert!(device.make_current(&surface));
        assert!(device.swap_buffers(&surface));
        assert_eq!(drawable.swap_count(), 1);

        assert!(device.destroy_surface(&surface));
        assert!(!device.make_current(&surface));
        assert_eq!(device.error_codes().windowing, 0x300d);
    }
}
