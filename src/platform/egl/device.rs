// swrend/src/platform/egl/device.rs
//
//! A device backed by an EGL display and an OpenGL ES 2 context.

use super::drawable::NativeDrawable;
use super::error::ToWindowingApiError;
use super::loader::{self, EGL_FUNCTIONS};
use crate::context::{rgba_len, ContextAttributes};
use crate::device::{self, ShaderKind};
use crate::egl;
use crate::egl::types::{EGLConfig, EGLContext, EGLDisplay, EGLSurface, EGLint};
use crate::egl::EGLNativeDisplayType;
use crate::error::{Error, ErrorCodes, RENDERING_NO_ERROR, WINDOWING_SUCCESS};

use euclid::default::{Rect, Size2D};
use glow::{HasContext, PixelPackData, PixelUnpackData};
use log::{debug, warn};
use std::fmt::{self, Debug, Formatter};
use std::ptr;

const GL_INVALID_OPERATION: u32 = glow::INVALID_OPERATION;

// Bounds the loop that drains stale GL error flags.
const MAX_PENDING_GL_ERRORS: usize = 16;

// Keeps the context current before any surface exists, so GL can be loaded and queried.
const DUMMY_PBUFFER_SIZE: EGLint = 16;

/// An EGL surface bound to a window or a pbuffer.
pub struct Surface {
    egl_surface: EGLSurface,
    size: Size2D<i32>,
}

impl Debug for Surface {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "Surface({:?}, {:?})", self.egl_surface, self.size)
    }
}

// Only used on the graphics thread; the engine merely stores it elsewhere.
unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

impl Surface {
    #[inline]
    pub fn size(&self) -> Size2D<i32> {
        self.size
    }
}

pub struct Device {
    egl_display: EGLDisplay,
    egl_config: EGLConfig,
    egl_context: EGLContext,
    dummy_pbuffer: EGLSurface,
    // Loaded during initialization, while the dummy pbuffer is current.
    gl: Option<glow::Context>,
    windowing_error: EGLint,
    rendering_error: u32,
}

impl Default for Device {
    fn default() -> Device {
        Device::new()
    }
}

impl Device {
    pub fn new() -> Device {
        Device {
            egl_display: egl::NO_DISPLAY,
            egl_config: ptr::null(),
            egl_context: egl::NO_CONTEXT,
            dummy_pbuffer: egl::NO_SURFACE,
            gl: None,
            windowing_error: WINDOWING_SUCCESS,
            rendering_error: RENDERING_NO_ERROR,
        }
    }

    // Makes the context current on a tiny pbuffer and loads the GL entry points through it.
    unsafe fn load_gl(&mut self) -> Result<(), Error> {
        let (egl_display, egl_config, egl_context) =
            (self.egl_display, self.egl_config, self.egl_context);
        let pbuffer_attributes = [
            egl::WIDTH as EGLint,
            DUMMY_PBUFFER_SIZE,
            egl::HEIGHT as EGLint,
            DUMMY_PBUFFER_SIZE,
            egl::NONE as EGLint,
            0,
            0,
            0,
        ];
        let dummy_pbuffer = EGL_FUNCTIONS.with(|egl| {
            let pbuffer =
                egl.CreatePbufferSurface(egl_display, egl_config, pbuffer_attributes.as_ptr());
            if pbuffer == egl::NO_SURFACE {
                return Err(Error::SurfaceCreationFailed(
                    egl.GetError().to_windowing_api_error(),
                ));
            }
            if egl.MakeCurrent(egl_display, pbuffer, pbuffer, egl_context) == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                egl.DestroySurface(egl_display, pbuffer);
                return Err(Error::MakeCurrentFailed(err));
            }
            Ok(pbuffer)
        })?;
        self.dummy_pbuffer = dummy_pbuffer;

        let gl = glow::Context::from_loader_function(loader::get_gl_proc_address);
        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        debug!("Loaded OpenGL ES {:?}", gl.version());
        self.gl = Some(gl);
        Ok(())
    }

    // Records the error of the EGL call that just failed.
    fn windowing_fault(&mut self) {
        let code = EGL_FUNCTIONS.with(|egl| unsafe { egl.GetError() });
        if self.windowing_error == WINDOWING_SUCCESS {
            self.windowing_error = code;
        }
    }

    fn with_gl<R, F>(&mut self, fallback: R, f: F) -> R
    where
        F: FnOnce(&glow::Context) -> R,
    {
        match self.gl {
            Some(ref gl) => f(gl),
            None => {
                if self.rendering_error == RENDERING_NO_ERROR {
                    self.rendering_error = GL_INVALID_OPERATION;
                }
                fallback
            }
        }
    }

    unsafe fn choose_config(
        &self,
        egl_display: EGLDisplay,
        attributes: &ContextAttributes,
    ) -> Result<EGLConfig, Error> {
        let config_attributes = [
            egl::RENDERABLE_TYPE as EGLint,
            egl::OPENGL_ES2_BIT as EGLint,
            egl::SURFACE_TYPE as EGLint,
            (egl::WINDOW_BIT | egl::PBUFFER_BIT) as EGLint,
            egl::RED_SIZE as EGLint,
            attributes.color_bits as EGLint,
            egl::GREEN_SIZE as EGLint,
            attributes.color_bits as EGLint,
            egl::BLUE_SIZE as EGLint,
            attributes.color_bits as EGLint,
            egl::ALPHA_SIZE as EGLint,
            attributes.alpha_bits() as EGLint,
            egl::DEPTH_SIZE as EGLint,
            attributes.required_depth_bits() as EGLint,
            egl::STENCIL_SIZE as EGLint,
            attributes.required_stencil_bits() as EGLint,
            egl::NONE as EGLint,
            0,
            0,
            0,
        ];

        EGL_FUNCTIONS.with(|egl| {
            let mut config_count = 0;
            let result = egl.ChooseConfig(
                egl_display,
                config_attributes.as_ptr(),
                ptr::null_mut(),
                0,
                &mut config_count,
            );
            if result == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::PixelFormatSelectionFailed(err));
            }
            if config_count == 0 {
                return Err(Error::NoPixelFormatFound);
            }

            let mut configs = vec![ptr::null(); config_count as usize];
            let result = egl.ChooseConfig(
                egl_display,
                config_attributes.as_ptr(),
                configs.as_mut_ptr(),
                config_count,
                &mut config_count,
            );
            if result == egl::FALSE {
                let err = egl.GetError().to_windowing_api_error();
                return Err(Error::PixelFormatSelectionFailed(err));
            }
            match configs.first() {
                Some(&config) if config_count > 0 => Ok(config),
                _ => Err(Error::NoPixelFormatFound),
            }
        })
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        device::Device::terminate(self);
    }
}

impl device::Device for Device {
    type Drawable = NativeDrawable;
    type Surface = Surface;
    type Texture = glow::Texture;
    type Shader = glow::Shader;
    type Program = glow::Program;
    type UniformLocation = glow::UniformLocation;
    type Buffer = glow::Buffer;

    fn initialize(&mut self, attributes: &ContextAttributes) -> Result<(), Error> {
        if self.egl_context != egl::NO_CONTEXT {
            return Ok(());
        }
        if !loader::egl_library_loaded() {
            return Err(Error::NoGLLibraryFound);
        }

        unsafe {
            let egl_display = EGL_FUNCTIONS
                .with(|egl| egl.GetDisplay(egl::DEFAULT_DISPLAY as EGLNativeDisplayType));
            if egl_display == egl::NO_DISPLAY {
                return Err(Error::NoDisplay);
            }

            EGL_FUNCTIONS.with(|egl| {
                let (mut major_version, mut minor_version) = (0, 0);
                if egl.Initialize(egl_display, &mut major_version, &mut minor_version) == egl::FALSE
                {
                    let err = egl.GetError().to_windowing_api_error();
                    return Err(Error::InitializeFailed(err));
                }
                debug!("Initialized EGL {}.{}", major_version, minor_version);

                if egl.BindAPI(egl::OPENGL_ES_API) == egl::FALSE {
                    let err = egl.GetError().to_windowing_api_error();
                    egl.Terminate(egl_display);
                    return Err(Error::ContextCreationFailed(err));
                }
                Ok(())
            })?;

            let egl_config = match self.choose_config(egl_display, attributes) {
                Ok(egl_config) => egl_config,
                Err(err) => {
                    EGL_FUNCTIONS.with(|egl| egl.Terminate(egl_display));
                    return Err(err);
                }
            };

            // Include some extra zeroes to work around broken implementations.
            let context_attributes = [
                egl::CONTEXT_CLIENT_VERSION as EGLint,
                2,
                egl::NONE as EGLint,
                0,
                0,
                0,
            ];
            let egl_context = EGL_FUNCTIONS.with(|egl| {
                let egl_context = egl.CreateContext(
                    egl_display,
                    egl_config,
                    egl::NO_CONTEXT,
                    context_attributes.as_ptr(),
                );
                if egl_context == egl::NO_CONTEXT {
                    let err = egl.GetError().to_windowing_api_error();
                    egl.Terminate(egl_display);
                    return Err(Error::ContextCreationFailed(err));
                }
                Ok(egl_context)
            })?;

            self.egl_display = egl_display;
            self.egl_config = egl_config;
            self.egl_context = egl_context;

            if let Err(err) = self.load_gl() {
                device::Device::terminate(self);
                return Err(err);
            }
        }
        Ok(())
    }

    fn terminate(&mut self) {
        if self.egl_display == egl::NO_DISPLAY {
            return;
        }
        self.gl = None;
        EGL_FUNCTIONS.with(|egl| unsafe {
            egl.MakeCurrent(
                self.egl_display,
                egl::NO_SURFACE,
                egl::NO_SURFACE,
                egl::NO_CONTEXT,
            );
            if self.dummy_pbuffer != egl::NO_SURFACE {
                egl.DestroySurface(self.egl_display, self.dummy_pbuffer);
            }
            if self.egl_context != egl::NO_CONTEXT {
                egl.DestroyContext(self.egl_display, self.egl_context);
            }
            egl.Terminate(self.egl_display);
        });
        self.egl_display = egl::NO_DISPLAY;
        self.dummy_pbuffer = egl::NO_SURFACE;
        self.egl_config = ptr::null();
        self.egl_context = egl::NO_CONTEXT;
    }

    fn error_codes(&mut self) -> ErrorCodes {
        let mut rendering = self.rendering_error;
        if let Some(ref gl) = self.gl {
            for _ in 0..MAX_PENDING_GL_ERRORS {
                let code = unsafe { gl.get_error() };
                if code == glow::NO_ERROR {
                    break;
                }
                if rendering == RENDERING_NO_ERROR {
                    rendering = code;
                }
            }
        }
        // A failed call has already consumed its EGL error; otherwise pick up any pending one.
        let mut windowing = self.windowing_error;
        if windowing == WINDOWING_SUCCESS && loader::egl_library_loaded() {
            windowing = EGL_FUNCTIONS.with(|egl| unsafe { egl.GetError() });
        }
        let codes = ErrorCodes {
            windowing,
            rendering,
        };
        self.windowing_error = WINDOWING_SUCCESS;
        self.rendering_error = RENDERING_NO_ERROR;
        codes
    }

    fn max_texture_size(&mut self) -> i32 {
        self.with_gl(0, |gl| unsafe { gl.get_parameter_i32(glow::MAX_TEXTURE_SIZE) })
    }

    fn create_surface(&mut self, drawable: &NativeDrawable, size: &Size2D<i32>) -> Option<Surface> {
        let (egl_display, egl_config) = (self.egl_display, self.egl_config);
        let (egl_surface, surface_size) = match *drawable {
            NativeDrawable::Window(window) => {
                let attributes = [egl::NONE as EGLint, 0, 0, 0];
                let egl_surface = EGL_FUNCTIONS.with(|egl| unsafe {
                    egl.CreateWindowSurface(
                        egl_display,
                        egl_config,
                        window.0 as egl::EGLNativeWindowType,
                        attributes.as_ptr(),
                    )
                });
                (egl_surface, *size)
            }
            NativeDrawable::Pbuffer(ref target) => {
                let mut pbuffer_size = target.size();
                if pbuffer_size.is_empty() {
                    pbuffer_size = *size;
                }
                let attributes = [
                    egl::WIDTH as EGLint,
                    pbuffer_size.width,
                    egl::HEIGHT as EGLint,
                    pbuffer_size.height,
                    egl::NONE as EGLint,
                    0,
                    0,
                    0,
                ];
                let egl_surface = EGL_FUNCTIONS.with(|egl| unsafe {
                    egl.CreatePbufferSurface(egl_display, egl_config, attributes.as_ptr())
                });
                (egl_surface, pbuffer_size)
            }
        };
        if egl_surface == egl::NO_SURFACE {
            self.windowing_fault();
            return None;
        }

        // Reading back after a swap needs the back buffer kept.
        if let NativeDrawable::Window(_) = *drawable {
            EGL_FUNCTIONS.with(|egl| unsafe {
                let result = egl.SurfaceAttrib(
                    egl_display,
                    egl_surface,
                    egl::SWAP_BEHAVIOR as EGLint,
                    egl::BUFFER_PRESERVED as EGLint,
                );
                if result == egl::FALSE {
                    let err = egl.GetError().to_windowing_api_error();
                    warn!("Preserved swap behavior unavailable: {:?}", err);
                }
            });
        }

        Some(Surface {
            egl_surface,
            size: surface_size,
        })
    }

    fn make_current(&mut self, surface: &Surface) -> bool {
        let result = EGL_FUNCTIONS.with(|egl| unsafe {
            egl.MakeCurrent(
                self.egl_display,
                surface.egl_surface,
                surface.egl_surface,
                self.egl_context,
            )
        });
        if result == egl::FALSE {
            self.windowing_fault();
            return false;
        }
        true
    }

    fn swap_buffers(&mut self, surface: &Surface) -> bool {
        let result = EGL_FUNCTIONS
            .with(|egl| unsafe { egl.SwapBuffers(self.egl_display, surface.egl_surface) });
        if result == egl::FALSE {
            self.windowing_fault();
            return false;
        }
        true
    }

    fn destroy_surface(&mut self, surface: &Surface) -> bool {
        let result = EGL_FUNCTIONS
            .with(|egl| unsafe { egl.DestroySurface(self.egl_display, surface.egl_surface) });
        if result == egl::FALSE {
            self.windowing_fault();
            return false;
        }
        true
    }

    fn create_shader(&mut self, kind: ShaderKind) -> Option<glow::Shader> {
        let shader_type = match kind {
            ShaderKind::Vertex => glow::VERTEX_SHADER,
            ShaderKind::Fragment => glow::FRAGMENT_SHADER,
        };
        self.with_gl(None, |gl| unsafe { gl.create_shader(shader_type).ok() })
    }

    fn compile_shader(&mut self, shader: glow::Shader, source: &str) -> bool {
        self.with_gl(false, |gl| unsafe {
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            gl.get_shader_compile_status(shader)
        })
    }

    fn shader_info_log(&mut self, shader: glow::Shader) -> String {
        self.with_gl(String::new(), |gl| unsafe { gl.get_shader_info_log(shader) })
    }

    fn delete_shader(&mut self, shader: glow::Shader) {
        self.with_gl((), |gl| unsafe { gl.delete_shader(shader) })
    }

    fn create_program(&mut self) -> Option<glow::Program> {
        self.with_gl(None, |gl| unsafe { gl.create_program().ok() })
    }

    fn link_program(&mut self, program: glow::Program, shaders: &[glow::Shader]) -> bool {
        self.with_gl(false, |gl| unsafe {
            for &shader in shaders {
                gl.attach_shader(program, shader);
            }
            gl.link_program(program);
            gl.get_program_link_status(program)
        })
    }

    fn program_info_log(&mut self, program: glow::Program) -> String {
        self.with_gl(String::new(), |gl| unsafe { gl.get_program_info_log(program) })
    }

    fn delete_program(&mut self, program: glow::Program) {
        self.with_gl((), |gl| unsafe { gl.delete_program(program) })
    }

    fn attrib_location(&mut self, program: glow::Program, name: &str) -> Option<u32> {
        self.with_gl(None, |gl| unsafe { gl.get_attrib_location(program, name) })
    }

    fn uniform_location(
        &mut self,
        program: glow::Program,
        name: &str,
    ) -> Option<glow::UniformLocation> {
        self.with_gl(None, |gl| unsafe { gl.get_uniform_location(program, name) })
    }

    fn use_program(&mut self, program: Option<glow::Program>) {
        self.with_gl((), |gl| unsafe { gl.use_program(program) })
    }

    fn uniform_1i(&mut self, location: Option<&glow::UniformLocation>, value: i32) {
        self.with_gl((), |gl| unsafe { gl.uniform_1_i32(location, value) })
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> Option<glow::Buffer> {
        let bytes: Vec<u8> = data.iter().flat_map(|value| value.to_ne_bytes()).collect();
        self.with_gl(None, |gl| unsafe {
            let buffer = gl.create_buffer().ok()?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            Some(buffer)
        })
    }

    fn delete_buffer(&mut self, buffer: glow::Buffer) {
        self.with_gl((), |gl| unsafe { gl.delete_buffer(buffer) })
    }

    fn vertex_attrib_buffer(&mut self, index: u32, buffer: glow::Buffer, components: i32) {
        self.with_gl((), |gl| unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.vertex_attrib_pointer_f32(index, components, glow::FLOAT, false, 0, 0);
            gl.enable_vertex_attrib_array(index);
        })
    }

    fn create_texture(&mut self) -> Option<glow::Texture> {
        self.with_gl(None, |gl| unsafe { gl.create_texture().ok() })
    }

    fn bind_texture(&mut self, texture: Option<glow::Texture>) {
        self.with_gl((), |gl| unsafe { gl.bind_texture(glow::TEXTURE_2D, texture) })
    }

    fn active_texture(&mut self, unit: u32) {
        self.with_gl((), |gl| unsafe { gl.active_texture(glow::TEXTURE0 + unit) })
    }

    fn set_nearest_clamped_sampling(&mut self) {
        self.with_gl((), |gl| unsafe {
            let target = glow::TEXTURE_2D;
            gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        })
    }

    fn texture_storage(&mut self, size: &Size2D<i32>, pixels: &[u8]) {
        self.with_gl((), |gl| unsafe {
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                size.width,
                size.height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(Some(pixels)),
            )
        })
    }

    fn texture_sub_image(&mut self, region: &Rect<i32>, pixels: &[u8]) {
        self.with_gl((), |gl| unsafe {
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                region.origin.x,
                region.origin.y,
                region.size.width,
                region.size.height,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(Some(pixels)),
            )
        })
    }

    fn delete_texture(&mut self, texture: glow::Texture) {
        self.with_gl((), |gl| unsafe { gl.delete_texture(texture) })
    }

    fn viewport(&mut self, rect: &Rect<i32>) {
        self.with_gl((), |gl| unsafe {
            gl.viewport(
                rect.origin.x,
                rect.origin.y,
                rect.size.width,
                rect.size.height,
            )
        })
    }

    fn clear_color(&mut self, rgba: [f32; 4]) {
        self.with_gl((), |gl| unsafe { gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]) })
    }

    fn clear(&mut self) {
        self.with_gl((), |gl| unsafe { gl.clear(glow::COLOR_BUFFER_BIT) })
    }

    fn draw_triangle_strip(&mut self, first: i32, count: i32) {
        self.with_gl((), |gl| unsafe { gl.draw_arrays(glow::TRIANGLE_STRIP, first, count) })
    }

    fn finish(&mut self) {
        self.with_gl((), |gl| unsafe { gl.finish() })
    }

    fn read_pixels(&mut self, rect: &Rect<i32>) -> Vec<u8> {
        let mut pixels = match rgba_len(&rect.size) {
            Some(len) => vec![0; len],
            None => {
                if self.rendering_error == RENDERING_NO_ERROR {
                    self.rendering_error = glow::INVALID_VALUE;
                }
                return vec![];
            }
        };
        self.with_gl((), |gl| unsafe {
            gl.read_pixels(
                rect.origin.x,
                rect.origin.y,
                rect.size.width,
                rect.size.height,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelPackData::Slice(Some(&mut pixels)),
            )
        });
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::Device;
    use crate::context::ContextAttributes;
    use crate::device::Device as DeviceInterface;
    use crate::egl;
    use crate::egl::types::EGLint;
    use crate::error::WINDOWING_SUCCESS;
    use crate::platform::egl::loader::EGL_FUNCTIONS;

    use serial_test::serial;

    // Needs a working EGL display; run with `--ignored`.
    #[test]
    #[ignore]
    #[serial]
    fn test_error_codes_pick_up_pending_egl_error() {
        let mut device = Device::new();
        device.initialize(&ContextAttributes::default()).unwrap();
        assert!(device.error_codes().is_success());

        // Fails behind the device's back, so only `eglGetError` knows about it.
        let display = device.egl_display;
        EGL_FUNCTIONS.with(|egl| unsafe { egl.DestroySurface(display, egl::NO_SURFACE) });
        assert_eq!(device.error_codes().windowing, egl::BAD_SURFACE as EGLint);
        assert_eq!(device.error_codes().windowing, WINDOWING_SUCCESS);

        device.terminate();
    }
}
