// swrend/src/engine.rs
//
//! The texture-streaming engine: one graphics thread, one context, and the surfaces presented
//! through it.
//!
//! An `Engine` is constructed explicitly and shared by reference (or `Arc`) with whatever handles
//! host requests. Any thread may call into it. Graphics work is marshalled onto the engine's
//! dedicated thread; registry bookkeeping happens on the calling thread.

use crate::context::{ContextAttributes, GraphicsContext};
use crate::device::Device;
use crate::error::Error;
use crate::queue::TaskQueue;
use crate::registry::SurfaceRegistry;
use crate::request::{Region, Request, Response};
use crate::surface::{DrawableProvider, PresentableSurface, SurfaceHandle};

use euclid::default::{Point2D, Rect, Size2D};
use log::{debug, error, info, warn};
use std::sync::{Arc, OnceLock};

/// How `invalidate` waits for the present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    /// Return once the frame has been swapped.
    Blocking,
    /// Return once the present is queued. Failures are logged.
    Detached,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Name of the dedicated graphics thread.
    pub thread_name: String,
    /// The pixel format requested for the context.
    pub attributes: ContextAttributes,
    pub present_mode: PresentMode,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            thread_name: "swrend-gl".to_owned(),
            attributes: ContextAttributes::default(),
            present_mode: PresentMode::Blocking,
        }
    }
}

impl EngineConfig {
    pub fn thread_name(mut self, name: &str) -> EngineConfig {
        self.thread_name = name.to_owned();
        self
    }

    pub fn attributes(mut self, attributes: ContextAttributes) -> EngineConfig {
        self.attributes = attributes;
        self
    }

    pub fn present_mode(mut self, present_mode: PresentMode) -> EngineConfig {
        self.present_mode = present_mode;
        self
    }
}

pub struct Engine<D, P>
where
    D: Device + 'static,
    P: DrawableProvider<Drawable = D::Drawable> + 'static,
{
    queue: TaskQueue<GraphicsContext<D>>,
    registry: SurfaceRegistry<D>,
    provider: Arc<P>,
    present_mode: PresentMode,
    max_texture_size: OnceLock<i32>,
}

impl<D, P> Engine<D, P>
where
    D: Device + 'static,
    P: DrawableProvider<Drawable = D::Drawable> + 'static,
{
    /// Creates an engine. Nothing runs until `start()` or the first request; the device is then
    /// built on the graphics thread by `device_factory`.
    pub fn new<F>(config: EngineConfig, provider: P, device_factory: F) -> Engine<D, P>
    where
        F: FnOnce() -> D + Send + 'static,
    {
        let attributes = config.attributes;
        Engine {
            queue: TaskQueue::new(&config.thread_name, move || {
                GraphicsContext::new(device_factory(), attributes)
            }),
            registry: SurfaceRegistry::new(),
            provider: Arc::new(provider),
            present_mode: config.present_mode,
            max_texture_size: OnceLock::new(),
        }
    }

    /// Spawns the graphics thread and initializes the context.
    pub fn start(&self) -> Result<(), Error> {
        self.queue.start()?;
        self.queue.run(|context| context.initialize())??;
        info!("Engine started");
        Ok(())
    }

    /// Disposes every surface, tears the context down, and stops the graphics thread.
    ///
    /// Requests made after this fail with `Error::EngineStopped`.
    pub fn stop(&self) {
        if !self.queue.is_running() {
            self.queue.shutdown();
            return;
        }

        for surface in self.registry.drain() {
            let handle = surface.handle();
            let result = self
                .queue
                .run(move |context| release_surface(context, &surface));
            if let Err(err) = result.and_then(|result| result) {
                warn!("Failed to release surface {} during shutdown: {}", handle, err);
            }
            self.provider.release(handle);
        }

        let _ = self.queue.post(|context| context.teardown());
        self.queue.shutdown();
        info!("Engine stopped");
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.queue.is_running()
    }

    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The largest surface width or height the device supports. Starts the engine if needed.
    pub fn max_texture_size(&self) -> Result<i32, Error> {
        if let Some(&max) = self.max_texture_size.get() {
            return Ok(max);
        }
        let max = self.queue.run(|context| {
            context.initialize()?;
            context.max_texture_size()
        })??;
        Ok(*self.max_texture_size.get_or_init(|| max))
    }

    /// Creates a surface of `width`x`height` and returns its handle.
    pub fn init(&self, width: i64, height: i64) -> Result<SurfaceHandle, Error> {
        if width <= 0 || height <= 0 {
            return Err(Error::InvalidSize { width, height });
        }
        let max = self.max_texture_size()?;
        if width > max as i64 || height > max as i64 {
            return Err(Error::SurfaceTooLarge { width, height, max });
        }
        let size = Size2D::new(width as i32, height as i32);

        let (drawable, handle) = self.provider.allocate()?;
        self.provider.set_default_buffer_size(&drawable, &size);

        let task_drawable = drawable.clone();
        let created = self
            .queue
            .run(move |context| -> Result<_, Error> {
                context.initialize()?;
                let context_surface = context.create_presentable_surface(&task_drawable, &size)?;
                let texture = context.create_texture(&size)?;
                Ok((context_surface, texture))
            })
            .and_then(|result| result);
        let (context_surface, texture) = match created {
            Ok(objects) => objects,
            Err(err) => {
                self.provider.release(handle);
                return Err(err);
            }
        };

        let surface = PresentableSurface::new(handle, size, drawable, context_surface, texture);
        match self.registry.insert(surface) {
            Ok(_) => {
                debug!("Generated texture = {}", handle);
                Ok(handle)
            }
            Err(surface) => {
                error!("Drawable provider reused handle {}", handle);
                let surface = Arc::new(surface);
                self.queue
                    .run(move |context| release_surface(context, &surface))??;
                Err(Error::DrawableAllocationFailed)
            }
        }
    }

    /// Uploads RGBA8 `pixels` into `region` of the surface's texture, or into the whole texture if
    /// `region` is `None`.
    pub fn draw(
        &self,
        handle: SurfaceHandle,
        region: Option<Region>,
        pixels: Vec<u8>,
    ) -> Result<(), Error> {
        let surface = self.registry.lookup(handle)?;
        let size = surface.size();
        let rect = match region {
            None => Rect::new(Point2D::origin(), size),
            Some(region) => region.within(&size).ok_or(Error::InvalidRegion {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
            })?,
        };

        let expected = rect.size.width as usize * rect.size.height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::PixelDataLength {
                expected,
                actual: pixels.len(),
            });
        }

        self.queue.run(move |context| {
            surface.ensure_live()?;
            context.upload_region(surface.texture(), &rect, &pixels)
        })?
    }

    /// Draws the surface's texture to its drawable and swaps it to the compositor.
    pub fn invalidate(&self, handle: SurfaceHandle) -> Result<(), Error> {
        let surface = self.registry.lookup(handle)?;
        let provider = self.provider.clone();
        let present = move |context: &mut GraphicsContext<D>| -> Result<(), Error> {
            surface.ensure_live()?;
            context.bind_current(surface.context_surface(), &surface.size())?;
            context.present_quad(surface.texture(), surface.context_surface())?;
            provider.mark_frame_available(surface.handle());
            Ok(())
        };

        match self.present_mode {
            PresentMode::Blocking => self.queue.run(present)?,
            PresentMode::Detached => self.queue.post(move |context| {
                if let Err(err) = present(context) {
                    error!("Present of surface {} failed: {}", handle, err);
                }
            }),
        }
    }

    /// Reads back the surface's presented pixels: RGBA8, bottom row first.
    pub fn get_pixels(&self, handle: SurfaceHandle) -> Result<Vec<u8>, Error> {
        let surface = self.registry.lookup(handle)?;
        self.queue.run(move |context| {
            surface.ensure_live()?;
            let size = surface.size();
            context.bind_current(surface.context_surface(), &size)?;
            context.readback(&size)
        })?
    }

    pub fn get_size(&self, handle: SurfaceHandle) -> Result<Size2D<i32>, Error> {
        Ok(self.registry.lookup(handle)?.size())
    }

    pub fn list_textures(&self) -> Vec<SurfaceHandle> {
        self.registry.list()
    }

    /// Releases the surface's texture and context-surface, and hands its drawable back to the
    /// provider.
    pub fn dispose(&self, handle: SurfaceHandle) -> Result<(), Error> {
        let surface = self.registry.remove(handle)?;
        let result = self
            .queue
            .run(move |context| release_surface(context, &surface));
        self.provider.release(handle);
        result?
    }

    /// Dispatches a bridge request.
    pub fn handle(&self, request: Request) -> Result<Response, Error> {
        match request {
            Request::Init { width, height } => {
                let (width, height) = match (width, height) {
                    (Some(width), Some(height)) => (width, height),
                    (width, height) => {
                        return Err(Error::InvalidSize {
                            width: width.unwrap_or(0),
                            height: height.unwrap_or(0),
                        })
                    }
                };
                self.init(width, height).map(Response::Texture)
            }
            Request::Draw {
                texture,
                region,
                pixels,
            } => self.draw(texture, region, pixels).map(|_| Response::Done),
            Request::Invalidate { texture } => self.invalidate(texture).map(|_| Response::Done),
            Request::GetPixels { texture } => self.get_pixels(texture).map(Response::Pixels),
            Request::GetSize { texture } => self
                .get_size(texture)
                .map(|size| Response::Size([size.width, size.height])),
            Request::ListTextures => Ok(Response::Textures(self.list_textures())),
            Request::Dispose { texture } => self.dispose(texture).map(|_| Response::Done),
            Request::Unimplemented { method } => {
                debug!("Method {:?} is not implemented", method);
                Ok(Response::NotImplemented)
            }
        }
    }
}

impl<D, P> Drop for Engine<D, P>
where
    D: Device + 'static,
    P: DrawableProvider<Drawable = D::Drawable> + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

// Runs on the graphics thread.
fn release_surface<D: Device>(
    context: &mut GraphicsContext<D>,
    surface: &PresentableSurface<D>,
) -> Result<(), Error> {
    surface.ensure_live()?;
    surface.mark_released();
    context.delete_texture(surface.texture())?;
    context.destroy_surface(surface.context_surface())
}
