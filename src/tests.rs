// swrend/src/tests.rs
//
//! Unit tests.

use crate::device::{Device as DeviceInterface, ShaderKind};
use crate::platform::software::{Buffer, Compositor, Device, Drawable, Program, Shader};
use crate::platform::software::{Surface, Texture, UniformLocation};
use crate::{flip_rows, ContextAttributes, Engine, EngineConfig, Error, ErrorCodes, PresentMode};
use crate::{Region, Request, Response, SurfaceHandle};

use euclid::default::{Rect, Size2D};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

type SoftwareEngine = Engine<Device, Compositor>;

fn start_engine() -> SoftwareEngine {
    start_engine_with(EngineConfig::default(), Device::new)
}

fn start_engine_with<F>(config: EngineConfig, device_factory: F) -> SoftwareEngine
where
    F: FnOnce() -> Device + Send + 'static,
{
    let engine = Engine::new(config, Compositor::new(), device_factory);
    engine.start().unwrap();
    engine
}

fn random_pixels(size: Size2D<i32>) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size.width * size.height * 4).map(|_| rng.gen()).collect()
}

// A software device that logs the first byte of every sub-image upload, in the order the graphics
// thread applies them.
struct UploadLog {
    device: Device,
    uploads: Arc<Mutex<Vec<u8>>>,
}

impl DeviceInterface for UploadLog {
    type Drawable = Drawable;
    type Surface = Surface;
    type Texture = Texture;
    type Shader = Shader;
    type Program = Program;
    type UniformLocation = UniformLocation;
    type Buffer = Buffer;

    fn initialize(&mut self, attributes: &ContextAttributes) -> Result<(), Error> {
        self.device.initialize(attributes)
    }
    fn terminate(&mut self) {
        self.device.terminate()
    }
    fn error_codes(&mut self) -> ErrorCodes {
        self.device.error_codes()
    }
    fn max_texture_size(&mut self) -> i32 {
        self.device.max_texture_size()
    }
    fn create_surface(&mut self, drawable: &Drawable, size: &Size2D<i32>) -> Option<Surface> {
        self.device.create_surface(drawable, size)
    }
    fn make_current(&mut self, surface: &Surface) -> bool {
        self.device.make_current(surface)
    }
    fn swap_buffers(&mut self, surface: &Surface) -> bool {
        self.device.swap_buffers(surface)
    }
    fn destroy_surface(&mut self, surface: &Surface) -> bool {
        self.device.destroy_surface(surface)
    }
    fn create_shader(&mut self, kind: ShaderKind) -> Option<Shader> {
        self.device.create_shader(kind)
    }
    fn compile_shader(&mut self, shader: Shader, source: &str) -> bool {
        self.device.compile_shader(shader, source)
    }
    fn shader_info_log(&mut self, shader: Shader) -> String {
        self.device.shader_info_log(shader)
    }
    fn delete_shader(&mut self, shader: Shader) {
        self.device.delete_shader(shader)
    }
    fn create_program(&mut self) -> Option<Program> {
        self.device.create_program()
    }
    fn link_program(&mut self, program: Program, shaders: &[Shader]) -> bool {
        self.device.link_program(program, shaders)
    }
    fn program_info_log(&mut self, program: Program) -> String {
        self.device.program_info_log(program)
    }
    fn delete_program(&mut self, program: Program) {
        self.device.delete_program(program)
    }
    fn attrib_location(&mut self, program: Program, name: &str) -> Option<u32> {
        self.device.attrib_location(program, name)
    }
    fn uniform_location(&mut self, program: Program, name: &str) -> Option<UniformLocation> {
        self.device.uniform_location(program, name)
    }
    fn use_program(&mut self, program: Option<Program>) {
        self.device.use_program(program)
    }
    fn uniform_1i(&mut self, location: Option<&UniformLocation>, value: i32) {
        self.device.uniform_1i(location, value)
    }
    fn create_vertex_buffer(&mut self, data: &[f32]) -> Option<Buffer> {
        self.device.create_vertex_buffer(data)
    }
    fn delete_buffer(&mut self, buffer: Buffer) {
        self.device.delete_buffer(buffer)
    }
    fn vertex_attrib_buffer(&mut self, index: u32, buffer: Buffer, components: i32) {
        self.device.vertex_attrib_buffer(index, buffer, components)
    }
    fn create_texture(&mut self) -> Option<Texture> {
        self.device.create_texture()
    }
    fn bind_texture(&mut self, texture: Option<Texture>) {
        self.device.bind_texture(texture)
    }
    fn active_texture(&mut self, unit: u32) {
        self.device.active_texture(unit)
    }
    fn set_nearest_clamped_sampling(&mut self) {
        self.device.set_nearest_clamped_sampling()
    }
    fn texture_storage(&mut self, size: &Size2D<i32>, pixels: &[u8]) {
        self.device.texture_storage(size, pixels)
    }
    fn texture_sub_image(&mut self, region: &Rect<i32>, pixels: &[u8]) {
        if let Some(&first) = pixels.first() {
            self.uploads.lock().unwrap().push(first);
        }
        self.device.texture_sub_image(region, pixels)
    }
    fn delete_texture(&mut self, texture: Texture) {
        self.device.delete_texture(texture)
    }
    fn viewport(&mut self, rect: &Rect<i32>) {
        self.device.viewport(rect)
    }
    fn clear_color(&mut self, rgba: [f32; 4]) {
        self.device.clear_color(rgba)
    }
    fn clear(&mut self) {
        self.device.clear()
    }
    fn draw_triangle_strip(&mut self, first: i32, count: i32) {
        self.device.draw_triangle_strip(first, count)
    }
    fn finish(&mut self) {
        self.device.finish()
    }
    fn read_pixels(&mut self, rect: &Rect<i32>) -> Vec<u8> {
        self.device.read_pixels(rect)
    }
}

#[test]
fn test_new_surface_reads_back_zeroed() {
    let engine = start_engine();
    let handle = engine.init(16, 8).unwrap();
    let pixels = engine.get_pixels(handle).unwrap();
    assert_eq!(pixels.len(), 16 * 8 * 4);
    assert!(pixels.iter().all(|&byte| byte == 0));
}

#[test]
fn test_red_frame_end_to_end() {
    let engine = start_engine();
    let handle = engine.init(64, 64).unwrap();
    let red: Vec<u8> = [255, 0, 0, 255].iter().cycle().take(64 * 64 * 4).cloned().collect();
    engine.draw(handle, None, red.clone()).unwrap();
    engine.invalidate(handle).unwrap();
    assert_eq!(engine.get_pixels(handle).unwrap(), red);
    assert_eq!(engine.provider().frame(handle).unwrap(), red);
}

#[test]
fn test_presented_frame_is_flipped_upload() {
    let engine = start_engine();
    let size = Size2D::new(13, 7);
    let handle = engine.init(13, 7).unwrap();
    let uploaded = random_pixels(size);
    engine.draw(handle, None, uploaded.clone()).unwrap();
    engine.invalidate(handle).unwrap();

    // Read-back starts at the bottom row.
    let mut pixels = engine.get_pixels(handle).unwrap();
    assert_ne!(pixels, uploaded);
    flip_rows(&mut pixels, 13);
    assert_eq!(pixels, uploaded);

    // The compositor scans out top row first.
    assert_eq!(engine.provider().frame(handle).unwrap(), uploaded);
}

#[test]
fn test_region_upload_only_touches_region() {
    let engine = start_engine();
    let handle = engine.init(8, 8).unwrap();
    engine.draw(handle, None, vec![10; 8 * 8 * 4]).unwrap();
    engine
        .draw(handle, Some(Region::new(2, 3, 4, 2)), vec![200; 4 * 2 * 4])
        .unwrap();
    engine.invalidate(handle).unwrap();

    let mut pixels = engine.get_pixels(handle).unwrap();
    flip_rows(&mut pixels, 8);
    for y in 0..8 {
        for x in 0..8 {
            let inside = (2..6).contains(&x) && (3..5).contains(&y);
            let expected = if inside { 200 } else { 10 };
            assert_eq!(pixels[(y * 8 + x) * 4], expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn test_draw_without_present_leaves_frame_unchanged() {
    let engine = start_engine();
    let handle = engine.init(4, 4).unwrap();
    engine.draw(handle, None, vec![77; 4 * 4 * 4]).unwrap();
    assert!(engine.get_pixels(handle).unwrap().iter().all(|&byte| byte == 0));
    assert_eq!(engine.provider().frames_available(handle), Some(0));
}

#[test]
fn test_unknown_handle_is_no_texture() {
    let engine = start_engine();
    let handle = engine.init(4, 4).unwrap();
    let unknown = SurfaceHandle(handle.0 + 100);

    let results = vec![
        engine.draw(unknown, None, vec![0; 64]).map(|_| ()),
        engine.invalidate(unknown),
        engine.get_pixels(unknown).map(|_| ()),
        engine.get_size(unknown).map(|_| ()),
        engine.dispose(unknown),
    ];
    for result in results {
        match result {
            Err(Error::NoTexture(reported)) => assert_eq!(reported, unknown),
            other => panic!("unexpected result: {:?}", other),
        }
    }
    assert_eq!(engine.list_textures(), vec![handle]);
}

#[test]
fn test_dispose_twice_is_no_texture() {
    let engine = start_engine();
    let handle = engine.init(4, 4).unwrap();
    engine.dispose(handle).unwrap();
    match engine.dispose(handle) {
        Err(err) => assert_eq!(err.code(), "NO_TEX"),
        Ok(()) => panic!("second dispose succeeded"),
    }
    assert!(engine.list_textures().is_empty());
    assert!(!engine.provider().is_registered(handle));
}

#[test]
fn test_get_size_reports_init_size() {
    let engine = start_engine();
    let handle = engine.init(32, 48).unwrap();
    assert_eq!(engine.get_size(handle).unwrap(), Size2D::new(32, 48));
    let response = engine.handle(Request::GetSize { texture: handle }).unwrap();
    assert_eq!(response, Response::Size([32, 48]));
}

#[test]
fn test_list_textures_tracks_live_surfaces() {
    let engine = start_engine();
    let handles: Vec<_> = (0..3).map(|_| engine.init(2, 2).unwrap()).collect();
    let mut sorted = handles.clone();
    sorted.sort();
    assert_eq!(engine.list_textures(), sorted);

    engine.dispose(handles[1]).unwrap();
    assert_eq!(engine.list_textures(), vec![sorted[0], sorted[2]]);
}

#[test]
fn test_requests_dispatch_to_operations() {
    let engine = start_engine();
    let handle = match engine.handle(Request::Init {
        width: Some(4),
        height: Some(2),
    }) {
        Ok(Response::Texture(handle)) => handle,
        other => panic!("unexpected response: {:?}", other),
    };

    let draw = Request::Draw {
        texture: handle,
        region: None,
        pixels: vec![9; 4 * 2 * 4],
    };
    assert_eq!(draw.method(), "draw");
    assert_eq!(engine.handle(draw).unwrap(), Response::Done);
    assert_eq!(
        engine.handle(Request::Invalidate { texture: handle }).unwrap(),
        Response::Done
    );
    assert_eq!(
        engine.handle(Request::GetPixels { texture: handle }).unwrap(),
        Response::Pixels(vec![9; 4 * 2 * 4])
    );
    assert_eq!(
        engine.handle(Request::ListTextures).unwrap(),
        Response::Textures(vec![handle])
    );
    assert_eq!(
        engine.handle(Request::Dispose { texture: handle }).unwrap(),
        Response::Done
    );
    assert!(engine.handle(Request::GetPixels { texture: handle }).is_err());
}

#[test]
fn test_unknown_method_is_not_implemented() {
    let engine = start_engine();
    let request = Request::Unimplemented {
        method: "resize".to_owned(),
    };
    assert_eq!(request.method(), "resize");
    assert_eq!(engine.handle(request).unwrap(), Response::NotImplemented);
}

#[test]
fn test_init_rejects_missing_or_empty_dimensions() {
    let engine = start_engine();
    let missing = engine.handle(Request::Init {
        width: None,
        height: Some(4),
    });
    match missing {
        Err(err @ Error::InvalidSize { .. }) => assert_eq!(err.code(), "MISSING"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(engine.init(0, 4), Err(Error::InvalidSize { .. })));
    assert!(matches!(engine.init(4, -1), Err(Error::InvalidSize { .. })));
    assert!(engine.list_textures().is_empty());
}

#[test]
fn test_invalid_uploads_are_rejected_and_recoverable() {
    let engine = start_engine();
    let handle = engine.init(8, 8).unwrap();

    // The bridge's defaults for a missing width and height.
    let region = Region::new(0, 0, -1, -1);
    match engine.draw(handle, Some(region), vec![]) {
        Err(err @ Error::InvalidRegion { .. }) => assert!(err.is_recoverable()),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        engine.draw(handle, Some(Region::new(6, 6, 4, 4)), vec![0; 64]),
        Err(Error::InvalidRegion { .. })
    ));
    match engine.draw(handle, None, vec![0; 10]) {
        Err(Error::PixelDataLength { expected, actual }) => {
            assert_eq!((expected, actual), (8 * 8 * 4, 10))
        }
        other => panic!("unexpected result: {:?}", other),
    }

    engine.draw(handle, None, vec![1; 8 * 8 * 4]).unwrap();
    engine.invalidate(handle).unwrap();
}

#[test]
fn test_graphics_fault_loses_context() {
    let engine = start_engine_with(EngineConfig::default(), || {
        Device::new().with_texture_memory(16 * 16 * 4)
    });
    let first = engine.init(16, 16).unwrap();
    match engine.init(16, 16) {
        Err(Error::Graphics(err)) => {
            assert_eq!(err.operation, "Create texture buffer");
            assert_eq!(err.codes.rendering, 0x0505);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(engine.list_textures(), vec![first]);

    match engine.init(8, 8) {
        Err(err @ Error::ContextLost) => assert_eq!(err.code(), "FATAL"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(engine.invalidate(first), Err(Error::ContextLost)));
    assert_eq!(engine.list_textures(), vec![first]);
}

#[test]
fn test_oversized_init_is_rejected_before_allocation() {
    let engine = start_engine();
    assert_eq!(engine.max_texture_size().unwrap(), 4096);
    let oversized = [
        (i32::MAX as i64, i32::MAX as i64),
        (60000, 60000),
        (4097, 1),
        (1, i64::MAX),
    ];
    for &(width, height) in &oversized {
        match engine.init(width, height) {
            Err(err @ Error::SurfaceTooLarge { .. }) => {
                assert!(err.is_recoverable());
                assert_eq!(err.code(), "INVALID");
            }
            other => panic!("unexpected result for {}x{}: {:?}", width, height, other),
        }
    }

    // Nothing was allocated for the rejected sizes, and the engine still works.
    let handle = engine.init(4096, 1).unwrap();
    assert_eq!(handle, SurfaceHandle(1));
    assert_eq!(engine.list_textures(), vec![handle]);
    engine.invalidate(handle).unwrap();
}

#[test]
fn test_init_respects_device_texture_limit() {
    let engine = start_engine_with(EngineConfig::default(), || {
        Device::new().with_max_texture_size(16)
    });
    match engine.init(32, 16) {
        Err(Error::SurfaceTooLarge { max, .. }) => assert_eq!(max, 16),
        other => panic!("unexpected result: {:?}", other),
    }
    let handle = engine.init(16, 16).unwrap();
    engine.draw(handle, None, vec![9; 16 * 16 * 4]).unwrap();
    engine.invalidate(handle).unwrap();
    assert!(engine.get_pixels(handle).unwrap().iter().all(|&byte| byte == 9));
}

#[test]
fn test_start_fails_without_display() {
    let engine = Engine::new(EngineConfig::default(), Compositor::new(), || {
        Device::new().without_display()
    });
    assert!(matches!(engine.start(), Err(Error::NoDisplay)));
    assert!(matches!(engine.init(4, 4), Err(Error::ContextLost)));
}

#[test]
fn test_first_request_starts_engine() {
    let engine = Engine::new(EngineConfig::default(), Compositor::new(), Device::new);
    assert!(!engine.is_running());
    let handle = engine.init(2, 2).unwrap();
    assert!(engine.is_running());
    assert_eq!(engine.list_textures(), vec![handle]);
}

#[test]
fn test_stop_disposes_every_surface() {
    let engine = start_engine();
    let first = engine.init(4, 4).unwrap();
    let second = engine.init(4, 4).unwrap();
    engine.stop();

    assert!(!engine.is_running());
    assert!(engine.list_textures().is_empty());
    assert!(!engine.provider().is_registered(first));
    assert!(!engine.provider().is_registered(second));
    assert!(matches!(engine.init(4, 4), Err(Error::EngineStopped)));
}

#[test]
fn test_detached_present_is_ordered_before_later_requests() {
    let config = EngineConfig::default().present_mode(PresentMode::Detached);
    let engine = start_engine_with(config, Device::new);
    let handle = engine.init(6, 6).unwrap();
    let uploaded = random_pixels(Size2D::new(6, 6));
    engine.draw(handle, None, uploaded.clone()).unwrap();
    engine.invalidate(handle).unwrap();

    let mut pixels = engine.get_pixels(handle).unwrap();
    flip_rows(&mut pixels, 6);
    assert_eq!(pixels, uploaded);
    assert_eq!(engine.provider().frames_available(handle), Some(1));
}

#[test]
fn test_every_present_announces_a_frame() {
    let engine = start_engine();
    let handle = engine.init(2, 2).unwrap();
    for _ in 0..3 {
        engine.invalidate(handle).unwrap();
    }
    assert_eq!(engine.provider().frames_available(handle), Some(3));
    let drawable = engine.provider().drawable(handle).unwrap();
    assert_eq!(drawable.swap_count(), 3);
}

#[test]
fn test_concurrent_callers_each_see_their_own_surface() {
    let engine = start_engine();
    thread::scope(|scope| {
        for value in 1..=4u8 {
            let engine = &engine;
            scope.spawn(move || {
                let handle = engine.init(8, 8).unwrap();
                for round in 0..10u8 {
                    let fill = value * 10 + round;
                    engine.draw(handle, None, vec![fill; 8 * 8 * 4]).unwrap();
                    engine.invalidate(handle).unwrap();
                    let pixels = engine.get_pixels(handle).unwrap();
                    assert!(pixels.iter().all(|&byte| byte == fill));
                }
                engine.dispose(handle).unwrap();
            });
        }
    });
    assert!(engine.list_textures().is_empty());
}

#[test]
fn test_uploads_from_many_threads_apply_in_queue_order() {
    const THREADS: u8 = 4;
    const ROUNDS: u8 = 8;

    let uploads = Arc::new(Mutex::new(vec![]));
    let log = uploads.clone();
    let engine = Engine::new(EngineConfig::default(), Compositor::new(), move || UploadLog {
        device: Device::new(),
        uploads: log,
    });
    let handle = engine.init(8, 8).unwrap();

    let barrier = Barrier::new(THREADS as usize);
    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            let (engine, barrier) = (&engine, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let value = 1 + thread_index * ROUNDS + round;
                    engine.draw(handle, None, vec![value; 8 * 8 * 4]).unwrap();
                }
            });
        }
    });
    engine.invalidate(handle).unwrap();
    let pixels = engine.get_pixels(handle).unwrap();

    let applied = uploads.lock().unwrap().clone();
    assert_eq!(applied.len(), (THREADS * ROUNDS) as usize);
    let last = *applied.last().unwrap();
    assert!(pixels.iter().all(|&byte| byte == last));

    // Every submitter's uploads were applied in the order it made them.
    for thread_index in 0..THREADS {
        let applied_for_thread: Vec<u8> = applied
            .iter()
            .cloned()
            .filter(|&value| (value - 1) / ROUNDS == thread_index)
            .collect();
        let submitted: Vec<u8> = (0..ROUNDS)
            .map(|round| 1 + thread_index * ROUNDS + round)
            .collect();
        assert_eq!(applied_for_thread, submitted);
    }
}

#[test]
fn test_random_regions_read_back_byte_for_byte() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (width, height) = (37, 23);
    let engine = start_engine();
    let handle = engine.init(width as i64, height as i64).unwrap();

    for _ in 0..16 {
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        let region = Region::new(
            x,
            y,
            rng.gen_range(1..=width - x),
            rng.gen_range(1..=height - y),
        );
        let uploaded: Vec<u8> = (0..region.width * region.height * 4)
            .map(|_| rng.gen())
            .collect();
        engine.draw(handle, Some(region), uploaded.clone()).unwrap();
        engine.invalidate(handle).unwrap();

        let mut pixels = engine.get_pixels(handle).unwrap();
        flip_rows(&mut pixels, width as usize);
        let row_len = (region.width * 4) as usize;
        for row in 0..region.height {
            let dst = (((region.y + row) * width + region.x) * 4) as usize;
            let src = row as usize * row_len;
            assert_eq!(
                &pixels[dst..dst + row_len],
                &uploaded[src..src + row_len],
                "region {:?}, row {}",
                region,
                row
            );
        }
    }
}

#[cfg(egl_backend)]
mod egl {
    use crate::platform::egl::{Device, OffscreenProvider};
    use crate::{Engine, EngineConfig};

    use serial_test::serial;

    // Needs a working EGL display; run with `--ignored`.
    #[test]
    #[ignore]
    #[serial]
    fn test_offscreen_present_reads_back_upload() {
        let engine = Engine::new(EngineConfig::default(), OffscreenProvider::new(), Device::new);
        engine.start().unwrap();
        let handle = engine.init(16, 16).unwrap();
        let red: Vec<u8> = [255, 0, 0, 255].iter().cycle().take(16 * 16 * 4).cloned().collect();
        engine.draw(handle, None, red.clone()).unwrap();
        engine.invalidate(handle).unwrap();
        assert_eq!(engine.get_pixels(handle).unwrap(), red);
        engine.dispose(handle).unwrap();
    }
}
