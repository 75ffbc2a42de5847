// swrend/demos/offscreen.rs
//
//! Streams a CPU-rendered pattern into a surface tile by tile, presents it, and writes the
//! read-back frame to a PNG file.

use clap::{App, Arg};
use png::{BitDepth, ColorType, Encoder};
use std::fs::File;
use std::path::Path;
use swrend::platform::software::{Compositor, Device};
use swrend::{flip_rows, DrawableProvider, Engine, EngineConfig, Region};

const TILE_SIZE: i32 = 32;

static APP_NAME: &'static str = "swrend offscreen demo";

fn main() {
    env_logger::init();

    let matches = App::new(APP_NAME)
        .arg(
            Arg::with_name("egl")
                .short("e")
                .long("egl")
                .help("Render through EGL instead of the software device"),
        )
        .arg(
            Arg::with_name("width")
                .long("width")
                .takes_value(true)
                .default_value("256")
                .help("Surface width"),
        )
        .arg(
            Arg::with_name("height")
                .long("height")
                .takes_value(true)
                .default_value("256")
                .help("Surface height"),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .required(true)
                .index(1)
                .help("Output PNG file"),
        )
        .get_matches();

    let width: i32 = matches.value_of("width").unwrap().parse().unwrap();
    let height: i32 = matches.value_of("height").unwrap().parse().unwrap();
    let output_path = Path::new(matches.value_of("OUTPUT").unwrap()).to_owned();
    let output_file = File::create(output_path).unwrap();

    let pixels = if matches.is_present("egl") {
        render_with_egl(width, height)
    } else {
        let engine = Engine::new(EngineConfig::default(), Compositor::new(), Device::new);
        render(&engine, width, height)
    };

    let mut encoder = Encoder::new(output_file, width as u32, height as u32);
    encoder.set_color(ColorType::Rgba);
    encoder.set_depth(BitDepth::Eight);
    let mut image_writer = encoder.write_header().unwrap();
    image_writer.write_image_data(&pixels).unwrap();
}

#[cfg(egl_backend)]
fn render_with_egl(width: i32, height: i32) -> Vec<u8> {
    use swrend::platform::egl::{Device, OffscreenProvider};
    let engine = Engine::new(EngineConfig::default(), OffscreenProvider::new(), Device::new);
    render(&engine, width, height)
}

#[cfg(not(egl_backend))]
fn render_with_egl(_: i32, _: i32) -> Vec<u8> {
    panic!("EGL is not available on this platform");
}

fn render<D, P>(engine: &Engine<D, P>, width: i32, height: i32) -> Vec<u8>
where
    D: swrend::Device + 'static,
    P: DrawableProvider<Drawable = D::Drawable> + 'static,
{
    engine.start().unwrap();
    let handle = engine.init(width as i64, height as i64).unwrap();

    for tile_y in (0..height).step_by(TILE_SIZE as usize) {
        for tile_x in (0..width).step_by(TILE_SIZE as usize) {
            let region = Region::new(
                tile_x,
                tile_y,
                TILE_SIZE.min(width - tile_x),
                TILE_SIZE.min(height - tile_y),
            );
            engine
                .draw(handle, Some(region), shade_tile(&region, width, height))
                .unwrap();
        }
    }
    engine.invalidate(handle).unwrap();

    let mut pixels = engine.get_pixels(handle).unwrap();
    flip_rows(&mut pixels, width as usize);
    engine.dispose(handle).unwrap();
    engine.stop();
    pixels
}

// A gradient with a checkerboard of tiles darkened.
fn shade_tile(region: &Region, width: i32, height: i32) -> Vec<u8> {
    let darken = (region.x / TILE_SIZE + region.y / TILE_SIZE) % 2 == 1;
    let mut pixels = Vec::with_capacity((region.width * region.height * 4) as usize);
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            let red = (x * 255 / width.max(1)) as u8;
            let green = (y * 255 / height.max(1)) as u8;
            let blue = if darken { 64 } else { 192 };
            pixels.extend_from_slice(&[red, green, blue, 255]);
        }
    }
    pixels
}
