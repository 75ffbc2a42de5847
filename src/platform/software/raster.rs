// swrend/src/platform/software/raster.rs
//
//! CPU rasterization of the textured quad pass.

use euclid::default::{Rect, Size2D};

// Pixel centers exactly on a shared edge may round either way; covering them twice is harmless.
const EDGE_EPSILON: f64 = 1e-7;

/// An RGBA8 color buffer, bottom row first.
pub(crate) struct Target<'a> {
    pub(crate) pixels: &'a mut [u8],
    pub(crate) size: Size2D<i32>,
}

/// A bound texture as seen by the fragment stage, sampled nearest-neighbor and clamped to its
/// edges. An empty sampler stands for an incomplete texture.
pub(crate) struct Sampler<'a> {
    pub(crate) pixels: &'a [u8],
    pub(crate) size: Size2D<i32>,
}

#[derive(Clone, Copy, Debug)]
struct Vertex {
    x: f64,
    y: f64,
    u: f64,
    v: f64,
}

impl<'a> Sampler<'a> {
    fn texel(&self, x: i32, y: i32) -> [u8; 4] {
        let offset = ((y * self.size.width + x) * 4) as usize;
        match self.pixels.get(offset..offset + 4) {
            Some(texel) => [texel[0], texel[1], texel[2], texel[3]],
            None => [0, 0, 0, 255],
        }
    }

    /// Samples at normalized coordinates; `t = 0` is the first row of texel data.
    pub(crate) fn sample(&self, s: f64, t: f64) -> [u8; 4] {
        let (width, height) = (self.size.width, self.size.height);
        if width <= 0 || height <= 0 {
            // Incomplete textures sample as opaque black.
            return [0, 0, 0, 255];
        }

        let x = ((s * width as f64).floor() as i32).max(0).min(width - 1);
        let y = ((t * height as f64).floor() as i32).max(0).min(height - 1);
        self.texel(x, y)
    }
}

/// Fills all of `target` with `rgba`. Like `glClear`, this ignores the viewport.
pub(crate) fn clear(target: &mut Target, rgba: [f32; 4]) {
    let color = [
        quantize(rgba[0]),
        quantize(rgba[1]),
        quantize(rgba[2]),
        quantize(rgba[3]),
    ];
    for texel in target.pixels.chunks_exact_mut(4) {
        texel.copy_from_slice(&color);
    }
}

fn quantize(value: f32) -> u8 {
    (value.max(0.0).min(1.0) * 255.0).round() as u8
}

/// Rasterizes a triangle strip through the quad program: positions pass through in clip space,
/// texture coordinates have V flipped, and each fragment takes the sampled texel unchanged.
pub(crate) fn draw_triangle_strip(
    target: &mut Target,
    viewport: &Rect<i32>,
    positions: &[[f32; 2]],
    uvs: &[[f32; 2]],
    sampler: &Sampler,
) {
    let vertices: Vec<Vertex> = positions
        .iter()
        .zip(uvs.iter())
        .map(|(position, uv)| Vertex {
            x: viewport.origin.x as f64
                + (position[0] as f64 + 1.0) * 0.5 * viewport.size.width as f64,
            y: viewport.origin.y as f64
                + (position[1] as f64 + 1.0) * 0.5 * viewport.size.height as f64,
            u: uv[0] as f64,
            v: 1.0 - uv[1] as f64,
        })
        .collect();

    for triangle in vertices.windows(3) {
        draw_triangle(target, viewport, triangle[0], triangle[1], triangle[2], sampler);
    }
}

fn edge(a: Vertex, b: Vertex, x: f64, y: f64) -> f64 {
    (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x)
}

fn draw_triangle(
    target: &mut Target,
    viewport: &Rect<i32>,
    v0: Vertex,
    v1: Vertex,
    v2: Vertex,
    sampler: &Sampler,
) {
    let area = edge(v0, v1, v2.x, v2.y);
    if area == 0.0 {
        return;
    }

    // Clip the bounding box to both the viewport and the color buffer.
    let min_x = v0.x.min(v1.x).min(v2.x).floor().max(viewport.min_x() as f64).max(0.0) as i32;
    let min_y = v0.y.min(v1.y).min(v2.y).floor().max(viewport.min_y() as f64).max(0.0) as i32;
    let max_x = v0
        .x
        .max(v1.x)
        .max(v2.x)
        .ceil()
        .min(viewport.max_x() as f64)
        .min(target.size.width as f64) as i32;
    let max_y = v0
        .y
        .max(v1.y)
        .max(v2.y)
        .ceil()
        .min(viewport.max_y() as f64)
        .min(target.size.height as f64) as i32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = (x as f64 + 0.5, y as f64 + 0.5);
            let w0 = edge(v1, v2, cx, cy) / area;
            let w1 = edge(v2, v0, cx, cy) / area;
            let w2 = edge(v0, v1, cx, cy) / area;
            if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
                continue;
            }

            let u = w0 * v0.u + w1 * v1.u + w2 * v2.u;
            let v = w0 * v0.v + w1 * v1.v + w2 * v2.v;
            let texel = sampler.sample(u, v);

            let offset = ((y * target.size.width + x) * 4) as usize;
            target.pixels[offset..offset + 4].copy_from_slice(&texel);
        }
    }
}
