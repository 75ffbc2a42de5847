// swrend/src/request.rs
//
//! Requests from the host bridge and their responses.

use crate::surface::SurfaceHandle;

use euclid::default::{Point2D, Rect, Size2D};

/// A rectangle in surface pixels, as sent by the host. Width and height may be invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Region {
        Region {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns the region as a rectangle if it is non-empty and lies within `bounds`.
    pub fn within(&self, bounds: &Size2D<i32>) -> Option<Rect<i32>> {
        if self.x < 0 || self.y < 0 || self.width <= 0 || self.height <= 0 {
            return None;
        }
        let right = self.x.checked_add(self.width)?;
        let bottom = self.y.checked_add(self.height)?;
        if right > bounds.width || bottom > bounds.height {
            return None;
        }
        Some(Rect::new(
            Point2D::new(self.x, self.y),
            Size2D::new(self.width, self.height),
        ))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Create a surface of the given size.
    Init { width: Option<i64>, height: Option<i64> },
    /// Upload pixels into `region` of the surface, or into the whole surface if `None`.
    Draw {
        texture: SurfaceHandle,
        region: Option<Region>,
        pixels: Vec<u8>,
    },
    /// Present the surface's texture.
    Invalidate { texture: SurfaceHandle },
    /// Read back the presented pixels.
    GetPixels { texture: SurfaceHandle },
    GetSize { texture: SurfaceHandle },
    ListTextures,
    Dispose { texture: SurfaceHandle },
    /// A method this engine doesn't know.
    Unimplemented { method: String },
}

impl Request {
    /// The method name the host uses for this request.
    pub fn method(&self) -> &str {
        match *self {
            Request::Init { .. } => "init",
            Request::Draw { .. } => "draw",
            Request::Invalidate { .. } => "invalidate",
            Request::GetPixels { .. } => "get_pixels",
            Request::GetSize { .. } => "get_size",
            Request::ListTextures => "list_textures",
            Request::Dispose { .. } => "dispose",
            Request::Unimplemented { ref method } => method,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Texture(SurfaceHandle),
    Pixels(Vec<u8>),
    Size([i32; 2]),
    Textures(Vec<SurfaceHandle>),
    Done,
    NotImplemented,
}

#[cfg(test)]
mod tests {
    use super::Region;
    use euclid::default::Size2D;

    #[test]
    fn test_region_within_bounds() {
        let bounds = Size2D::new(64, 32);
        let rect = Region::new(8, 4, 56, 28).within(&bounds).unwrap();
        assert_eq!(rect.max_x(), 64);
        assert_eq!(rect.max_y(), 32);
    }

    #[test]
    fn test_region_rejects_missing_dimensions_and_overflow() {
        let bounds = Size2D::new(64, 32);
        assert!(Region::new(0, 0, -1, -1).within(&bounds).is_none());
        assert!(Region::new(0, 0, 0, 32).within(&bounds).is_none());
        assert!(Region::new(-1, 0, 8, 8).within(&bounds).is_none());
        assert!(Region::new(60, 0, 8, 8).within(&bounds).is_none());
        assert!(Region::new(0, i32::MAX, 8, 8).within(&bounds).is_none());
    }
}
