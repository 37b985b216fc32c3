//! Rendering targets for decoded frames

use image::{imageops, Rgb, RgbImage};

use crate::capture::frame::{ColorImage, DepthImage};

/// Destination the player presents its rasters on
pub trait Canvas {
    fn draw_color(&mut self, image: &ColorImage, x: i32, y: i32);
    fn draw_depth(&mut self, image: &DepthImage, x: i32, y: i32);
}

/// Software canvas compositing frames into an RGB image.
///
/// Depth is shown as grayscale using the high byte of each sample.
pub struct RasterCanvas {
    target: RgbImage,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            target: RgbImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.target
    }

    pub fn into_image(self) -> RgbImage {
        self.target
    }
}

impl Canvas for RasterCanvas {
    fn draw_color(&mut self, image: &ColorImage, x: i32, y: i32) {
        imageops::replace(&mut self.target, image, x as i64, y as i64);
    }

    fn draw_depth(&mut self, image: &DepthImage, x: i32, y: i32) {
        let gray = RgbImage::from_fn(image.width(), image.height(), |px, py| {
            let v = (image.get_pixel(px, py).0[0] >> 8) as u8;
            Rgb([v, v, v])
        });
        imageops::replace(&mut self.target, &gray, x as i64, y as i64);
    }
}
