use image::{ImageBuffer, Luma, RgbImage};

use crate::error::{Error, Result};

/// 3-channel, 8 bits per sample color raster
pub type ColorImage = RgbImage;

/// Single-channel, 16 bits per sample depth raster
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Color + depth pair held by the recorder slot.
///
/// Buffers are allocated once at the declared resolution and overwritten in
/// place on every capture.
#[derive(Clone)]
pub struct CapturedFrame {
    pub color: ColorImage,
    pub depth: DepthImage,

    /// Seconds since the recording session started
    pub capture_time: f64,
}

impl CapturedFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            color: ColorImage::new(width, height),
            depth: DepthImage::new(width, height),
            capture_time: 0.0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.color.dimensions()
    }

    /// Copy raw capture-source pixels into the pre-allocated rasters.
    ///
    /// `color` is packed RGB, `depth` is one sample per pixel. Either slice
    /// having the wrong length for the declared resolution is a caller bug
    /// and is rejected before anything is written.
    pub fn fill_from(&mut self, color: &[u8], depth: &[u16], capture_time: f64) -> Result<()> {
        check_len(self.dimensions(), color.len(), 3)?;
        check_len(self.dimensions(), depth.len(), 1)?;

        // Deref to the backing sample slices
        let color_samples: &mut [u8] = &mut self.color;
        color_samples.copy_from_slice(color);
        let depth_samples: &mut [u16] = &mut self.depth;
        depth_samples.copy_from_slice(depth);

        self.capture_time = capture_time;
        Ok(())
    }
}

/// Verify a sample count against `width * height * channels`
fn check_len((width, height): (u32, u32), len: usize, channels: usize) -> Result<()> {
    let expected = width as usize * height as usize * channels;
    if len == expected {
        return Ok(());
    }

    // Report the row count the caller's buffer would correspond to
    let rows = len / (width as usize * channels).max(1);
    Err(Error::ResolutionMismatch {
        expected: (width, height),
        actual: (width, rows as u32),
    })
}
