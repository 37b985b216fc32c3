//! Lossy color / lossless depth image codecs

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

use crate::capture::frame::{ColorImage, DepthImage};
use crate::error::{Error, Result};

/// Encode the color raster as JPEG, appending to `out`
pub fn encode_color(image: &ColorImage, quality: u8, out: &mut Vec<u8>) -> Result<()> {
    let encoder = JpegEncoder::new_with_quality(&mut *out, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(())
}

/// Encode the depth raster as 16-bit grayscale PNG, appending to `out`
pub fn encode_depth(image: &DepthImage, out: &mut Vec<u8>) -> Result<()> {
    let encoder =
        PngEncoder::new_with_quality(&mut *out, CompressionType::Fast, FilterType::Adaptive);
    image.write_with_encoder(encoder)?;
    Ok(())
}

/// Decode JPEG bytes over `target` in place.
///
/// `target` is only written once the decoded size is known to match.
#[cfg(feature = "fast-jpeg")]
pub fn decode_color_into(bytes: &[u8], target: &mut ColorImage) -> Result<()> {
    let mut decoder = zune_jpeg::JpegDecoder::new(bytes);
    let pixels = decoder
        .decode()
        .map_err(|e| Error::Jpeg(format!("{:?}", e)))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| Error::Jpeg("missing frame header".into()))?;

    check_dimensions(target.dimensions(), (width as u32, height as u32))?;
    if pixels.len() != target.len() {
        return Err(Error::Jpeg(format!(
            "decoded {} samples, expected {} (non-RGB output)",
            pixels.len(),
            target.len()
        )));
    }

    let samples: &mut [u8] = target;
    samples.copy_from_slice(&pixels);
    Ok(())
}

/// Decode JPEG bytes over `target` in place.
///
/// `target` is only written once the decoded size is known to match.
#[cfg(not(feature = "fast-jpeg"))]
pub fn decode_color_into(bytes: &[u8], target: &mut ColorImage) -> Result<()> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.into_rgb8();
    check_dimensions(target.dimensions(), decoded.dimensions())?;

    let samples: &mut [u8] = target;
    samples.copy_from_slice(decoded.as_raw());
    Ok(())
}

/// Decode PNG bytes over `target` in place
pub fn decode_depth_into(bytes: &[u8], target: &mut DepthImage) -> Result<()> {
    let decoded = match image::load_from_memory_with_format(bytes, ImageFormat::Png)? {
        DynamicImage::ImageLuma16(depth) => depth,
        other => other.into_luma16(),
    };
    check_dimensions(target.dimensions(), decoded.dimensions())?;

    let samples: &mut [u16] = target;
    samples.copy_from_slice(decoded.as_raw());
    Ok(())
}

fn check_dimensions(expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected != actual {
        return Err(Error::ResolutionMismatch { expected, actual });
    }
    Ok(())
}
