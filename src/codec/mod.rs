pub mod payload;
pub mod raster;

use bytes::BytesMut;

use crate::capture::frame::{CapturedFrame, ColorImage, DepthImage};
use crate::error::Result;

pub use payload::{read_payload, write_payload, PayloadBlocks, LENGTH_PREFIX_SIZE};

/// Turns captured frames into wire payloads, reusing its scratch buffers
pub struct FrameEncoder {
    jpeg_quality: u8,
    color: Vec<u8>,
    depth: Vec<u8>,
    payload: BytesMut,
}

impl FrameEncoder {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality,
            color: Vec::new(),
            depth: Vec::new(),
            payload: BytesMut::new(),
        }
    }

    /// Encode both rasters and frame them. The returned slice is valid until
    /// the next call.
    pub fn encode(&mut self, frame: &CapturedFrame) -> Result<&[u8]> {
        self.color.clear();
        self.depth.clear();
        self.payload.clear();

        raster::encode_color(&frame.color, self.jpeg_quality, &mut self.color)?;
        raster::encode_depth(&frame.depth, &mut self.depth)?;
        write_payload(&self.color, &self.depth, &mut self.payload);

        Ok(&self.payload)
    }
}

/// Decode a payload into the given rasters.
///
/// Framing is checked before either raster is touched, but a depth failure
/// leaves `color` already overwritten. Callers that must keep a consistent
/// pair decode into scratch rasters.
pub fn decode_payload(data: &[u8], color: &mut ColorImage, depth: &mut DepthImage) -> Result<()> {
    let blocks = read_payload(data)?;
    raster::decode_color_into(blocks.color, color)?;
    raster::decode_depth_into(blocks.depth, depth)?;
    Ok(())
}
