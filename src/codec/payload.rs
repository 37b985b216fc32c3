//! Length-prefixed framing of the color + depth payload.
//!
//! ```text
//! payload := colorBlock depthBlock
//! block   := length: u64 (little-endian) | bytes[length]
//! ```
//!
//! The prefix width and byte order are fixed so logs move between hosts.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Size of one block length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Borrowed view of the two blocks inside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadBlocks<'a> {
    pub color: &'a [u8],
    pub depth: &'a [u8],
}

/// Append a complete payload to `out`
pub fn write_payload(color: &[u8], depth: &[u8], out: &mut BytesMut) {
    out.reserve(2 * LENGTH_PREFIX_SIZE + color.len() + depth.len());
    write_block(color, out);
    write_block(depth, out);
}

fn write_block(block: &[u8], out: &mut BytesMut) {
    out.put_u64_le(block.len() as u64);
    out.put_slice(block);
}

/// Split a payload into its blocks, trusting the length prefixes.
///
/// A prefix claiming more bytes than remain is rejected without reading past
/// the end of `data`.
pub fn read_payload(data: &[u8]) -> Result<PayloadBlocks<'_>> {
    let mut rest = data;
    let color = read_block(&mut rest)?;
    let depth = read_block(&mut rest)?;

    if !rest.is_empty() {
        tracing::debug!("Ignoring {} trailing payload bytes", rest.len());
    }

    Ok(PayloadBlocks { color, depth })
}

fn read_block<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8]> {
    if rest.remaining() < LENGTH_PREFIX_SIZE {
        return Err(Error::TruncatedPayload {
            needed: LENGTH_PREFIX_SIZE as u64,
            available: rest.remaining(),
        });
    }

    let len = rest.get_u64_le();
    if len > rest.len() as u64 {
        return Err(Error::TruncatedPayload {
            needed: len,
            available: rest.len(),
        });
    }

    let remaining: &'a [u8] = *rest;
    let (block, tail) = remaining.split_at(len as usize);
    *rest = tail;
    Ok(block)
}
