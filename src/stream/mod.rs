//! Append-only timestamped log consumed by the recorder and the player.
//!
//! Each record is a `(timestamp, payload)` pair. Timestamps are seconds
//! relative to the start of the recording and are non-decreasing.

pub mod file;
pub mod memory;

use crate::error::Result;

pub use file::{FileLogReader, FileLogWriter};
pub use memory::MemoryLog;

/// Write side of a log
pub trait LogWriter: Send {
    /// Append one record
    fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()>;

    /// Flush and release the underlying resource. Calling it twice is allowed.
    fn close(&mut self) -> Result<()>;
}

/// Sequential read side of a log
pub trait LogReader: Send {
    /// Read the record at the read position into `payload` and advance.
    /// Returns `false` at end-of-stream, leaving `payload` untouched.
    fn next_frame(&mut self, payload: &mut Vec<u8>) -> Result<bool>;

    /// Timestamp of the record at the read position. At end-of-stream this
    /// is the last record's timestamp, or 0.0 for an empty log.
    fn current_timestamp(&self) -> f64;

    fn is_eof(&self) -> bool;

    /// Move the read position back to the first record
    fn rewind(&mut self) -> Result<()>;
}

impl<W: LogWriter + ?Sized> LogWriter for Box<W> {
    fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()> {
        (**self).write(timestamp, payload)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<R: LogReader + ?Sized> LogReader for Box<R> {
    fn next_frame(&mut self, payload: &mut Vec<u8>) -> Result<bool> {
        (**self).next_frame(payload)
    }

    fn current_timestamp(&self) -> f64 {
        (**self).current_timestamp()
    }

    fn is_eof(&self) -> bool {
        (**self).is_eof()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}
