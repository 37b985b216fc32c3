//! File-backed timestamped log.
//!
//! ```text
//! Header (6 bytes):
//!   Magic: "KSTM" (4 bytes)
//!   Version: u16
//!
//! Record (16 + length bytes), repeated:
//!   Timestamp: f64 (seconds since recording start)
//!   Length: u64
//!   Payload: [u8; length]
//! ```
//!
//! All integers and floats are little-endian. A record cut short by a crash
//! is treated as the end of the stream.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::{LogReader, LogWriter};
use crate::error::{Error, Result};

/// Magic bytes identifying a stream log
pub const LOG_MAGIC: &[u8; 4] = b"KSTM";

/// Current format version
pub const LOG_VERSION: u16 = 1;

/// Magic(4) + Version(2)
pub const HEADER_SIZE: u64 = 6;

/// Timestamp(8) + Length(8)
pub const RECORD_HEADER_SIZE: u64 = 16;

/// Seekable byte store a [`FileLogWriter`] appends to
pub trait LogStorage: Write + Seek {
    /// Cut the store back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Push written bytes to durable storage
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogStorage for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends records to a log file.
///
/// Every record is flushed as a whole. When an append fails the storage is
/// cut back to the end of the last complete record, so later records still
/// follow a well-formed prefix.
pub struct FileLogWriter<S: LogStorage = File> {
    writer: Option<BufWriter<S>>,
    /// End offset of the last complete record
    committed: u64,
}

impl FileLogWriter<File> {
    /// Create (or truncate) a log file and write its header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        let writer = Self::from_storage(file)?;

        debug!("Created stream log {}", path.as_ref().display());
        Ok(writer)
    }
}

impl<S: LogStorage> FileLogWriter<S> {
    /// Start a log on empty storage
    pub fn from_storage(storage: S) -> Result<Self> {
        let mut writer = BufWriter::new(storage);
        writer.write_all(LOG_MAGIC)?;
        writer.write_all(&LOG_VERSION.to_le_bytes())?;
        writer.flush()?;

        Ok(Self {
            writer: Some(writer),
            committed: HEADER_SIZE,
        })
    }

    /// Drop whatever part of a failed record was buffered or written
    fn roll_back(&mut self) -> io::Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let (mut storage, _unwritten) = writer.into_parts();
        storage.truncate(self.committed)?;
        storage.seek(SeekFrom::Start(self.committed))?;
        self.writer = Some(BufWriter::new(storage));
        Ok(())
    }
}

fn append_record<W: Write>(writer: &mut W, timestamp: f64, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&timestamp.to_le_bytes())?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

impl<S: LogStorage + Send> LogWriter for FileLogWriter<S> {
    fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "stream log is closed"))?;

        if let Err(e) = append_record(writer, timestamp, payload) {
            if let Err(rollback) = self.roll_back() {
                // The tail can no longer be trusted, stop appending to it
                warn!("Failed to discard partial record: {}", rollback);
                self.writer = None;
            }
            return Err(e.into());
        }

        self.committed += RECORD_HEADER_SIZE + payload.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_mut().sync()?;
        }
        Ok(())
    }
}

impl<S: LogStorage> Drop for FileLogWriter<S> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().and_then(|_| writer.get_mut().sync()) {
                warn!("Failed to close stream log: {}", e);
            }
        }
    }
}

/// Timestamp and length of the record at the read position
#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    timestamp: f64,
    length: u64,
}

pub struct FileLogReader {
    reader: BufReader<File>,
    file_len: u64,
    /// Offset of the next unread byte
    position: u64,
    next: Option<RecordHeader>,
    last_timestamp: f64,
}

impl FileLogReader {
    /// Open a log file and position it at the first record
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        let mut version = [0u8; 2];
        reader
            .read_exact(&mut magic)
            .and_then(|_| reader.read_exact(&mut version))
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => Error::InvalidLog("file too short for header".into()),
                _ => Error::Io(e),
            })?;

        if &magic != LOG_MAGIC {
            return Err(Error::InvalidLog("bad magic bytes".into()));
        }
        let version = u16::from_le_bytes(version);
        if version != LOG_VERSION {
            return Err(Error::InvalidLog(format!("unsupported version {}", version)));
        }

        let mut log = Self {
            reader,
            file_len,
            position: HEADER_SIZE,
            next: None,
            last_timestamp: 0.0,
        };
        log.peek()?;
        Ok(log)
    }

    /// Load the header of the record at the read position into `next`
    fn peek(&mut self) -> Result<()> {
        self.next = None;

        let remaining = self.file_len.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(());
        }
        if remaining < RECORD_HEADER_SIZE {
            warn!(
                "Ignoring {} trailing bytes of a truncated record header",
                remaining
            );
            return Ok(());
        }

        let mut buf = [0u8; RECORD_HEADER_SIZE as usize];
        self.reader.read_exact(&mut buf)?;
        self.position += RECORD_HEADER_SIZE;

        let mut ts = [0u8; 8];
        let mut len = [0u8; 8];
        ts.copy_from_slice(&buf[..8]);
        len.copy_from_slice(&buf[8..]);
        let header = RecordHeader {
            timestamp: f64::from_le_bytes(ts),
            length: u64::from_le_bytes(len),
        };

        if header.length > self.file_len - self.position {
            warn!(
                "Record at {:.3}s claims {} bytes, only {} left; treating as end of stream",
                header.timestamp,
                header.length,
                self.file_len - self.position
            );
            return Ok(());
        }

        self.next = Some(header);
        Ok(())
    }
}

impl LogReader for FileLogReader {
    fn next_frame(&mut self, payload: &mut Vec<u8>) -> Result<bool> {
        let Some(header) = self.next else {
            return Ok(false);
        };

        payload.resize(header.length as usize, 0);
        self.reader.read_exact(payload)?;
        self.position += header.length;
        self.last_timestamp = header.timestamp;

        self.peek()?;
        Ok(true)
    }

    fn current_timestamp(&self) -> f64 {
        self.next
            .map(|header| header.timestamp)
            .unwrap_or(self.last_timestamp)
    }

    fn is_eof(&self) -> bool {
        self.next.is_none()
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        self.position = HEADER_SIZE;
        self.last_timestamp = 0.0;
        self.peek()
    }
}
