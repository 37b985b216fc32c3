//! In-memory log shared between a writer and any number of readers

use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use super::{LogReader, LogWriter};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<Mutex<Vec<(f64, Bytes)>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from pre-made records
    pub fn from_records<I, B>(records: I) -> Self
    where
        I: IntoIterator<Item = (f64, B)>,
        B: Into<Bytes>,
    {
        let log = Self::new();
        log.lock()
            .extend(records.into_iter().map(|(ts, payload)| (ts, payload.into())));
        log
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(f64, Bytes)>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn writer(&self) -> MemoryLogWriter {
        MemoryLogWriter {
            log: self.clone(),
            closed: false,
        }
    }

    pub fn reader(&self) -> MemoryLogReader {
        MemoryLogReader {
            log: self.clone(),
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<(f64, Bytes)> {
        self.lock().clone()
    }
}

pub struct MemoryLogWriter {
    log: MemoryLog,
    closed: bool,
}

impl LogWriter for MemoryLogWriter {
    fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(io::Error::new(ErrorKind::NotConnected, "stream log is closed").into());
        }
        self.log
            .lock()
            .push((timestamp, Bytes::copy_from_slice(payload)));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

pub struct MemoryLogReader {
    log: MemoryLog,
    index: usize,
}

impl LogReader for MemoryLogReader {
    fn next_frame(&mut self, payload: &mut Vec<u8>) -> Result<bool> {
        let records = self.log.lock();
        let Some((_, data)) = records.get(self.index) else {
            return Ok(false);
        };

        payload.clear();
        payload.extend_from_slice(data);
        self.index += 1;
        Ok(true)
    }

    fn current_timestamp(&self) -> f64 {
        let records = self.log.lock();
        records
            .get(self.index)
            .or_else(|| records.last())
            .map(|(ts, _)| *ts)
            .unwrap_or(0.0)
    }

    fn is_eof(&self) -> bool {
        self.index >= self.log.len()
    }

    fn rewind(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }
}
