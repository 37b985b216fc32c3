//! Background-encoded recording of color + depth captures

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::CapturedFrame;
use crate::clock::{seconds_between, Clock};
use crate::codec::FrameEncoder;
use crate::error::{Error, Result};
use crate::pipeline::{Deposit, FrameMailbox, Take};
use crate::stream::{FileLogWriter, LogWriter};
use crate::{RecorderConfig, RecorderStats, StreamConfig};

/// Diagnostics emitted while recording
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A pending capture was overwritten before the encoder reached it
    FrameDropped { capture_time: f64 },
    FrameWritten {
        index: u64,
        capture_time: f64,
        bytes: usize,
    },
    EncodeFailed { capture_time: f64, reason: String },
    WriteFailed { capture_time: f64, reason: String },
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    encode_failures: AtomicU64,
    write_failures: AtomicU64,
}

impl Stats {
    fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.encode_failures.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            frames_written: self.frames_written.load(Ordering::Acquire),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared by the recorder, its sinks and the encoder thread
struct Shared {
    mailbox: FrameMailbox,
    recording: AtomicBool,
    /// Clock reading at session start, in nanoseconds
    start_anchor_ns: AtomicU64,
    clock: Arc<dyn Clock>,
    stats: CachePadded<Stats>,
    events_tx: Sender<RecorderEvent>,
    /// Kept to discard the oldest event when nobody is listening
    events_rx: Receiver<RecorderEvent>,
}

impl Shared {
    fn emit(&self, event: RecorderEvent) {
        let mut event = event;
        loop {
            match self.events_tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.events_rx.try_recv();
                    event = rejected;
                }
            }
        }
    }

    fn add_frame(&self, color: &[u8], depth: &[u16]) -> Result<()> {
        if !self.recording.load(Ordering::Acquire) {
            return Ok(());
        }

        let outcome = self.mailbox.deposit(color, depth, || {
            let anchor = Duration::from_nanos(self.start_anchor_ns.load(Ordering::Acquire));
            seconds_between(anchor, self.clock.now())
        })?;

        if let Deposit::Replaced {
            dropped_capture_time,
        } = outcome
        {
            warn!("drop frame at {:.3}s", dropped_capture_time);
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("recorder_frames_dropped").increment(1);
            self.emit(RecorderEvent::FrameDropped {
                capture_time: dropped_capture_time,
            });
        }
        Ok(())
    }

    /// Encode and append one frame. Failures are reported and swallowed.
    fn write_frame(
        &self,
        encoder: &mut FrameEncoder,
        writer: &mut dyn LogWriter,
        frame: &CapturedFrame,
    ) {
        let capture_time = frame.capture_time;
        let encode_start = Instant::now();

        let payload = match encoder.encode(frame) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode frame at {:.3}s: {}", capture_time, e);
                self.stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("recorder_encode_failures").increment(1);
                self.emit(RecorderEvent::EncodeFailed {
                    capture_time,
                    reason: e.to_string(),
                });
                return;
            }
        };
        metrics::histogram!("recorder_encode_time_us")
            .record(encode_start.elapsed().as_micros() as f64);

        if let Err(e) = writer.write(capture_time, payload) {
            error!("Failed to append frame at {:.3}s: {}", capture_time, e);
            self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("recorder_write_failures").increment(1);
            self.emit(RecorderEvent::WriteFailed {
                capture_time,
                reason: e.to_string(),
            });
            return;
        }

        let bytes = payload.len();
        let index = self.stats.frames_written.fetch_add(1, Ordering::AcqRel);
        metrics::counter!("recorder_frames_written").increment(1);
        self.emit(RecorderEvent::FrameWritten {
            index,
            capture_time,
            bytes,
        });
    }
}

/// Body of the encoder thread. Runs until the mailbox is closed and drained,
/// then closes the log.
fn encode_loop(
    shared: Arc<Shared>,
    mut writer: Box<dyn LogWriter>,
    config: RecorderConfig,
) -> Result<()> {
    if let Some(id) = config.encoder_core {
        if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
            warn!("Could not pin encoder thread to core {}", id);
        }
    }

    let mut encoder = FrameEncoder::new(config.jpeg_quality);
    let idle_wait = Duration::from_micros(config.idle_wait_us.max(1));

    loop {
        match shared.mailbox.take(idle_wait) {
            Take::Frame(frame) => {
                shared.write_frame(&mut encoder, writer.as_mut(), &frame);
                shared.mailbox.recycle(frame);
            }
            Take::Idle => continue,
            Take::Closed => break,
        }
    }

    debug!("Encoder drained, closing log");
    writer.close()
}

/// A running encoder thread. Dropping it stops the thread and closes the log.
struct RecordingSession {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl RecordingSession {
    fn spawn(
        shared: Arc<Shared>,
        writer: Box<dyn LogWriter>,
        config: RecorderConfig,
    ) -> Result<Self> {
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("kinestream-encoder".into())
            .spawn(move || encode_loop(thread_shared, writer, config))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Signal the encoder, wait for it to drain and return the log close result
    fn shutdown(&mut self) -> Result<()> {
        self.shared.recording.store(false, Ordering::Release);
        self.shared.mailbox.close();

        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::EncoderPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Recording session ended with error: {}", e);
        }
    }
}

/// Records pushed color + depth captures into a timestamped log.
///
/// Usage:
/// ```ignore
/// let mut recorder = FrameRecorder::new(&config.stream, config.recorder.clone(), clock);
/// recorder.start("session.kstm")?;
/// recorder.add_frame(&rgb, &depth)?;
/// recorder.stop()?;
/// ```
pub struct FrameRecorder {
    shared: Arc<Shared>,
    config: RecorderConfig,
    resolution: (u32, u32),
    session: Option<RecordingSession>,
}

impl FrameRecorder {
    pub fn new(stream: &StreamConfig, config: RecorderConfig, clock: Arc<dyn Clock>) -> Self {
        let (events_tx, events_rx) = flume::bounded(config.event_capacity.max(1));

        let shared = Arc::new(Shared {
            // One buffer in the slot, one with the encoder
            mailbox: FrameMailbox::new(stream.width, stream.height, 2),
            recording: AtomicBool::new(false),
            start_anchor_ns: AtomicU64::new(0),
            clock,
            stats: CachePadded::new(Stats::default()),
            events_tx,
            events_rx,
        });

        Self {
            shared,
            config,
            resolution: (stream.width, stream.height),
            session: None,
        }
    }

    /// Start recording into a new log file at `path`
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn start<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.stop_previous();
        let writer = FileLogWriter::create(path)?;
        self.start_with_writer(writer)
    }

    /// Start recording into any log collaborator
    pub fn start_with_writer<W: LogWriter + 'static>(&mut self, writer: W) -> Result<()> {
        self.stop_previous();

        let shared = &self.shared;
        shared.stats.reset();
        let anchor = shared.clock.now().as_nanos() as u64;
        shared.start_anchor_ns.store(anchor, Ordering::Release);
        shared.mailbox.open();

        match RecordingSession::spawn(shared.clone(), Box::new(writer), self.config.clone()) {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                shared.mailbox.close();
                return Err(e);
            }
        }

        shared.recording.store(true, Ordering::Release);
        info!(
            "Recording started at {}x{}",
            self.resolution.0, self.resolution.1
        );
        Ok(())
    }

    fn stop_previous(&mut self) {
        if let Err(e) = self.stop() {
            error!("Previous recording session ended with error: {}", e);
        }
    }

    /// Stop recording, drain the pending frame and close the log.
    ///
    /// Must not be called from the encoder thread. A no-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        self.shared.recording.store(false, Ordering::Release);

        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.shutdown();

        let stats = self.stats();
        info!(
            "Recording stopped: {} written, {} dropped, {} failed",
            stats.frames_written,
            stats.frames_dropped,
            stats.encode_failures + stats.write_failures
        );
        result
    }

    /// Hand a capture to the encoder. `color` is packed RGB and `depth` one
    /// sample per pixel, both at the declared resolution.
    ///
    /// Ignored when not recording. Never blocks on I/O.
    pub fn add_frame(&self, color: &[u8], depth: &[u16]) -> Result<()> {
        self.shared.add_frame(color, depth)
    }

    /// Cloneable handle for feeding frames from a capture thread
    pub fn sink(&self) -> FrameSink {
        FrameSink {
            shared: self.shared.clone(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Frames successfully appended in the current session
    pub fn frame_num(&self) -> u64 {
        self.shared.stats.frames_written.load(Ordering::Acquire)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.shared.stats.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RecorderStats {
        self.shared.stats.snapshot()
    }

    /// Diagnostic event stream. When the channel is full the oldest event is
    /// discarded.
    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.shared.events_rx.clone()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

/// Producer-side handle onto a [`FrameRecorder`]
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Same contract as [`FrameRecorder::add_frame`]
    pub fn add_frame(&self, color: &[u8], depth: &[u16]) -> Result<()> {
        self.shared.add_frame(color, depth)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{ColorImage, DepthImage};
    use crate::clock::ManualClock;
    use crate::codec::decode_payload;
    use crate::stream::{FileLogReader, LogReader, MemoryLog};
    use std::io;
    use tempfile::tempdir;

    const W: u32 = 8;
    const H: u32 = 6;
    const WAIT: Duration = Duration::from_secs(5);

    fn recorder(clock: &ManualClock) -> FrameRecorder {
        let stream = StreamConfig {
            width: W,
            height: H,
        };
        FrameRecorder::new(&stream, RecorderConfig::default(), Arc::new(clock.clone()))
    }

    /// Frame whose depth samples all equal `tag`
    fn tagged(tag: u16) -> (Vec<u8>, Vec<u16>) {
        (
            vec![(tag % 256) as u8; (W * H * 3) as usize],
            vec![tag; (W * H) as usize],
        )
    }

    fn depth_tag(payload: &[u8]) -> u16 {
        let mut color = ColorImage::new(W, H);
        let mut depth = DepthImage::new(W, H);
        decode_payload(payload, &mut color, &mut depth).unwrap();
        depth.get_pixel(0, 0).0[0]
    }

    /// Forwards to a memory log, blocking each write until released
    struct GatedWriter {
        inner: crate::stream::memory::MemoryLogWriter,
        started: Sender<()>,
        release: Receiver<()>,
    }

    impl LogWriter for GatedWriter {
        fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            self.inner.write(timestamp, payload)
        }

        fn close(&mut self) -> Result<()> {
            self.inner.close()
        }
    }

    /// Fails the first write, then forwards
    struct FlakyWriter {
        inner: crate::stream::memory::MemoryLogWriter,
        failed: bool,
    }

    impl LogWriter for FlakyWriter {
        fn write(&mut self, timestamp: f64, payload: &[u8]) -> Result<()> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full").into());
            }
            self.inner.write(timestamp, payload)
        }

        fn close(&mut self) -> Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_records_relative_capture_time() {
        let clock = ManualClock::new();
        clock.set(Duration::from_secs(10));
        let log = MemoryLog::new();

        let mut recorder = recorder(&clock);
        recorder.start_with_writer(log.writer()).unwrap();
        assert!(recorder.is_recording());

        clock.advance(Duration::from_millis(250));
        let (color, depth) = tagged(42);
        recorder.add_frame(&color, &depth).unwrap();
        recorder.stop().unwrap();

        assert!(!recorder.is_recording());
        assert_eq!(recorder.frame_num(), 1);

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert!((records[0].0 - 0.25).abs() < 1e-9);
        assert_eq!(depth_tag(&records[0].1), 42);
    }

    #[test]
    fn test_overwrite_drops_oldest_pending_frame() {
        let clock = ManualClock::new();
        let log = MemoryLog::new();
        let (started_tx, started_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded();

        let mut recorder = recorder(&clock);
        let events = recorder.events();
        recorder
            .start_with_writer(GatedWriter {
                inner: log.writer(),
                started: started_tx,
                release: release_rx,
            })
            .unwrap();

        // Encoder picks up the first frame and stalls inside the write
        let (color, depth) = tagged(1);
        recorder.add_frame(&color, &depth).unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        // Two captures with no consumption in between
        clock.advance(Duration::from_millis(100));
        let (color, depth) = tagged(2);
        recorder.add_frame(&color, &depth).unwrap();
        clock.advance(Duration::from_millis(100));
        let (color, depth) = tagged(3);
        recorder.add_frame(&color, &depth).unwrap();

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        recorder.stop().unwrap();

        let tags: Vec<u16> = log.records().iter().map(|(_, p)| depth_tag(p)).collect();
        assert_eq!(tags, vec![1, 3]);
        assert_eq!(recorder.frame_num(), 2);
        assert_eq!(recorder.dropped_frames(), 1);

        let drops: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, RecorderEvent::FrameDropped { .. }))
            .collect();
        assert_eq!(drops.len(), 1);
        match &drops[0] {
            RecorderEvent::FrameDropped { capture_time } => {
                assert!((capture_time - 0.1).abs() < 1e-9)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_add_frame_ignored_when_idle() {
        let clock = ManualClock::new();
        let recorder = recorder(&clock);
        let (color, depth) = tagged(5);

        recorder.add_frame(&color, &depth).unwrap();
        assert_eq!(recorder.frame_num(), 0);
        assert_eq!(recorder.dropped_frames(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let clock = ManualClock::new();
        let mut recorder = recorder(&clock);
        recorder.stop().unwrap();
        recorder.stop().unwrap();
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_restart_closes_previous_session() {
        let clock = ManualClock::new();
        let first = MemoryLog::new();
        let second = MemoryLog::new();

        let mut recorder = recorder(&clock);
        recorder.start_with_writer(first.writer()).unwrap();
        let (color, depth) = tagged(7);
        recorder.add_frame(&color, &depth).unwrap();

        recorder.start_with_writer(second.writer()).unwrap();
        assert!(recorder.is_recording());
        assert_eq!(recorder.frame_num(), 0);
        assert_eq!(first.len(), 1);

        recorder.stop().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_wrong_resolution_is_rejected() {
        let clock = ManualClock::new();
        let log = MemoryLog::new();
        let mut recorder = recorder(&clock);
        assert_eq!(recorder.resolution(), (W, H));
        recorder.start_with_writer(log.writer()).unwrap();

        let err = recorder
            .add_frame(&[0u8; 10], &vec![0u16; (W * H) as usize])
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionMismatch { .. }));

        recorder.stop().unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_write_failure_does_not_end_session() {
        let clock = ManualClock::new();
        let log = MemoryLog::new();
        let mut recorder = recorder(&clock);
        let events = recorder.events();
        recorder
            .start_with_writer(FlakyWriter {
                inner: log.writer(),
                failed: false,
            })
            .unwrap();

        let (color, depth) = tagged(11);
        recorder.add_frame(&color, &depth).unwrap();
        let event = events.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, RecorderEvent::WriteFailed { .. }));
        assert_eq!(recorder.frame_num(), 0);
        assert!(recorder.is_recording());

        let (color, depth) = tagged(12);
        recorder.add_frame(&color, &depth).unwrap();
        let event = events.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, RecorderEvent::FrameWritten { index: 0, .. }));

        recorder.stop().unwrap();
        let stats = recorder.stats();
        assert_eq!(stats.frames_written, 1);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(depth_tag(&log.records()[0].1), 12);
    }

    #[test]
    fn test_start_propagates_open_failure() {
        let clock = ManualClock::new();
        let dir = tempdir().unwrap();
        let mut recorder = recorder(&clock);

        let err = recorder
            .start(dir.path().join("missing").join("out.kstm"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_sink_feeds_from_capture_thread() {
        let clock = ManualClock::new();
        let dir = tempdir().unwrap();
        let path = dir.path().join("sink.kstm");

        let mut recorder = recorder(&clock);
        recorder.start(&path).unwrap();

        let sink = recorder.sink();
        let events = recorder.events();
        let capture = thread::spawn(move || {
            assert!(sink.is_recording());
            let (color, depth) = tagged(99);
            sink.add_frame(&color, &depth).unwrap();
        });
        capture.join().unwrap();

        let event = events.recv_timeout(WAIT).unwrap();
        assert!(matches!(event, RecorderEvent::FrameWritten { index: 0, .. }));
        recorder.stop().unwrap();

        let mut reader = FileLogReader::open(&path).unwrap();
        let mut payload = Vec::new();
        assert!(reader.next_frame(&mut payload).unwrap());
        assert_eq!(depth_tag(&payload), 99);
        assert!(reader.is_eof());
    }

    #[test]
    fn test_drop_closes_log() {
        let clock = ManualClock::new();
        let log = MemoryLog::new();
        {
            let mut recorder = recorder(&clock);
            recorder.start_with_writer(log.writer()).unwrap();
            let (color, depth) = tagged(3);
            recorder.add_frame(&color, &depth).unwrap();
        }
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_event_channel_keeps_latest_when_full() {
        let clock = ManualClock::new();
        let stream = StreamConfig {
            width: W,
            height: H,
        };
        let config = RecorderConfig {
            event_capacity: 2,
            ..Default::default()
        };
        let recorder = FrameRecorder::new(&stream, config, Arc::new(clock));
        for i in 0..5 {
            recorder.shared.emit(RecorderEvent::FrameDropped {
                capture_time: i as f64,
            });
        }

        let times: Vec<f64> = recorder
            .events()
            .try_iter()
            .map(|e| match e {
                RecorderEvent::FrameDropped { capture_time } => capture_time,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(times, vec![3.0, 4.0]);
    }
}
