//! Real-time playback of a recorded stream log

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::canvas::Canvas;
use crate::capture::frame::{ColorImage, DepthImage};
use crate::clock::Clock;
use crate::codec::decode_payload;
use crate::error::Result;
use crate::stream::{FileLogReader, LogReader};
use crate::{PlayerConfig, StreamConfig};

/// Plays a stream log back against a wall-clock play head.
///
/// Each `update` advances the play head and skips through every record whose
/// timestamp it has passed, decoding only the last one. A slow caller sees
/// frames dropped, never queued.
///
/// Usage:
/// ```ignore
/// let mut player = StreamPlayer::new(&config.stream, config.player.clone(), clock);
/// player.open("session.kstm")?;
/// player.play();
/// loop {
///     player.tick()?;
///     if player.is_frame_new() {
///         player.draw(&mut canvas, 0, 0);
///     }
/// }
/// ```
pub struct StreamPlayer {
    reader: Option<Box<dyn LogReader>>,
    clock: Arc<dyn Clock>,
    resolution: (u32, u32),

    color: ColorImage,
    depth: DepthImage,
    /// Decode targets, swapped in only once both blocks decode
    scratch_color: ColorImage,
    scratch_depth: DepthImage,
    /// Most recently read payload, reused across reads
    payload: Vec<u8>,

    playing: bool,
    frame_new: bool,
    looping: bool,

    /// Seconds of playback since `play`/`rewind`
    play_head: f64,
    /// Clock reading at the previous `tick`
    last_tick: Duration,
    frame_num: u64,
}

impl StreamPlayer {
    pub fn new(stream: &StreamConfig, config: PlayerConfig, clock: Arc<dyn Clock>) -> Self {
        let last_tick = clock.now();
        Self {
            reader: None,
            clock,
            resolution: (stream.width, stream.height),
            color: ColorImage::new(0, 0),
            depth: DepthImage::new(0, 0),
            scratch_color: ColorImage::new(0, 0),
            scratch_depth: DepthImage::new(0, 0),
            payload: Vec::new(),
            playing: false,
            frame_new: false,
            looping: config.looping,
            play_head: 0.0,
            last_tick,
            frame_num: 0,
        }
    }

    /// Open a log file for playback. Playback state is rewound even when
    /// opening fails.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        match FileLogReader::open(path) {
            Ok(reader) => self.open_reader(reader),
            Err(e) => {
                self.reader = None;
                self.rewind()?;
                Err(e)
            }
        }
    }

    /// Play back from any log collaborator
    pub fn open_reader<R: LogReader + 'static>(&mut self, reader: R) -> Result<()> {
        let (width, height) = self.resolution;
        self.color = ColorImage::new(width, height);
        self.depth = DepthImage::new(width, height);
        self.scratch_color = ColorImage::new(width, height);
        self.scratch_depth = DepthImage::new(width, height);
        self.reader = Some(Box::new(reader));

        info!("Opened stream for playback at {}x{}", width, height);
        self.rewind()
    }

    pub fn close(&mut self) {
        self.reader = None;
        self.playing = false;
        self.frame_new = false;
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Resume advancing the play head. The read position is unchanged.
    pub fn play(&mut self) {
        self.playing = true;
        self.last_tick = self.clock.now();
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Return to the first record and reset the play head and frame counter
    pub fn rewind(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.rewind()?;
        }

        self.last_tick = self.clock.now();
        self.play_head = 0.0;
        self.frame_num = 0;
        Ok(())
    }

    /// Advance by the time elapsed on the player's clock since the last tick
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();
        let delta = now.saturating_sub(self.last_tick);
        self.last_tick = now;
        self.update(delta)
    }

    /// Advance the play head by `delta` and catch up with it.
    ///
    /// Corrupt payloads are logged and leave the previous frame in place.
    /// A decoded frame of the wrong resolution is returned as an error.
    pub fn update(&mut self, delta: Duration) -> Result<()> {
        self.frame_new = false;

        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        if !self.playing {
            return Ok(());
        }

        self.play_head += delta.as_secs_f64();

        let mut consumed = 0u64;
        while !reader.is_eof() && reader.current_timestamp() < self.play_head {
            if !reader.next_frame(&mut self.payload)? {
                break;
            }
            consumed += 1;
        }
        self.frame_num += consumed;

        if consumed > 1 {
            metrics::counter!("player_frames_skipped").increment(consumed - 1);
        }

        if reader.is_eof() {
            if self.looping {
                debug!("End of stream, looping");
                self.rewind()?;
            } else {
                debug!("End of stream");
                self.playing = false;
            }
        }

        if consumed > 0 {
            self.decode_latest()?;
        }
        Ok(())
    }

    fn decode_latest(&mut self) -> Result<()> {
        let decode_start = Instant::now();

        let decoded = decode_payload(
            &self.payload,
            &mut self.scratch_color,
            &mut self.scratch_depth,
        );
        match decoded {
            Ok(()) => {
                std::mem::swap(&mut self.color, &mut self.scratch_color);
                std::mem::swap(&mut self.depth, &mut self.scratch_depth);
                self.frame_new = true;
                metrics::histogram!("player_decode_time_us")
                    .record(decode_start.elapsed().as_micros() as f64);
                Ok(())
            }
            Err(e) if e.is_frame_local() => {
                warn!("Skipping undecodable frame {}: {}", self.frame_num, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn draw<C: Canvas + ?Sized>(&self, canvas: &mut C, x: i32, y: i32) {
        canvas.draw_color(&self.color, x, y);
    }

    pub fn draw_depth<C: Canvas + ?Sized>(&self, canvas: &mut C, x: i32, y: i32) {
        canvas.draw_depth(&self.depth, x, y);
    }

    pub fn color_image(&self) -> &ColorImage {
        &self.color
    }

    pub fn depth_image(&self) -> &DepthImage {
        &self.depth
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the last `update` decoded a new frame
    pub fn is_frame_new(&self) -> bool {
        self.frame_new
    }

    /// Records consumed since the last rewind
    pub fn frame_num(&self) -> u64 {
        self.frame_num
    }

    pub fn play_head(&self) -> f64 {
        self.play_head
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_loop(&self) -> bool {
        self.looping
    }
}
