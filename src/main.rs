//! Kinestream demo: record a synthetic color + depth source, then play it back

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{error, info, warn};

use kinestream::capture::FrameSink;
use kinestream::playback::RasterCanvas;
use kinestream::{Config, FrameRecorder, StreamPlayer, SystemClock};

const LOG_PATH: &str = "kinestream-demo.kstm";
const SNAPSHOT_PATH: &str = "kinestream-demo.png";
const CAPTURE_FPS: u64 = 30;
const CAPTURE_SECONDS: u64 = 2;
const PLAYBACK_TICK: Duration = Duration::from_millis(16);

/// Moving gradient standing in for a camera
struct SyntheticSource {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<u16>,
    frame: u32,
}

impl SyntheticSource {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            color: vec![0; (width * height * 3) as usize],
            depth: vec![0; (width * height) as usize],
            frame: 0,
        }
    }

    fn next(&mut self) -> (&[u8], &[u16]) {
        let shift = self.frame * 4;
        for y in 0..self.height {
            for x in 0..self.width {
                let i = (y * self.width + x) as usize;
                self.color[i * 3] = ((x + shift) % 256) as u8;
                self.color[i * 3 + 1] = (y % 256) as u8;
                self.color[i * 3 + 2] = (self.frame % 256) as u8;
                self.depth[i] = ((x + y + shift) * 64 % 65536) as u16;
            }
        }
        self.frame += 1;
        (&self.color, &self.depth)
    }
}

async fn capture(sink: FrameSink, mut source: SyntheticSource) {
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / CAPTURE_FPS));
    for _ in 0..CAPTURE_FPS * CAPTURE_SECONDS {
        interval.tick().await;
        let (color, depth) = source.next();
        if let Err(e) = sink.add_frame(color, depth) {
            error!("Capture rejected: {}", e);
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinestream=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Kinestream demo launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    kinestream::CONFIG.store(Arc::new(config.clone()));

    let clock = Arc::new(SystemClock::new());

    // Record
    let mut recorder = FrameRecorder::new(&config.stream, config.recorder.clone(), clock.clone());
    recorder.start(LOG_PATH)?;

    let (width, height) = recorder.resolution();
    let source = SyntheticSource::new(width, height);
    let capture_task = tokio::spawn(capture(recorder.sink(), source));
    tokio::select! {
        result = capture_task => {
            if let Err(e) = result {
                error!("Capture task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping recording");
        }
    }
    recorder.stop()?;

    let stats = recorder.stats();
    info!(
        "Recorded {} frames to {} ({} dropped, {} failed)",
        stats.frames_written,
        LOG_PATH,
        stats.frames_dropped,
        stats.encode_failures + stats.write_failures
    );

    // Play back
    let mut player = StreamPlayer::new(&config.stream, config.player.clone(), clock);
    player.open(LOG_PATH)?;
    player.play();

    let mut decoded = 0u64;
    let mut interval = tokio::time::interval(PLAYBACK_TICK);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    while player.is_playing() {
        tokio::select! {
            _ = interval.tick() => {
                player.tick()?;
                if player.is_frame_new() {
                    decoded += 1;
                }
            }
            _ = &mut interrupted => {
                warn!("Interrupted, stopping playback");
                player.stop();
            }
        }
    }
    info!(
        "Playback finished: {} records read, {} frames decoded",
        player.frame_num(),
        decoded
    );

    // Snapshot of the last frame, color and depth side by side
    let mut canvas = RasterCanvas::new(width * 2, height);
    player.draw(&mut canvas, 0, 0);
    player.draw_depth(&mut canvas, width as i32, 0);
    canvas.image().save(SNAPSHOT_PATH)?;
    info!("Saved last frame to {}", SNAPSHOT_PATH);

    Ok(())
}
