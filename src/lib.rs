pub mod capture;
pub mod clock;
pub mod codec;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod stream;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{FrameRecorder, FrameSink, RecorderEvent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use playback::{Canvas, StreamPlayer};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub recorder: RecorderConfig,
    pub player: PlayerConfig,
}

/// Fixed raster resolution shared by recording and playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub jpeg_quality: u8,
    /// Upper bound on one encoder wait before re-checking for shutdown
    pub idle_wait_us: u64,
    /// Capacity of the diagnostic event channel
    pub event_capacity: usize,
    /// Pin the encoder thread to this core
    pub encoder_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub looping: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            idle_wait_us: 500,
            event_capacity: 64,
            encoder_core: None,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { looping: false }
    }
}

impl Config {
    /// Layer an optional TOML file and `KINESTREAM_*` environment variables
    /// (e.g. `KINESTREAM_RECORDER__JPEG_QUALITY=75`) over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("KINESTREAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Counters reported by a recording session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStats {
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub encode_failures: u64,
    pub write_failures: u64,
}
