pub mod frame;
pub mod recorder;

pub use frame::{CapturedFrame, ColorImage, DepthImage};
pub use recorder::{FrameRecorder, FrameSink, RecorderEvent};
