pub mod canvas;
pub mod player;

pub use canvas::{Canvas, RasterCanvas};
pub use player::StreamPlayer;
