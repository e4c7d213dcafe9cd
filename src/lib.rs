//! Decode ABV tile-call files and render them as PNG grids.

pub mod abv;
pub mod alphabet;
pub mod canvas;
pub mod catalog;
pub mod error;
pub mod model;
pub mod palette;
pub mod pipeline;
pub mod reverse;
pub mod stats;

pub use error::{Result, TileError};
pub use model::{Block, CoordinateRange, Individual};
pub use palette::Palette;
pub use pipeline::{PngSink, RenderConfig, RenderMode, Renderer};
