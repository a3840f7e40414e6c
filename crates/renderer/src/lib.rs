//! Preview rendering for index grids.
//!
//! - Multi-stop color ramps with per-index defaults
//! - RGBA rendering with transparent no-data
//! - No-data-aware preview downsampling
//! - Indexed/RGBA PNG encoding

pub mod color;
pub mod png;
pub mod preview;

pub use color::{Color, ColorRamp, ColorStop, RampName};
pub use png::encode_png;
pub use preview::{
    downsample_preview, render_preview, render_rgba, Preview, RenderConfig, ValueRange,
};
