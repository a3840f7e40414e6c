//! Common types shared across the ecological index engine.

pub mod band;
pub mod error;
pub mod grid;
pub mod image;
pub mod index;
pub mod result;
pub mod task;

pub use band::{BandData, BandInfo, BandRole};
pub use error::{EcoError, EcoResult, ErrorKind};
pub use grid::{GeoTransform, IndexGrid, RasterWindow, NODATA};
pub use image::{GeoPoint, RasterImage, Sensor};
pub use index::{IndexKind, IndexRequest};
pub use result::{
    CompositeProvenance, Grade, GradeBreakdown, GradeClass, IndexResult, IndexStatistics,
    QualityWarning,
};
pub use task::{ProcessingTask, TaskStatus, TaskStep};
