//! Index results, statistics and quality warnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::IndexKind;

/// Ecological grade of a pixel relative to the image distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Excellent,
    Good,
    Moderate,
    Poor,
    Bad,
}

impl Grade {
    pub const ALL: [Grade; 5] = [
        Grade::Excellent,
        Grade::Good,
        Grade::Moderate,
        Grade::Poor,
        Grade::Bad,
    ];

    /// Grade of `value` given the distribution's mean and standard deviation.
    ///
    /// Bounds are `mean ± 0.5σ` and `mean ± 1.5σ`; each lower bound belongs
    /// to the grade above it, so a constant grid is entirely excellent.
    pub fn classify(value: f64, mean: f64, std_dev: f64) -> Grade {
        if value >= mean + 1.5 * std_dev {
            Grade::Excellent
        } else if value >= mean + 0.5 * std_dev {
            Grade::Good
        } else if value >= mean - 0.5 * std_dev {
            Grade::Moderate
        } else if value >= mean - 1.5 * std_dev {
            Grade::Poor
        } else {
            Grade::Bad
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeClass {
    pub grade: Grade,
    pub pixel_count: u64,
    pub area_km2: f64,
    /// Share of valid pixels in this grade, 0..=1
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBreakdown {
    pub classes: Vec<GradeClass>,
    pub pixel_area_km2: f64,
}

impl GradeBreakdown {
    pub fn get(&self, grade: Grade) -> Option<&GradeClass> {
        self.classes.iter().find(|c| c.grade == grade)
    }
}

/// Summary statistics over the valid pixels of an index grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub p5: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub valid_pixels: u64,
    pub total_pixels: u64,
    pub valid_ratio: f64,
    pub grades: GradeBreakdown,
}

/// Non-fatal quality findings attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QualityWarning {
    /// PC1 explains less of the variance than the configured threshold.
    LowExplainedVariance { ratio: f64, threshold: f64 },
    /// Values outside the theoretical range were marked no-data.
    OutOfRange { count: u64 },
    /// Values outside the theoretical range were clamped to it.
    Clamped { count: u64 },
    NoValidPixels,
}

/// Provenance of a composite RSEI result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeProvenance {
    pub greenness_id: Uuid,
    pub wetness_id: Uuid,
    pub dryness_id: Uuid,
    pub heat_id: Uuid,
    /// Explained variance ratio of each principal component, descending
    pub explained_variance: Vec<f64>,
    /// Oriented PC1 loadings in greenness, wetness, dryness, heat order
    pub loadings: Vec<f64>,
}

impl CompositeProvenance {
    pub fn component_ids(&self) -> [Uuid; 4] {
        [self.greenness_id, self.wetness_id, self.dryness_id, self.heat_id]
    }
}

/// A persisted index computation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub id: Uuid,
    pub image_id: Uuid,
    pub task_id: Uuid,
    pub kind: IndexKind,
    pub width: usize,
    pub height: usize,
    /// Absent when the grid has no valid pixels
    pub statistics: Option<IndexStatistics>,
    pub warnings: Vec<QualityWarning>,
    /// Blob key of the GeoTIFF holding the grid
    pub data_key: String,
    /// Blob key of the PNG preview
    pub visualization_key: Option<String>,
    pub parameter_signature: String,
    pub composite: Option<CompositeProvenance>,
    pub created_at: DateTime<Utc>,
}

impl IndexResult {
    pub fn new(image_id: Uuid, task_id: Uuid, kind: IndexKind, shape: (usize, usize)) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_id,
            task_id,
            kind,
            width: shape.0,
            height: shape.1,
            statistics: None,
            warnings: Vec::new(),
            data_key: String::new(),
            visualization_key: None,
            parameter_signature: String::new(),
            composite: None,
            created_at: Utc::now(),
        }
    }
}
