//! Blob key layout for persisted results.

use eco_common::IndexKind;
use uuid::Uuid;

/// Path builder for consistent storage layout.
pub struct ResultPaths;

impl ResultPaths {
    /// Directory of one result.
    /// Format: indices/{image_id}/{result_id}
    pub fn result_prefix(image_id: Uuid, result_id: Uuid) -> String {
        format!("indices/{}/{}", image_id, result_id)
    }

    /// GeoTIFF holding the index grid.
    /// Format: indices/{image_id}/{result_id}/{kind}.tif
    pub fn grid(image_id: Uuid, result_id: Uuid, kind: IndexKind) -> String {
        format!("{}/{}.tif", Self::result_prefix(image_id, result_id), kind)
    }

    /// PNG preview.
    /// Format: indices/{image_id}/{result_id}/{kind}.png
    pub fn preview(image_id: Uuid, result_id: Uuid, kind: IndexKind) -> String {
        format!("{}/{}.png", Self::result_prefix(image_id, result_id), kind)
    }
}
