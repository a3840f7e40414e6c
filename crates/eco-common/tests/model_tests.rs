//! Serialization and invariant tests for the shared data model.

use eco_common::{
    BandRole, EcoError, IndexKind, IndexRequest, ProcessingTask, RasterImage, Sensor, TaskStatus,
    TaskStep,
};
use uuid::Uuid;

// ============================================================================
// Task snapshots
// ============================================================================

#[test]
fn test_task_snapshot_json_shape() {
    let mut task = ProcessingTask::new(Uuid::new_v4(), vec![IndexKind::Ndvi], "abc");
    task.start().unwrap();
    task.advance(12, TaskStep::Computing(IndexKind::Ndvi)).unwrap();

    let json: serde_json::Value = serde_json::to_value(&task).unwrap();
    assert_eq!(json["status"], "running");
    assert_eq!(json["progress"], 12);
    assert_eq!(json["current_step"], "computing ndvi");
    assert!(json["error_message"].is_null());
    assert_eq!(json["kinds"][0], "ndvi");
}

#[test]
fn test_task_roundtrip_preserves_failure() {
    let mut task = ProcessingTask::new(Uuid::new_v4(), vec![IndexKind::Rsei], "abc");
    task.start().unwrap();
    task.fail(&EcoError::Timeout("task exceeded 5s".into())).unwrap();

    let json = serde_json::to_string(&task).unwrap();
    let back: ProcessingTask = serde_json::from_str(&json).unwrap();
    assert_eq!(back.status, TaskStatus::Failed);
    assert_eq!(back.error_message.as_deref(), Some("Deadline exceeded: task exceeded 5s"));
    assert_eq!(back, task);
}

// ============================================================================
// Requests against images
// ============================================================================

#[test]
fn test_sentinel2_cannot_serve_heat() {
    let image = RasterImage::new("s2.tif", 8, 8, Sensor::Sentinel2.default_bands());
    image.validate_roles().unwrap();
    assert!(image.require_roles(&[BandRole::Red, BandRole::Nir]).is_ok());
    assert!(matches!(
        image.require_roles(&[BandRole::Thermal]),
        Err(EcoError::MissingBand(_))
    ));
}

#[test]
fn test_image_json_defaults() {
    let json = r#"{
        "id": "6f0c6a3e-2f7a-4f0e-9d55-4b1f1d7d2a10",
        "name": "scene",
        "path": "/data/scene.tif",
        "bands": [{"role": "red", "index": 1}, {"role": "nir", "index": 2, "no_data": 0.0}],
        "width": 100,
        "height": 50
    }"#;
    let image: RasterImage = serde_json::from_str(json).unwrap();
    assert_eq!(image.sensor, Sensor::Landsat8);
    assert_eq!(image.band(BandRole::Nir).unwrap().no_data, Some(0.0));
    assert!(image.geo_transform.is_none());
}

#[test]
fn test_rsei_request_needs_components() {
    let req = IndexRequest::parse(&["rsei"]).unwrap();
    let expanded = req.expanded();
    for kind in IndexKind::RSEI_COMPONENTS {
        assert!(expanded.contains(&kind));
    }
    assert_eq!(expanded.last(), Some(&IndexKind::Rsei));
}
