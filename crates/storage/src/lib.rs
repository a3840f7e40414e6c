//! Result persistence for the ecological index engine.
//!
//! Provides:
//! - The [`ResultStore`] port for task snapshots and index result records
//! - PostgreSQL ([`Catalog`]) and in-memory ([`MemoryResultStore`]) backends
//! - Blob storage (S3/MinIO, local filesystem, memory) for GeoTIFF grids and
//!   PNG previews

pub mod blob;
pub mod catalog;
pub mod memory;
pub mod paths;
pub mod store;

pub use blob::{BlobStore, ObjectStorage, S3Config, StorageBackend};
pub use catalog::Catalog;
pub use memory::MemoryResultStore;
pub use paths::ResultPaths;
pub use store::ResultStore;
