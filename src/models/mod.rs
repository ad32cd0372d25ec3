//! Artifact management module
//!
//! Provides functionality for:
//! - Listing and downloading artifacts from HuggingFace Hub
//! - Deterministic quantization-variant selection
//! - Tracking artifact records and their derived on-disk status
//! - Durable registry persistence across restarts

pub mod download;
pub mod registry;
pub mod store;

pub use download::{ARTIFACT_EXTENSION, HfHub, ModelHub, VARIANT_PRIORITY, select_artifact};
pub use registry::{
    ArtifactKind, ArtifactRecord, ArtifactRegistry, ArtifactStatus, MIN_ARTIFACT_BYTES,
};
pub use store::{FileSystemStorage, RegistryStore, StorageBackend};
