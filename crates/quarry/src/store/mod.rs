//! # Artifact Cache Store
//!
//! Persistence for downloaded artifact bytes, indexed by artifact identity
//! and by source location, supporting checksum-candidate lookups without
//! any network traffic.

mod file;
mod types;

pub use file::ArtifactStore;
pub use types::{CachedArtifact, CachedArtifactCandidates, StoreConfig};
