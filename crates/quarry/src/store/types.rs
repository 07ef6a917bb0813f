//! # Store Types
//!
//! This module defines common types used across the artifact cache store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Location;
use crate::checksum::HashValue;

/// A previously downloaded artifact, as recorded by the store.
///
/// Immutable once written; a newer download of the same location supersedes
/// the record instead of editing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedArtifact {
    /// Where the artifact was originally fetched from
    pub location: Location,
    /// Key of the identity the artifact was resolved for
    pub identity_key: String,
    /// Path of the stored content on disk
    pub file: PathBuf,
    /// SHA-1 of the stored content
    pub hash: HashValue,
    /// Last-Modified reported by the origin, if any
    pub last_modified: Option<DateTime<Utc>>,
    /// When this record was written
    pub cached_at: DateTime<Utc>,
}

/// Every cached artifact matching one identity, regardless of the location
/// each copy was fetched from.
#[derive(Debug, Clone, Default)]
pub struct CachedArtifactCandidates {
    entries: Vec<CachedArtifact>,
}

impl CachedArtifactCandidates {
    pub fn new(entries: Vec<CachedArtifact>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find a candidate whose content hash matches.
    ///
    /// Multiple candidates may carry the same hash; any one of them is
    /// content-equivalent, so the first match is returned.
    pub fn find_by_hash(&self, hash: &HashValue) -> Option<&CachedArtifact> {
        self.entries.iter().find(|candidate| &candidate.hash == hash)
    }
}

/// Configuration for the artifact store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for stored artifacts and their metadata sidecars
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("quarry-store"),
        }
    }
}
