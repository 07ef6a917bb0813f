//! # Artifact Store
//!
//! Content-addressed persistence for downloaded artifacts. Stored bytes live
//! under `<root>/<sha1>/<file name>` with a JSON `.meta` sidecar per entry;
//! an in-memory index answers candidate lookups by identity and by source
//! location without touching the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::artifact::{ArtifactIdentity, Location};
use crate::checksum::HashValue;
use crate::store::types::{CachedArtifact, CachedArtifactCandidates, StoreConfig};

const META_EXTENSION: &str = "meta";

#[derive(Default)]
struct Index {
    by_identity: HashMap<String, Vec<CachedArtifact>>,
    by_location: HashMap<Location, CachedArtifact>,
}

/// Single-process artifact cache store.
///
/// Writers publish an entry to the index only after its bytes and sidecar
/// are durable on disk, so concurrent readers never observe a partially
/// written entry.
pub struct ArtifactStore {
    root: PathBuf,
    index: RwLock<Index>,
}

impl ArtifactStore {
    /// Open (or create) a store rooted at the configured directory and
    /// rebuild the index from metadata sidecars.
    pub async fn open(config: StoreConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.root).await?;
        let store = Self {
            root: config.root,
            index: RwLock::new(Index::default()),
        };
        store.load().await?;
        Ok(store)
    }

    /// All cached copies of the given identity, regardless of source location
    pub fn find_candidates(&self, identity: &ArtifactIdentity) -> CachedArtifactCandidates {
        let index = self.index.read();
        CachedArtifactCandidates::new(
            index
                .by_identity
                .get(&identity.key())
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// The most recent cached artifact fetched from this exact location
    pub fn find_by_location(&self, location: &Location) -> Option<CachedArtifact> {
        self.index.read().by_location.get(location).cloned()
    }

    /// Persist a staged download.
    ///
    /// The staged file is moved into the content-addressed layout, the
    /// sidecar is written atomically (temp + rename), and only then is the
    /// entry published to the index.
    pub async fn store(
        &self,
        identity: &ArtifactIdentity,
        location: &Location,
        staged: &Path,
        hash: HashValue,
        last_modified: Option<DateTime<Utc>>,
    ) -> io::Result<CachedArtifact> {
        let entry_dir = self.root.join(hash.to_hex());
        fs::create_dir_all(&entry_dir).await?;

        let file = entry_dir.join(location.file_name());
        move_into_place(staged, &file).await?;

        let artifact = CachedArtifact {
            location: location.clone(),
            identity_key: identity.key(),
            file: file.clone(),
            hash,
            last_modified,
            cached_at: Utc::now(),
        };

        let meta_path = file.with_extension(meta_extension_for(&file));
        let temp_meta = meta_path.with_extension("tmp");
        let json = serde_json::to_vec(&artifact)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&temp_meta, &json).await?;
        fs::rename(&temp_meta, &meta_path).await?;

        debug!(identity = %identity, location = %location, file = ?file, "Stored artifact");
        self.publish(artifact.clone());
        Ok(artifact)
    }

    fn publish(&self, artifact: CachedArtifact) {
        let mut index = self.index.write();
        index
            .by_identity
            .entry(artifact.identity_key.clone())
            .or_default()
            .push(artifact.clone());
        // Supersede any prior record for this location; records themselves
        // are never edited.
        match index.by_location.get(&artifact.location) {
            Some(existing) if existing.cached_at > artifact.cached_at => {}
            _ => {
                index.by_location.insert(artifact.location.clone(), artifact);
            }
        }
    }

    /// Rebuild the index from sidecars on disk. Unreadable or stale sidecars
    /// are skipped with a warning.
    async fn load(&self) -> io::Result<()> {
        let mut dirs = fs::read_dir(&self.root).await?;
        let mut loaded = 0usize;
        while let Some(dir_entry) = dirs.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(dir_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let path = file_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                    continue;
                }
                match self.load_sidecar(&path).await {
                    Some(artifact) => {
                        self.publish(artifact);
                        loaded += 1;
                    }
                    None => {
                        warn!(path = ?path, "Skipping unreadable store metadata");
                    }
                }
            }
        }
        debug!(root = ?self.root, entries = loaded, "Artifact store index loaded");
        Ok(())
    }

    async fn load_sidecar(&self, path: &Path) -> Option<CachedArtifact> {
        let bytes = fs::read(path).await.ok()?;
        let artifact: CachedArtifact = serde_json::from_slice(&bytes).ok()?;
        // The record is only valid while its content file still exists
        if fs::try_exists(&artifact.file).await.ok()? {
            Some(artifact)
        } else {
            None
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn meta_extension_for(file: &Path) -> String {
    // foo.jar -> foo.jar.meta, keeping the original extension visible
    match file.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.{META_EXTENSION}"),
        None => META_EXTENSION.to_string(),
    }
}

async fn move_into_place(staged: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(staged, dest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // Rename can fail across filesystems; fall back to copy + remove
            fs::copy(staged, dest).await?;
            fs::remove_file(staged).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn staged_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).await.unwrap();
        path
    }

    fn identity() -> ArtifactIdentity {
        ArtifactIdentity::new("org.example", "widget", "1.2.3")
    }

    #[tokio::test]
    async fn store_then_lookup_by_identity_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(StoreConfig {
            root: dir.path().join("store"),
        })
        .await
        .unwrap();

        let staged = staged_file(dir.path(), "staged.jar", b"artifact-bytes").await;
        let location = Location::new("https://repo.example.com/widget-1.2.3.jar");
        let hash = HashValue::sha1_of(b"artifact-bytes");

        let stored = store
            .store(&identity(), &location, &staged, hash.clone(), None)
            .await
            .unwrap();

        assert!(stored.file.exists());
        assert!(!staged.exists(), "staged file is consumed");

        let candidates = store.find_candidates(&identity());
        assert_eq!(candidates.len(), 1);
        assert!(candidates.find_by_hash(&hash).is_some());

        let by_location = store.find_by_location(&location).unwrap();
        assert_eq!(by_location.hash, hash);
    }

    #[tokio::test]
    async fn newer_download_supersedes_location_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(StoreConfig {
            root: dir.path().join("store"),
        })
        .await
        .unwrap();

        let location = Location::new("https://repo.example.com/widget-1.2.3.jar");

        let staged = staged_file(dir.path(), "v1.jar", b"old-bytes").await;
        store
            .store(&identity(), &location, &staged, HashValue::sha1_of(b"old-bytes"), None)
            .await
            .unwrap();

        let staged = staged_file(dir.path(), "v2.jar", b"new-bytes").await;
        let new_hash = HashValue::sha1_of(b"new-bytes");
        store
            .store(&identity(), &location, &staged, new_hash.clone(), None)
            .await
            .unwrap();

        // Most recent record wins for the location...
        assert_eq!(store.find_by_location(&location).unwrap().hash, new_hash);
        // ...but both copies remain candidates for the identity
        assert_eq!(store.find_candidates(&identity()).len(), 2);
    }

    #[tokio::test]
    async fn index_is_rebuilt_from_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let location = Location::new("https://repo.example.com/widget-1.2.3.jar");
        let hash = HashValue::sha1_of(b"persisted");

        {
            let store = ArtifactStore::open(StoreConfig { root: root.clone() })
                .await
                .unwrap();
            let staged = staged_file(dir.path(), "staged.jar", b"persisted").await;
            store
                .store(&identity(), &location, &staged, hash.clone(), None)
                .await
                .unwrap();
        }

        let reopened = ArtifactStore::open(StoreConfig { root }).await.unwrap();
        let candidates = reopened.find_candidates(&identity());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates.find_by_hash(&hash).unwrap().location, location);
        assert!(reopened.find_by_location(&location).is_some());
    }

    #[tokio::test]
    async fn missing_identity_yields_empty_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(StoreConfig {
            root: dir.path().join("store"),
        })
        .await
        .unwrap();

        let candidates = store.find_candidates(&identity());
        assert!(candidates.is_empty());
        assert!(
            store
                .find_by_location(&Location::new("https://repo.example.com/none.jar"))
                .is_none()
        );
    }
}
