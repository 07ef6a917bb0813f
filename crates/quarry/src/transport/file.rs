//! # File Transport
//!
//! Local filesystem repositories. Resources are served as local pass-through
//! handles, never copied into the cache store, and directory listings are
//! supported.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::artifact::{ArtifactIdentity, Location};
use crate::error::TransportError;
use crate::events::ListenerSet;
use crate::resource::{ExternalResource, LiveResource, ResourceBody};

/// Repository transport over the local filesystem.
pub struct FileTransport {
    name: String,
    listeners: ListenerSet,
}

impl FileTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: ListenerSet::new(),
        }
    }
}

#[async_trait]
impl super::RepositoryTransport for FileTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        location: &Location,
        _identity: Option<&ArtifactIdentity>,
        _for_download: bool,
    ) -> Result<ExternalResource, TransportError> {
        let path = location.as_path();
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(location = %location, "Local resource missing");
                return Ok(ExternalResource::Missing {
                    location: location.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        if !metadata.is_file() {
            return Ok(ExternalResource::Missing {
                location: location.clone(),
            });
        }

        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(ExternalResource::Live(LiveResource::new(
            location.clone(),
            Some(metadata.len()),
            last_modified,
            true,
            Some(ResourceBody::LocalFile(path)),
        )))
    }

    async fn put(&self, source: &Path, destination: &Location) -> Result<(), TransportError> {
        let dest = destination.as_path();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(source, &dest).await?;
        debug!(destination = %destination, "Published local file");
        Ok(())
    }

    async fn list(&self, parent: &Location) -> Result<Option<Vec<Location>>, TransportError> {
        let dir = parent.as_path();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Some(Vec::new()));
            }
            Err(error) => return Err(error.into()),
        };

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(Location::from(entry.path().as_path()));
        }
        children.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(Some(children))
    }

    fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RepositoryTransport;

    #[tokio::test]
    async fn fetch_serves_existing_files_as_local_resources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("widget-1.2.3.jar");
        tokio::fs::write(&file, b"bytes").await.unwrap();

        let transport = FileTransport::new("local");
        let resource = transport
            .fetch(&Location::from(file.as_path()), None, true)
            .await
            .unwrap();

        match resource {
            ExternalResource::Live(live) => {
                assert!(live.is_local());
                assert_eq!(live.content_length(), Some(5));

                let dest = dir.path().join("copy.jar");
                let copied = live.copy_to(&dest, |_| {}).await.unwrap();
                assert_eq!(copied, 5);
                assert_eq!(std::fs::read(&dest).unwrap(), b"bytes");
            }
            other => panic!("expected live resource, got {:?}", other.location()),
        }
    }

    #[tokio::test]
    async fn fetch_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new("local");
        let resource = transport
            .fetch(
                &Location::from(dir.path().join("absent.jar").as_path()),
                None,
                true,
            )
            .await
            .unwrap();
        assert!(resource.is_missing());
    }

    #[tokio::test]
    async fn put_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.jar");
        tokio::fs::write(&source, b"published").await.unwrap();

        let transport = FileTransport::new("local");
        let dest = dir.path().join("repo/org/widget/widget.jar");
        transport
            .put(&source, &Location::from(dest.as_path()))
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"published");
    }

    #[tokio::test]
    async fn list_returns_sorted_children() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.jar"), b"b").await.unwrap();
        tokio::fs::write(dir.path().join("a.jar"), b"a").await.unwrap();

        let transport = FileTransport::new("local");
        let children = transport
            .list(&Location::from(dir.path()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[0].as_str().ends_with("a.jar"));
        assert!(children[1].as_str().ends_with("b.jar"));
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new("local");
        let children = transport
            .list(&Location::from(dir.path().join("absent").as_path()))
            .await
            .unwrap()
            .unwrap();
        assert!(children.is_empty());
    }
}
