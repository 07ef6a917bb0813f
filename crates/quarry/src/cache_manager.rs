//! # Cache Managers
//!
//! The persistence strategy a resolver applies to fetched resources. A
//! downloading manager streams live resources into the shared artifact
//! store; a local manager hands back the backing file untouched; a no-op
//! manager exists for resolvers that never persist anything themselves.
//!
//! Manager equality is instance identity: two resolvers share a cache only
//! when they hold the same `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::artifact::{ArtifactIdentity, Location};
use crate::checksum::HashValue;
use crate::error::TransportError;
use crate::resource::ExternalResource;
use crate::store::ArtifactStore;
use crate::transport::RepositoryTransport;

/// The outcome of persisting a fetched resource: a usable local file plus
/// the provenance the resolver reports.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub identity: ArtifactIdentity,
    pub location: Location,
    pub file: PathBuf,
    pub hash: HashValue,
    pub last_modified: Option<DateTime<Utc>>,
}

enum Strategy {
    Downloading { store: Arc<ArtifactStore> },
    LocalFile,
    NoOp,
}

/// Persistence strategy applied to fetched resources.
pub struct CacheManager {
    name: String,
    strategy: Strategy,
}

impl CacheManager {
    /// Manager that downloads live resources into the shared store
    pub fn downloading(name: impl Into<String>, store: Arc<ArtifactStore>) -> Self {
        Self {
            name: name.into(),
            strategy: Strategy::Downloading { store },
        }
    }

    /// Manager for local repositories; files are used in place
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: Strategy::LocalFile,
        }
    }

    /// Manager for resolvers that never persist anything
    pub fn noop(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: Strategy::NoOp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this manager is exempt from cache sharing (local and no-op
    /// managers are never replaced by the shared downloading manager)
    pub fn is_trivial(&self) -> bool {
        matches!(self.strategy, Strategy::LocalFile | Strategy::NoOp)
    }

    /// Turn a fetched resource into a resolved local file.
    ///
    /// Cached resources are returned as-is without writing to the store
    /// again; live resources are handled per strategy.
    pub async fn persist(
        &self,
        transport: &dyn RepositoryTransport,
        identity: &ArtifactIdentity,
        resource: ExternalResource,
    ) -> Result<ResolvedArtifact, TransportError> {
        match resource {
            ExternalResource::Missing { location } => Err(TransportError::Configuration(format!(
                "Cannot persist missing resource '{location}'"
            ))),
            ExternalResource::Cached(cached) => {
                debug!(location = %cached.location, "Reusing cached copy");
                Ok(ResolvedArtifact {
                    identity: identity.clone(),
                    location: cached.location,
                    file: cached.artifact.file,
                    hash: cached.artifact.hash,
                    last_modified: cached.artifact.last_modified,
                })
            }
            ExternalResource::Live(live) => match &self.strategy {
                Strategy::Downloading { store } => {
                    let location = live.location().clone();
                    let last_modified = live.last_modified();

                    let staged = staging_path(store, &location);
                    if let Some(parent) = staged.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    transport.download(&live, &staged).await?;

                    let hash = HashValue::sha1_of_file(&staged).await?;
                    let artifact = store
                        .store(identity, &location, &staged, hash, last_modified)
                        .await?;
                    Ok(ResolvedArtifact {
                        identity: identity.clone(),
                        location,
                        file: artifact.file,
                        hash: artifact.hash,
                        last_modified: artifact.last_modified,
                    })
                }
                Strategy::LocalFile => {
                    let location = live.location().clone();
                    let last_modified = live.last_modified();
                    let file = live.local_path().ok_or_else(|| {
                        TransportError::Configuration(format!(
                            "Local cache manager '{}' received a non-local resource '{location}'",
                            self.name
                        ))
                    })?;
                    live.close();

                    let hash = HashValue::sha1_of_file(&file).await?;
                    Ok(ResolvedArtifact {
                        identity: identity.clone(),
                        location,
                        file,
                        hash,
                        last_modified,
                    })
                }
                Strategy::NoOp => {
                    let location = live.location().clone();
                    live.close();
                    Err(TransportError::Configuration(format!(
                        "Cache manager '{}' cannot persist live resource '{location}'",
                        self.name
                    )))
                }
            },
        }
    }
}

fn staging_path(store: &ArtifactStore, location: &Location) -> PathBuf {
    // Unique per call; the file is consumed by store() on success
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    store
        .root()
        .join(".staging")
        .join(format!("{nanos}-{}", location.file_name()))
}
