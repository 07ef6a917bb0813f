//! # External Resources
//!
//! The outcome of asking a transport for a location: missing, satisfied from
//! the cache without a download, or a live transfer whose body must be
//! consumed (or closed) exactly once. Live resources are tracked per
//! transport so abandoned transfers can be force-closed before the next
//! request.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::artifact::Location;
use crate::error::TransportError;
use crate::store::CachedArtifact;

/// A boxed stream of body chunks from a remote transfer
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// The transferable content behind a live resource
pub(crate) enum ResourceBody {
    Remote(BodyStream),
    LocalFile(PathBuf),
}

/// Handle to a remote or cached artifact.
#[derive(Debug)]
pub enum ExternalResource {
    /// The location does not exist at the origin (a normal outcome)
    Missing { location: Location },
    /// Satisfied from the cache store without transferring the body
    Cached(CachedResource),
    /// A fresh transfer holding an open (or probe-only) connection
    Live(LiveResource),
}

impl ExternalResource {
    pub fn location(&self) -> &Location {
        match self {
            ExternalResource::Missing { location } => location,
            ExternalResource::Cached(cached) => &cached.location,
            ExternalResource::Live(live) => live.location(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, ExternalResource::Missing { .. })
    }
}

/// A resource satisfied by an existing store entry; no bytes were fetched.
#[derive(Debug, Clone)]
pub struct CachedResource {
    /// The location that was requested (may differ from where the cached
    /// copy was originally fetched)
    pub location: Location,
    /// The store record satisfying the request
    pub artifact: CachedArtifact,
}

struct LiveState {
    location: Location,
    content_length: Option<u64>,
    last_modified: Option<DateTime<Utc>>,
    local: bool,
    body: Mutex<Option<ResourceBody>>,
    tracker: Option<OpenResourceSet>,
}

/// A resource backed by an in-flight transfer.
///
/// The body can be copied out exactly once; `close` is idempotent and safe
/// from any thread. Probe (HEAD) resources carry no body at all.
#[derive(Clone)]
pub struct LiveResource {
    state: Arc<LiveState>,
}

impl std::fmt::Debug for LiveResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveResource")
            .field("location", &self.state.location)
            .field("content_length", &self.state.content_length)
            .field("last_modified", &self.state.last_modified)
            .field("local", &self.state.local)
            .field("open", &self.is_open())
            .finish()
    }
}

impl LiveResource {
    pub(crate) fn new(
        location: Location,
        content_length: Option<u64>,
        last_modified: Option<DateTime<Utc>>,
        local: bool,
        body: Option<ResourceBody>,
    ) -> Self {
        Self {
            state: Arc::new(LiveState {
                location,
                content_length,
                last_modified,
                local,
                body: Mutex::new(body),
                tracker: None,
            }),
        }
    }

    pub fn location(&self) -> &Location {
        &self.state.location
    }

    /// Content length if the origin reported one
    pub fn content_length(&self) -> Option<u64> {
        self.state.content_length
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.state.last_modified
    }

    pub fn is_local(&self) -> bool {
        self.state.local
    }

    /// Whether an unconsumed body is still attached
    pub fn is_open(&self) -> bool {
        self.state.body.lock().is_some()
    }

    /// Path of the backing file for local resources, without consuming the
    /// body
    pub fn local_path(&self) -> Option<PathBuf> {
        match &*self.state.body.lock() {
            Some(ResourceBody::LocalFile(path)) => Some(path.clone()),
            _ => None,
        }
    }

    /// Drop the body and deregister from the owning transport.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        let body = self.state.body.lock().take();
        drop(body);
        if let Some(tracker) = &self.state.tracker {
            tracker.remove(&self.state);
        }
    }

    /// Stream the body to `destination`, reporting cumulative progress.
    ///
    /// Consumes the body: a second call, or a call on a probe-only resource,
    /// is a caller-contract violation.
    pub async fn copy_to(
        &self,
        destination: &Path,
        mut on_progress: impl FnMut(u64),
    ) -> Result<u64, TransportError> {
        let body = self.state.body.lock().take().ok_or_else(|| {
            TransportError::Configuration(format!(
                "Resource '{}' has no transferable content (probe-only or already consumed)",
                self.state.location
            ))
        })?;

        let result = self.write_body(body, destination, &mut on_progress).await;
        self.close();
        result
    }

    async fn write_body(
        &self,
        body: ResourceBody,
        destination: &Path,
        on_progress: &mut impl FnMut(u64),
    ) -> Result<u64, TransportError> {
        match body {
            ResourceBody::Remote(mut stream) => {
                let mut file = tokio::fs::File::create(destination).await?;
                let mut transferred = 0u64;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk).await?;
                    transferred += chunk.len() as u64;
                    on_progress(transferred);
                }
                file.flush().await?;
                Ok(transferred)
            }
            ResourceBody::LocalFile(source) => {
                let transferred = tokio::fs::copy(&source, destination).await?;
                on_progress(transferred);
                Ok(transferred)
            }
        }
    }

    fn tracked_by(self, tracker: OpenResourceSet) -> Self {
        // Rebuild with the tracker wired in; only the constructing transport
        // ever does this, before the resource is shared.
        let state = Arc::try_unwrap(self.state).unwrap_or_else(|state| LiveState {
            location: state.location.clone(),
            content_length: state.content_length,
            last_modified: state.last_modified,
            local: state.local,
            body: Mutex::new(state.body.lock().take()),
            tracker: None,
        });
        Self {
            state: Arc::new(LiveState {
                tracker: Some(tracker),
                ..state
            }),
        }
    }
}

/// Live resources with an unclosed connection, scoped to one transport.
#[derive(Clone, Default)]
pub struct OpenResourceSet {
    inner: Arc<Mutex<Vec<Arc<LiveState>>>>,
}

impl OpenResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live resource and hand back a handle that deregisters
    /// itself on close.
    pub(crate) fn track(&self, resource: LiveResource) -> LiveResource {
        let resource = resource.tracked_by(self.clone());
        self.inner.lock().push(resource.state.clone());
        resource
    }

    fn remove(&self, state: &Arc<LiveState>) {
        self.inner
            .lock()
            .retain(|entry| !Arc::ptr_eq(entry, state));
    }

    /// Force-close every resource a prior caller left open.
    ///
    /// Abandoned resources are a warning, never an error.
    pub fn abort_open_resources(&self) {
        let abandoned: Vec<Arc<LiveState>> = self.inner.lock().drain(..).collect();
        for state in abandoned {
            warn!(location = %state.location, "Forcing close on abandoned resource");
            drop(state.body.lock().take());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
