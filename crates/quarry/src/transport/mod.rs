//! # Repository Transports
//!
//! Transports turn locations into resources. The HTTP transport applies
//! conditional-request and checksum-short-circuit logic; the file transport
//! is a local pass-through. Every transport built by the factory is wrapped
//! in a listener-attaching decorator so progress reporting is uniform
//! across backends.

mod file;
mod http;

pub use file::FileTransport;
pub use http::HttpTransport;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::{ArtifactIdentity, Location};
use crate::error::TransportError;
use crate::events::{ListenerSet, RequestType, TransferDescription, TransferListener};
use crate::resource::{ExternalResource, LiveResource};

/// Access to one repository backend.
///
/// `fetch` with `for_download = false` issues a metadata-only probe; with
/// `for_download = true` it may satisfy the request from the cache store
/// without transferring the body. Passing no identity disables
/// checksum-cache matching (used for changing artifacts and metadata).
#[async_trait]
pub trait RepositoryTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        location: &Location,
        identity: Option<&ArtifactIdentity>,
        for_download: bool,
    ) -> Result<ExternalResource, TransportError>;

    /// Upload a local file to the destination location
    async fn put(&self, source: &Path, destination: &Location) -> Result<(), TransportError>;

    /// Children of a directory-like location; `None` when the backend does
    /// not support listing
    async fn list(&self, parent: &Location) -> Result<Option<Vec<Location>>, TransportError>;

    /// The transfer listeners attached to this transport
    fn listeners(&self) -> &ListenerSet;

    fn add_transfer_listener(&self, listener: Arc<dyn TransferListener>) {
        self.listeners().add(listener);
    }

    fn has_transfer_listener(&self, listener: &Arc<dyn TransferListener>) -> bool {
        self.listeners().contains(listener)
    }

    /// Stream a live resource to a file, emitting transfer events around the
    /// copy. Local resources transfer silently.
    async fn download(
        &self,
        resource: &LiveResource,
        destination: &Path,
    ) -> Result<u64, TransportError> {
        if resource.is_local() {
            return resource.copy_to(destination, |_| {}).await;
        }

        let listeners = self.listeners();
        let total = resource.content_length();
        listeners.notify_started(&TransferDescription {
            name: resource.location().file_name().to_string(),
            request_type: RequestType::Download,
            total,
            local: false,
        });

        match resource
            .copy_to(destination, |so_far| listeners.notify_progress(so_far, total))
            .await
        {
            Ok(transferred) => {
                listeners.notify_completed();
                Ok(transferred)
            }
            Err(error) => {
                listeners.notify_failed(&error);
                Err(error)
            }
        }
    }
}

/// Decorator that guarantees the shared transfer listener is attached to the
/// underlying transport before any access goes through.
pub struct ListeningTransport {
    delegate: Arc<dyn RepositoryTransport>,
    listener: Arc<dyn TransferListener>,
}

impl ListeningTransport {
    pub fn new(delegate: Arc<dyn RepositoryTransport>, listener: Arc<dyn TransferListener>) -> Self {
        Self { delegate, listener }
    }

    fn ensure_listener(&self) {
        if !self.delegate.has_transfer_listener(&self.listener) {
            self.delegate.add_transfer_listener(self.listener.clone());
        }
    }
}

#[async_trait]
impl RepositoryTransport for ListeningTransport {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    async fn fetch(
        &self,
        location: &Location,
        identity: Option<&ArtifactIdentity>,
        for_download: bool,
    ) -> Result<ExternalResource, TransportError> {
        self.ensure_listener();
        self.delegate.fetch(location, identity, for_download).await
    }

    async fn put(&self, source: &Path, destination: &Location) -> Result<(), TransportError> {
        self.ensure_listener();
        self.delegate.put(source, destination).await
    }

    async fn list(&self, parent: &Location) -> Result<Option<Vec<Location>>, TransportError> {
        self.delegate.list(parent).await
    }

    fn listeners(&self) -> &ListenerSet {
        self.delegate.listeners()
    }

    async fn download(
        &self,
        resource: &LiveResource,
        destination: &Path,
    ) -> Result<u64, TransportError> {
        self.ensure_listener();
        self.delegate.download(resource, destination).await
    }
}
