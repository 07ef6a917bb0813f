//! # Transport Factory
//!
//! Builds repository transports wired to the shared artifact store and the
//! shared transfer listener. Every transport leaves the factory wrapped in a
//! [`ListeningTransport`] so progress reporting is attached before first use.

use std::sync::Arc;

use crate::cache_manager::CacheManager;
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::TransferListener;
use crate::store::ArtifactStore;
use crate::transport::{FileTransport, HttpTransport, ListeningTransport, RepositoryTransport};

pub struct TransportFactory {
    store: Arc<ArtifactStore>,
    listener: Arc<dyn TransferListener>,
    downloading_manager: Arc<CacheManager>,
    local_manager: Arc<CacheManager>,
}

impl TransportFactory {
    pub fn new(store: Arc<ArtifactStore>, listener: Arc<dyn TransferListener>) -> Self {
        let downloading_manager = Arc::new(CacheManager::downloading("downloading", store.clone()));
        let local_manager = Arc::new(CacheManager::local("local"));
        Self {
            store,
            listener,
            downloading_manager,
            local_manager,
        }
    }

    pub fn create_http_transport(
        &self,
        name: impl Into<String>,
        config: TransportConfig,
    ) -> Result<Arc<dyn RepositoryTransport>, TransportError> {
        let transport = HttpTransport::new(name, config, self.store.clone())?;
        Ok(self.decorate(Arc::new(transport)))
    }

    pub fn create_file_transport(&self, name: impl Into<String>) -> Arc<dyn RepositoryTransport> {
        self.decorate(Arc::new(FileTransport::new(name)))
    }

    fn decorate(&self, transport: Arc<dyn RepositoryTransport>) -> Arc<dyn RepositoryTransport> {
        Arc::new(ListeningTransport::new(transport, self.listener.clone()))
    }

    /// Attach the shared listener to an externally built transport. Identity
    /// checked, so repeated initialization passes never double-attach.
    pub fn attach_listener(&self, transport: &Arc<dyn RepositoryTransport>) {
        if !transport.has_transfer_listener(&self.listener) {
            transport.add_transfer_listener(self.listener.clone());
        }
    }

    /// The downloading cache manager shared across user resolvers
    pub fn downloading_cache_manager(&self) -> &Arc<CacheManager> {
        &self.downloading_manager
    }

    /// The pass-through manager for local repositories
    pub fn local_cache_manager(&self) -> &Arc<CacheManager> {
        &self.local_manager
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }
}
