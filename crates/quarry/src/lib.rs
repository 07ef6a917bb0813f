//! # Quarry
//!
//! A library for resolving build artifacts from repositories.
//! Combines repository transports, a checksum-aware artifact cache and
//! resolver chains into one resolution engine.
//!
//! ## Features
//!
//! - HTTP and local-file repository transports
//! - Checksum-cache matching to skip downloads of known content
//! - Conditional revalidation with `If-Modified-Since`
//! - Ordered resolver chains with client-module precedence
//! - Shared cache manager and transfer-progress reporting

pub mod artifact;
pub mod builder;
pub mod cache_manager;
pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod resolver;
pub mod resource;
pub mod settings;
pub mod store;
pub mod transport;

pub use artifact::{ArtifactIdentity, Location};
pub use builder::TransportConfigBuilder;
pub use checksum::HashValue;
pub use config::{PasswordCredentials, TransportConfig};
pub use error::TransportError;

// Re-export the resolution surface
pub use cache_manager::{CacheManager, ResolvedArtifact};
pub use resolver::{ChainResolver, ClientModuleRegistry, Resolver, ResolverKind};
pub use settings::{ResolutionSettings, SettingsConverter};

// Re-export transport types
pub use resource::{CachedResource, ExternalResource, LiveResource, OpenResourceSet};
pub use transport::{FileTransport, HttpTransport, ListeningTransport, RepositoryTransport};

// Re-export factory and event types
pub use events::{ProgressLoggingListener, RequestType, TransferDescription, TransferListener};
pub use factory::TransportFactory;
pub use store::{ArtifactStore, CachedArtifact, CachedArtifactCandidates, StoreConfig};

// Re-export client utilities
pub use client::create_client;
