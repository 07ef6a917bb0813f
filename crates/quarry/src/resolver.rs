//! # Resolvers and Resolver Chains
//!
//! A resolver turns an artifact identity plus candidate locations into a
//! resolved local file. Repository resolvers delegate to a transport and a
//! cache manager; client-module resolvers answer from an in-memory registry;
//! chain resolvers walk their members in order.
//!
//! Chains hold their members behind shared interior mutability so a chain
//! keeps its identity across reconfiguration: clones handed out earlier see
//! membership changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::artifact::{ArtifactIdentity, Location};
use crate::cache_manager::{CacheManager, ResolvedArtifact};
use crate::checksum::HashValue;
use crate::error::TransportError;
use crate::transport::RepositoryTransport;

/// Registry backing client-module resolvers: identity key to a local file
/// declared directly in the build, bypassing repositories entirely.
pub type ClientModuleRegistry = Arc<RwLock<HashMap<String, PathBuf>>>;

/// What kind of resolution a resolver performs.
#[derive(Clone)]
pub enum ResolverKind {
    /// Fetches from a repository through a transport
    Repository {
        transport: Arc<dyn RepositoryTransport>,
    },
    /// Answers from locally declared module files
    ClientModule { registry: ClientModuleRegistry },
    /// Walks member resolvers in order
    Chain(ChainResolver),
}

/// A named resolution strategy with its persistence policy.
#[derive(Clone)]
pub struct Resolver {
    name: String,
    kind: ResolverKind,
    cache_manager: Arc<CacheManager>,
}

impl Resolver {
    pub fn repository(
        name: impl Into<String>,
        transport: Arc<dyn RepositoryTransport>,
        cache_manager: Arc<CacheManager>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ResolverKind::Repository { transport },
            cache_manager,
        }
    }

    pub fn client_module(name: impl Into<String>, registry: ClientModuleRegistry) -> Self {
        let name = name.into();
        Self {
            cache_manager: Arc::new(CacheManager::noop(format!("{name}-noop"))),
            name,
            kind: ResolverKind::ClientModule { registry },
        }
    }

    pub fn chain(chain: ChainResolver) -> Self {
        Self {
            name: chain.name().to_string(),
            cache_manager: Arc::new(CacheManager::noop(format!("{}-noop", chain.name()))),
            kind: ResolverKind::Chain(chain),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ResolverKind {
        &self.kind
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    /// Rebind this resolver to a different cache manager, preserving name
    /// and kind
    pub fn with_cache_manager(mut self, cache_manager: Arc<CacheManager>) -> Self {
        self.cache_manager = cache_manager;
        self
    }

    /// Resolve the identity against this resolver.
    ///
    /// `Ok(None)` means not found anywhere, a routine outcome; errors are
    /// reserved for transport and configuration failures.
    pub async fn resolve(
        &self,
        identity: &ArtifactIdentity,
        locations: &[Location],
    ) -> Result<Option<ResolvedArtifact>, TransportError> {
        self.resolve_with(identity, locations, false).await
    }

    /// Boxed for recursion: chains may contain chains.
    fn resolve_with<'a>(
        &'a self,
        identity: &'a ArtifactIdentity,
        locations: &'a [Location],
        changing: bool,
    ) -> BoxFuture<'a, Result<Option<ResolvedArtifact>, TransportError>> {
        async move {
            match &self.kind {
                ResolverKind::Repository { transport } => {
                    self.resolve_repository(transport.as_ref(), identity, locations, changing)
                        .await
                }
                ResolverKind::ClientModule { registry } => {
                    resolve_client_module(registry, identity).await
                }
                ResolverKind::Chain(chain) => chain.resolve(identity, locations, changing).await,
            }
        }
        .boxed()
    }

    async fn resolve_repository(
        &self,
        transport: &dyn RepositoryTransport,
        identity: &ArtifactIdentity,
        locations: &[Location],
        changing: bool,
    ) -> Result<Option<ResolvedArtifact>, TransportError> {
        // Changing artifacts must not be satisfied by checksum-matched cache
        // entries; withholding the identity disables that shortcut while
        // keeping If-Modified-Since revalidation.
        let fetch_identity = if changing { None } else { Some(identity) };

        for location in locations {
            let resource = transport.fetch(location, fetch_identity, true).await?;
            if resource.is_missing() {
                debug!(resolver = %self.name, location = %location, "Not found, trying next location");
                continue;
            }
            let resolved = self.cache_manager.persist(transport, identity, resource).await?;
            return Ok(Some(resolved));
        }
        Ok(None)
    }

    /// Publish a local file through this resolver.
    ///
    /// Chains fan out to every member; client-module resolvers cannot
    /// publish.
    pub fn publish<'a>(
        &'a self,
        source: &'a Path,
        destination: &'a Location,
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        async move {
            match &self.kind {
                ResolverKind::Repository { transport } => transport.put(source, destination).await,
                ResolverKind::ClientModule { .. } => Err(TransportError::Configuration(format!(
                    "Resolver '{}' cannot publish artifacts",
                    self.name
                ))),
                ResolverKind::Chain(chain) => {
                    for member in chain.members() {
                        member.publish(source, destination).await?;
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }

    /// Children of a directory-like location; the first member that supports
    /// listing answers for a chain.
    pub fn list_children<'a>(
        &'a self,
        parent: &'a Location,
    ) -> BoxFuture<'a, Result<Option<Vec<Location>>, TransportError>> {
        async move {
            match &self.kind {
                ResolverKind::Repository { transport } => transport.list(parent).await,
                ResolverKind::ClientModule { .. } => Ok(None),
                ResolverKind::Chain(chain) => {
                    for member in chain.members() {
                        if let Some(children) = member.list_children(parent).await? {
                            return Ok(Some(children));
                        }
                    }
                    Ok(None)
                }
            }
        }
        .boxed()
    }
}

async fn resolve_client_module(
    registry: &ClientModuleRegistry,
    identity: &ArtifactIdentity,
) -> Result<Option<ResolvedArtifact>, TransportError> {
    let file = registry.read().get(&identity.key()).cloned();
    let Some(file) = file else {
        return Ok(None);
    };
    let hash = HashValue::sha1_of_file(&file).await?;
    Ok(Some(ResolvedArtifact {
        identity: identity.clone(),
        location: Location::from(file.as_path()),
        file,
        hash,
        last_modified: None,
    }))
}

struct ChainState {
    return_first: bool,
    changing_pattern: Option<Regex>,
    members: RwLock<Vec<Resolver>>,
}

/// An ordered group of resolvers consulted as one.
///
/// Cloning a chain preserves its identity: membership changes through any
/// clone are visible to all of them.
#[derive(Clone)]
pub struct ChainResolver {
    name: String,
    state: Arc<ChainState>,
}

impl ChainResolver {
    /// `return_first` stops the walk at the first member that resolves;
    /// otherwise every member is consulted and the last success wins.
    pub fn new(name: impl Into<String>, return_first: bool) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(ChainState {
                return_first,
                changing_pattern: None,
                members: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Versions matching the pattern are treated as changing: never
    /// satisfied by checksum-matched cache entries
    pub fn with_changing_pattern(mut self, pattern: Regex) -> Self {
        let members = self.state.members.read().clone();
        self.state = Arc::new(ChainState {
            return_first: self.state.return_first,
            changing_pattern: Some(pattern),
            members: RwLock::new(members),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, member: Resolver) {
        self.state.members.write().push(member);
    }

    /// Snapshot of the current membership
    pub fn members(&self) -> Vec<Resolver> {
        self.state.members.read().clone()
    }

    /// Drop every member the predicate rejects
    pub fn retain(&self, keep: impl FnMut(&Resolver) -> bool) {
        self.state.members.write().retain(keep);
    }

    pub fn len(&self) -> usize {
        self.state.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.members.read().is_empty()
    }

    fn is_changing(&self, identity: &ArtifactIdentity) -> bool {
        self.state
            .changing_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&identity.version))
    }

    async fn resolve(
        &self,
        identity: &ArtifactIdentity,
        locations: &[Location],
        changing: bool,
    ) -> Result<Option<ResolvedArtifact>, TransportError> {
        let changing = changing || self.is_changing(identity);
        let members = self.members();

        let mut attempts = Vec::new();
        let mut last_success = None;
        let mut last_failure: Option<TransportError> = None;

        for member in members {
            attempts.push(describe_attempt(&member, locations));
            match member.resolve_with(identity, locations, changing).await {
                Ok(Some(resolved)) => {
                    debug!(chain = %self.name, member = %member.name(), identity = %identity, "Resolved");
                    if self.state.return_first {
                        return Ok(Some(resolved));
                    }
                    last_success = Some(resolved);
                }
                Ok(None) => {}
                Err(error) => {
                    // A member failure does not stop the walk; a later member
                    // may still resolve the artifact.
                    warn!(chain = %self.name, member = %member.name(), "Member failed: {error}");
                    last_failure = Some(error);
                }
            }
        }

        if let Some(resolved) = last_success {
            return Ok(Some(resolved));
        }
        match last_failure {
            Some(error) => Err(TransportError::ResolutionFailed {
                attempts,
                reason: error.to_string(),
            }),
            None => Ok(None),
        }
    }
}

fn describe_attempt(member: &Resolver, locations: &[Location]) -> String {
    let targets: Vec<&str> = locations.iter().map(Location::as_str).collect();
    format!("{} at {}", member.name(), targets.join(" | "))
}
