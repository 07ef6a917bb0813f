//! # Resolution Settings
//!
//! Builds the resolver topology used for dependency resolution and
//! publication: client-module declarations are consulted first, then the
//! user's repositories in order, with the internal repository always present
//! inside the user chain.
//!
//! Conversion is idempotent. Repeated calls reuse the same chains; only the
//! user-supplied members are swapped out, so resolver handles obtained from
//! an earlier conversion keep working after a reconfiguration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::artifact::ArtifactIdentity;
use crate::error::TransportError;
use crate::factory::TransportFactory;
use crate::resolver::{ChainResolver, ClientModuleRegistry, Resolver, ResolverKind};

/// Name of the chain holding the user's repositories plus the internal one
pub const USER_RESOLVER_CHAIN_NAME: &str = "chain";
/// Name of the resolver answering from client-module declarations
pub const CLIENT_MODULE_NAME: &str = "clientModule";
/// Name of the outer chain, the default resolver for every resolution
pub const OUTER_CHAIN_NAME: &str = "clientModuleChain";

const DEFAULT_CHANGING_PATTERN: &str = ".*-SNAPSHOT";

/// The resolvers available to one resolution or publication context.
#[derive(Default)]
pub struct ResolutionSettings {
    resolvers: HashMap<String, Resolver>,
    default_resolver: Option<String>,
}

impl ResolutionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resolver(&mut self, resolver: Resolver) {
        self.resolvers.insert(resolver.name().to_string(), resolver);
    }

    pub fn remove_resolver(&mut self, name: &str) {
        self.resolvers.remove(name);
    }

    pub fn clear_resolvers(&mut self) {
        self.resolvers.clear();
    }

    pub fn resolver(&self, name: &str) -> Option<&Resolver> {
        self.resolvers.get(name)
    }

    /// Like [`resolver`](Self::resolver) but for callers that cannot proceed
    /// without one
    pub fn require_resolver(&self, name: &str) -> Result<&Resolver, TransportError> {
        self.resolvers
            .get(name)
            .ok_or_else(|| TransportError::NoResolver(name.to_string()))
    }

    pub fn resolvers(&self) -> impl Iterator<Item = &Resolver> {
        self.resolvers.values()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn set_default_resolver(&mut self, name: impl Into<String>) {
        self.default_resolver = Some(name.into());
    }

    /// The resolver every resolution request goes through by default
    pub fn default_resolver(&self) -> Option<&Resolver> {
        self.resolvers.get(self.default_resolver.as_deref()?)
    }
}

struct ResolveState {
    settings: ResolutionSettings,
    user_chain: ChainResolver,
}

/// Converts user repository declarations into resolver settings.
///
/// One converter lives as long as its settings context; reconfiguration goes
/// through the same instance so chains and the shared cache manager keep
/// their identity.
pub struct SettingsConverter {
    factory: Arc<TransportFactory>,
    internal_resolver: Resolver,
    client_modules: ClientModuleRegistry,
    resolve_state: Option<ResolveState>,
    publish_settings: Option<ResolutionSettings>,
}

impl SettingsConverter {
    /// `internal_resolver` is the always-present repository (e.g. the build
    /// tool's own artifact area) that participates in every user chain.
    pub fn new(factory: Arc<TransportFactory>, internal_resolver: Resolver) -> Self {
        Self {
            factory,
            internal_resolver,
            client_modules: Arc::new(RwLock::new(HashMap::new())),
            resolve_state: None,
            publish_settings: None,
        }
    }

    /// Declare a client module: the identity resolves to this local file,
    /// bypassing all repositories.
    pub fn register_client_module(&self, identity: &ArtifactIdentity, file: PathBuf) {
        self.client_modules.write().insert(identity.key(), file);
    }

    pub fn client_module_registry(&self) -> &ClientModuleRegistry {
        &self.client_modules
    }

    /// Build (or reconfigure) the settings used for dependency resolution.
    ///
    /// The first call assembles the chain topology; later calls swap the
    /// user-supplied members while the chains themselves stay in place.
    pub fn convert_for_resolve(&mut self, user_resolvers: Vec<Resolver>) -> &ResolutionSettings {
        let factory = self.factory.clone();
        let internal = self.internal_resolver.clone();
        let modules = self.client_modules.clone();
        let state = self
            .resolve_state
            .get_or_insert_with(|| build_resolve_state(&factory, &internal, &modules));

        replace_user_resolvers(state, &factory, internal.name(), user_resolvers);
        &state.settings
    }

    /// Build the settings used for publication. The resolver set is rebuilt
    /// from scratch on every call.
    pub fn convert_for_publish(&mut self, publish_resolvers: Vec<Resolver>) -> &ResolutionSettings {
        let settings = self
            .publish_settings
            .get_or_insert_with(ResolutionSettings::new);
        settings.clear_resolvers();
        for resolver in publish_resolvers {
            let resolver = initialize_resolver(&self.factory, resolver);
            settings.add_resolver(resolver);
        }
        settings
    }

    /// The user chain of the resolve settings, if already built
    pub fn user_chain(&self) -> Option<&ChainResolver> {
        self.resolve_state.as_ref().map(|state| &state.user_chain)
    }
}

fn build_resolve_state(
    factory: &TransportFactory,
    internal_resolver: &Resolver,
    client_modules: &ClientModuleRegistry,
) -> ResolveState {
    let user_chain = ChainResolver::new(USER_RESOLVER_CHAIN_NAME, true)
        .with_changing_pattern(default_changing_pattern());
    user_chain.add(internal_resolver.clone());
    let user_chain_resolver = Resolver::chain(user_chain.clone());

    let client_module_resolver =
        Resolver::client_module(CLIENT_MODULE_NAME, client_modules.clone());

    // Client modules take precedence over every repository
    let outer_chain = ChainResolver::new(OUTER_CHAIN_NAME, true);
    outer_chain.add(client_module_resolver.clone());
    outer_chain.add(user_chain_resolver.clone());
    let outer_resolver = Resolver::chain(outer_chain);

    let mut settings = ResolutionSettings::new();
    for resolver in [
        internal_resolver.clone(),
        client_module_resolver,
        user_chain_resolver,
        outer_resolver,
    ] {
        let resolver = initialize_resolver(factory, resolver);
        settings.add_resolver(resolver);
    }
    settings.set_default_resolver(OUTER_CHAIN_NAME);

    debug!("Built resolver settings with default '{OUTER_CHAIN_NAME}'");
    ResolveState {
        settings,
        user_chain,
    }
}

/// Swap the user-supplied members of the user chain, keeping the internal
/// resolver and the chain itself in place.
fn replace_user_resolvers(
    state: &mut ResolveState,
    factory: &TransportFactory,
    internal_name: &str,
    user_resolvers: Vec<Resolver>,
) {
    for member in state.user_chain.members() {
        if member.name() != internal_name {
            state.settings.remove_resolver(member.name());
        }
    }
    state.user_chain.retain(|member| member.name() == internal_name);

    for resolver in user_resolvers {
        let resolver = initialize_resolver(factory, resolver);
        state.settings.add_resolver(resolver.clone());
        state.user_chain.add(resolver);
    }
}

/// Prepare a resolver for use in a settings context: rebind non-trivial
/// cache managers to the shared downloading manager and attach the shared
/// transfer listener to its transports.
fn initialize_resolver(factory: &TransportFactory, resolver: Resolver) -> Resolver {
    let shared = factory.downloading_cache_manager();
    let resolver = if !resolver.cache_manager().is_trivial()
        && !Arc::ptr_eq(resolver.cache_manager(), shared)
    {
        debug!(resolver = %resolver.name(), "Rebinding resolver to the shared cache manager");
        resolver.with_cache_manager(shared.clone())
    } else {
        resolver
    };

    match resolver.kind() {
        ResolverKind::Repository { transport } => factory.attach_listener(transport),
        ResolverKind::Chain(chain) => {
            let members = chain.members();
            chain.retain(|_| false);
            for member in members {
                chain.add(initialize_resolver(factory, member));
            }
        }
        ResolverKind::ClientModule { .. } => {}
    }
    resolver
}

fn default_changing_pattern() -> Regex {
    Regex::new(DEFAULT_CHANGING_PATTERN).expect("hardcoded pattern")
}
