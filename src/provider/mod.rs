//! Node providers
//!
//! A provider turns one entry of the `providers` table into a node list:
//! inline nodes for `custom`, a fetched and parsed subscription for every
//! other kind. [`get_provider_nodes`] runs the per-provider post-processing
//! (filter, flags, renames, defaults, hostname resolution) on top.

pub mod clash;
pub mod config;
pub mod custom;
pub mod fetch;
pub mod resource;
pub mod subscribe;
pub mod subscription;
pub mod usage;

pub use config::{ConstructionError, ProviderConfig, ProviderKind, RelayUrl, RenameRule};
pub use custom::CustomProvider;
pub use fetch::{user_agent, FetchError, FetchResponse, Fetcher, ReqwestFetcher, DEFAULT_FETCH_TIMEOUT};
pub use resource::ResourceLoader;
pub use subscribe::SubscribeProvider;
pub use subscription::ParseHints;
pub use usage::{parse_subscription_userinfo, SubscriptionUserinfo};

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::node::{apply_filter, FlagMap, NodeConfig};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Provider '{provider}' returned an unreadable {kind} payload: {message}")]
    Parse {
        provider: String,
        kind: ProviderKind,
        message: String,
    },

    #[error("Provider '{provider}' has an invalid node: {message}")]
    InvalidNode { provider: String, message: String },

    #[error("Provider '{0}' does not report subscription usage")]
    Unsupported(String),
}

// ============================================================================
// Port allocation
// ============================================================================

/// Local ports handed to nodes that run behind an external client process.
///
/// Not reentrant: each call reads and advances the counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortAllocator {
    next: Option<u16>,
}

impl PortAllocator {
    /// Port returned when no start port is configured
    pub const UNALLOCATED: u16 = 0;

    pub fn new(start: Option<u16>) -> Self {
        Self { next: start }
    }

    pub fn next_port(&mut self) -> u16 {
        match self.next {
            Some(port) => {
                self.next = port.checked_add(1);
                port
            }
            None => Self::UNALLOCATED,
        }
    }
}

// ============================================================================
// Shared provider state
// ============================================================================

/// State every provider kind carries
pub struct ProviderBase {
    pub name: String,
    pub config: ProviderConfig,
    pub ports: PortAllocator,
    pub loader: Arc<ResourceLoader>,
    pub app: Arc<AppConfig>,
    pub flags: FlagMap,
}

impl ProviderBase {
    /// Validates the definition before anything else happens
    pub fn new(
        name: &str,
        app: Arc<AppConfig>,
        loader: Arc<ResourceLoader>,
    ) -> Result<Self, ProviderError> {
        let config = app.provider_config(name)?;
        let flags = app.flag_map()?;

        Ok(Self {
            name: name.to_string(),
            ports: PortAllocator::new(config.start_port()),
            config,
            loader,
            app,
            flags,
        })
    }

    pub fn hints(&self) -> ParseHints {
        ParseHints {
            udp_relay: self.config.udp_relay,
            tls13: self.config.tls13,
            skip_cert_verify: self.config.skip_cert_verify,
            compatible_mode: self.config.compatible_mode,
        }
    }

    /// Give Shadowsocksr nodes a local port and the client executable
    pub fn attach_external_client(&mut self, node: &mut NodeConfig) {
        if !matches!(node, NodeConfig::Shadowsocksr(_)) {
            return;
        }

        let base = node.base_mut();
        if base.local_port.is_none() {
            let port = self.ports.next_port();
            base.local_port = (port != PortAllocator::UNALLOCATED).then_some(port);
        }
        if base.bin_path.is_none() {
            base.bin_path = self.app.bin_path.shadowsocksr.clone();
        }
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait NodeProvider: Send + Sync {
    fn base(&self) -> &ProviderBase;

    fn base_mut(&mut self) -> &mut ProviderBase;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn kind(&self) -> ProviderKind {
        self.base().config.kind
    }

    fn supports_subscription_userinfo(&self) -> bool {
        false
    }

    async fn get_subscription_userinfo(
        &self,
        _request_user_agent: Option<&str>,
    ) -> Result<Option<SubscriptionUserinfo>, ProviderError> {
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Raw node list, before post-processing
    async fn get_node_list(
        &mut self,
        _request_user_agent: Option<&str>,
    ) -> Result<Vec<NodeConfig>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Construct the named provider from the configuration
pub fn build_provider(
    name: &str,
    app: &Arc<AppConfig>,
    loader: Arc<ResourceLoader>,
) -> Result<Box<dyn NodeProvider>, ProviderError> {
    let base = ProviderBase::new(name, app.clone(), loader)?;
    debug!("Constructed provider {} ({})", name, base.config.kind);

    Ok(match base.config.kind {
        ProviderKind::Custom => Box::new(CustomProvider::new(base)),
        _ => Box::new(SubscribeProvider::new(base)),
    })
}

// ============================================================================
// SBIO: Pure helpers (no I/O)
// ============================================================================

/// Characters `encodeURIComponent` leaves alone
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Rewrite a subscription URL through a relay template.
///
/// `%%URL%%` is replaced with the encoded URL, `%URL%` with the raw URL, and
/// a template with neither gets the raw URL appended. `true` leaves the URL
/// untouched.
pub fn relay_url(url: &str, relay: Option<&RelayUrl>) -> String {
    match relay {
        Some(RelayUrl::Template(template)) => {
            if template.contains("%%URL%%") {
                let encoded = utf8_percent_encode(url, URI_COMPONENT).to_string();
                template.replace("%%URL%%", &encoded)
            } else if template.contains("%URL%") {
                template.replace("%URL%", url)
            } else {
                format!("{}{}", template, url)
            }
        }
        Some(RelayUrl::Enabled(_)) | None => url.to_string(),
    }
}

/// Apply the provider's filter and name/option transforms in order
pub fn post_process(base: &ProviderBase, nodes: Vec<NodeConfig>) -> Vec<NodeConfig> {
    let config = &base.config;
    let mut nodes = match config.node_filter {
        Some(ref filter) => apply_filter(&nodes, Some(filter)),
        None => nodes,
    };

    for node in nodes.iter_mut() {
        let node_base = node.base_mut();

        if config.add_flag {
            node_base.node_name = base
                .flags
                .prepend_flag(&node_base.node_name, config.remove_existing_flag);
        } else if config.remove_existing_flag {
            node_base.node_name = crate::node::flag::remove_flag(&node_base.node_name)
                .trim()
                .to_string();
        }

        for rule in &config.rename_node {
            node_base.node_name = rule.apply(&node_base.node_name);
        }

        if node_base.tfo.is_none() {
            node_base.tfo = config.tfo;
        }
        if node_base.mptcp.is_none() {
            node_base.mptcp = config.mptcp;
        }
        if node_base.underlying_proxy.is_none() {
            node_base.underlying_proxy = config.underlying_proxy.clone();
        }

        node_base.provider = Some(base.name.clone());
    }

    nodes
}

// ============================================================================
// SBIO: I/O implementation
// ============================================================================

async fn resolve_node(node: &mut NodeConfig) {
    let host = node.hostname().to_string();
    if host.parse::<IpAddr>().is_ok() {
        return;
    }

    let lookup = tokio::net::lookup_host((host.as_str(), node.port())).await;
    match lookup {
        Ok(addrs) => {
            let mut ips: Vec<IpAddr> = Vec::new();
            for addr in addrs {
                if !ips.contains(&addr.ip()) {
                    ips.push(addr.ip());
                }
            }
            debug!("{} resolved to {:?}", host, ips);
            node.base_mut().hostname_ip = ips;
        }
        Err(e) => warn!("Failed to resolve {} for {}: {}", host, node.name(), e),
    }
}

/// Attach resolved addresses to every node with a domain name
pub async fn resolve_hostnames(nodes: &mut [NodeConfig]) {
    join_all(nodes.iter_mut().map(|node| resolve_node(node))).await;
}

/// Fetch a provider's nodes and run its post-processing
pub async fn get_provider_nodes(
    provider: &mut dyn NodeProvider,
    request_user_agent: Option<&str>,
) -> Result<Vec<NodeConfig>, ProviderError> {
    let raw = provider.get_node_list(request_user_agent).await?;
    let fetched = raw.len();

    let base = provider.base();
    let mut nodes = post_process(base, raw);
    if base.app.surge_config.resolve_hostname {
        resolve_hostnames(&mut nodes).await;
    }

    info!(
        "Provider {} produced {} nodes ({} before filtering)",
        base.name,
        nodes.len(),
        fetched
    );
    Ok(nodes)
}
