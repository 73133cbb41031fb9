//! Normalized proxy node descriptions
//!
//! One variant per protocol, each embedding the shared [`NodeBase`] fields.
//! Records are plain values: encoders match on the variant and read only the
//! fields of that variant.

pub mod filter;
pub mod flag;

pub use filter::{apply_filter, FilterRule, NodeFilter};
pub use flag::FlagMap;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Protocol discriminant of a [`NodeConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Shadowsocks,
    Shadowsocksr,
    Vmess,
    Trojan,
    Socks5,
    Snell,
    Tuic,
    Http,
    Https,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Shadowsocks => "shadowsocks",
            NodeType::Shadowsocksr => "shadowsocksr",
            NodeType::Vmess => "vmess",
            NodeType::Trojan => "trojan",
            NodeType::Socks5 => "socks5",
            NodeType::Snell => "snell",
            NodeType::Tuic => "tuic",
            NodeType::Http => "http",
            NodeType::Https => "https",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shadow-TLS overlay applied on top of a node's own transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowTls {
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

/// Fields shared by every protocol variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeBase {
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// TCP Fast Open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tfo: Option<bool>,
    /// Multipath TCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mptcp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_tls: Option<ShadowTls>,
    /// Local port of an externally launched client process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_proxy: Option<String>,
    /// Resolved addresses of the node hostname
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostname_ip: Vec<IpAddr>,
    /// Name of the provider the node came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Executable used for protocols that need an external client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_path: Option<PathBuf>,
}

impl NodeBase {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }
}

/// Shadowsocks obfuscation plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowsocksObfs {
    Tls,
    Http,
    /// v2ray-plugin websocket
    Ws,
    /// v2ray-plugin websocket over TLS
    Wss,
}

impl ShadowsocksObfs {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowsocksObfs::Tls => "tls",
            ShadowsocksObfs::Http => "http",
            ShadowsocksObfs::Ws => "ws",
            ShadowsocksObfs::Wss => "wss",
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, ShadowsocksObfs::Ws | ShadowsocksObfs::Wss)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShadowsocksNode {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    pub method: String,
    pub password: String,
    pub udp_relay: Option<bool>,
    pub obfs: Option<ShadowsocksObfs>,
    pub obfs_host: Option<String>,
    pub obfs_uri: Option<String>,
    pub skip_cert_verify: Option<bool>,
    pub tls13: Option<bool>,
    pub mux: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShadowsocksrNode {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    pub method: String,
    pub protocol: String,
    pub obfs: String,
    pub password: String,
    #[serde(default)]
    pub obfsparam: String,
    #[serde(default)]
    pub protoparam: String,
    pub udp_relay: Option<bool>,
}

/// VMess body ciphers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmessMethod {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "chacha20-ietf-poly1305")]
    Chacha20IetfPoly1305,
    #[serde(rename = "none")]
    None,
}

impl VmessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmessMethod::Auto => "auto",
            VmessMethod::Aes128Gcm => "aes-128-gcm",
            VmessMethod::Chacha20IetfPoly1305 => "chacha20-ietf-poly1305",
            VmessMethod::None => "none",
        }
    }

    /// Parse loosely, unknown ciphers fall back to `auto`
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "aes-128-gcm" => VmessMethod::Aes128Gcm,
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => VmessMethod::Chacha20IetfPoly1305,
            "none" => VmessMethod::None,
            _ => VmessMethod::Auto,
        }
    }
}

/// Stream transport of VMess and Trojan nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Ws,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VmessNode {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub method: VmessMethod,
    pub uuid: String,
    #[serde(default)]
    pub alter_id: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub tls: bool,
    /// Websocket host header and TLS server name
    pub host: Option<String>,
    pub path: Option<String>,
    pub udp_relay: Option<bool>,
    pub tls13: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_headers: Option<BTreeMap<String, String>>,
    pub server_cert_fingerprint_sha256: Option<String>,
}

/// TLS endpoint fields shared by Trojan, TUIC and HTTPS nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsEndpoint {
    pub hostname: String,
    pub port: u16,
    pub tls13: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    pub server_cert_fingerprint_sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrojanNode {
    #[serde(flatten)]
    pub base: NodeBase,
    #[serde(flatten)]
    pub tls: TlsEndpoint,
    pub password: String,
    pub udp_relay: Option<bool>,
    pub network: Option<Network>,
    pub ws_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TuicNode {
    #[serde(flatten)]
    pub base: NodeBase,
    #[serde(flatten)]
    pub tls: TlsEndpoint,
    pub token: String,
    pub udp_relay: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Socks5Node {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<bool>,
    pub tls13: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub udp_relay: Option<bool>,
    pub sni: Option<String>,
    pub client_cert: Option<String>,
    pub server_cert_fingerprint_sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnellNode {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    pub psk: String,
    pub obfs: Option<String>,
    pub obfs_host: Option<String>,
    pub version: Option<String>,
    pub reuse: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpNode {
    #[serde(flatten)]
    pub base: NodeBase,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpsNode {
    #[serde(flatten)]
    pub base: NodeBase,
    #[serde(flatten)]
    pub tls: TlsEndpoint,
    pub username: String,
    pub password: String,
}

/// A single proxy endpoint, tagged by protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeConfig {
    Shadowsocks(ShadowsocksNode),
    Shadowsocksr(ShadowsocksrNode),
    Vmess(VmessNode),
    Trojan(TrojanNode),
    Socks5(Socks5Node),
    Snell(SnellNode),
    Tuic(TuicNode),
    Http(HttpNode),
    Https(HttpsNode),
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Shadowsocks(_) => NodeType::Shadowsocks,
            NodeConfig::Shadowsocksr(_) => NodeType::Shadowsocksr,
            NodeConfig::Vmess(_) => NodeType::Vmess,
            NodeConfig::Trojan(_) => NodeType::Trojan,
            NodeConfig::Socks5(_) => NodeType::Socks5,
            NodeConfig::Snell(_) => NodeType::Snell,
            NodeConfig::Tuic(_) => NodeType::Tuic,
            NodeConfig::Http(_) => NodeType::Http,
            NodeConfig::Https(_) => NodeType::Https,
        }
    }

    pub fn base(&self) -> &NodeBase {
        match self {
            NodeConfig::Shadowsocks(n) => &n.base,
            NodeConfig::Shadowsocksr(n) => &n.base,
            NodeConfig::Vmess(n) => &n.base,
            NodeConfig::Trojan(n) => &n.base,
            NodeConfig::Socks5(n) => &n.base,
            NodeConfig::Snell(n) => &n.base,
            NodeConfig::Tuic(n) => &n.base,
            NodeConfig::Http(n) => &n.base,
            NodeConfig::Https(n) => &n.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut NodeBase {
        match self {
            NodeConfig::Shadowsocks(n) => &mut n.base,
            NodeConfig::Shadowsocksr(n) => &mut n.base,
            NodeConfig::Vmess(n) => &mut n.base,
            NodeConfig::Trojan(n) => &mut n.base,
            NodeConfig::Socks5(n) => &mut n.base,
            NodeConfig::Snell(n) => &mut n.base,
            NodeConfig::Tuic(n) => &mut n.base,
            NodeConfig::Http(n) => &mut n.base,
            NodeConfig::Https(n) => &mut n.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().node_name
    }

    pub fn hostname(&self) -> &str {
        match self {
            NodeConfig::Shadowsocks(n) => &n.hostname,
            NodeConfig::Shadowsocksr(n) => &n.hostname,
            NodeConfig::Vmess(n) => &n.hostname,
            NodeConfig::Trojan(n) => &n.tls.hostname,
            NodeConfig::Socks5(n) => &n.hostname,
            NodeConfig::Snell(n) => &n.hostname,
            NodeConfig::Tuic(n) => &n.tls.hostname,
            NodeConfig::Http(n) => &n.hostname,
            NodeConfig::Https(n) => &n.tls.hostname,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            NodeConfig::Shadowsocks(n) => n.port,
            NodeConfig::Shadowsocksr(n) => n.port,
            NodeConfig::Vmess(n) => n.port,
            NodeConfig::Trojan(n) => n.tls.port,
            NodeConfig::Socks5(n) => n.port,
            NodeConfig::Snell(n) => n.port,
            NodeConfig::Tuic(n) => n.tls.port,
            NodeConfig::Http(n) => n.port,
            NodeConfig::Https(n) => n.tls.port,
        }
    }

    /// Nodes are enabled unless explicitly switched off
    pub fn is_enabled(&self) -> bool {
        self.base().enable != Some(false)
    }
}
