//! Subscription body parsers
//!
//! Share-link lists (`ss://`, `ssr://`, `vmess://`, `trojan://`) come
//! base64 encoded, one link per line. Malformed or unsupported entries are
//! logged and skipped; the rest of the list is kept.

use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::warn;

use crate::node::{
    Network, NodeBase, NodeConfig, ShadowsocksNode, ShadowsocksObfs, ShadowsocksrNode, TlsEndpoint,
    TrojanNode, VmessMethod, VmessNode,
};

/// Per-provider overrides applied while parsing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseHints {
    pub udp_relay: Option<bool>,
    pub tls13: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    pub compatible_mode: bool,
}

// ============================================================================
// Decoding helpers
// ============================================================================

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode standard or URL-safe base64, with or without padding
pub fn decode_base64(input: &str) -> Option<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD_LENIENT
        .decode(&cleaned)
        .or_else(|_| URL_SAFE_LENIENT.decode(&cleaned))
        .ok()?;
    String::from_utf8(bytes).ok()
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Subscription bodies are usually base64; fall back to the raw text
fn decode_body(body: &str) -> String {
    decode_base64(body.trim()).unwrap_or_else(|| body.to_string())
}

fn split_fragment(link: &str) -> (&str, Option<String>) {
    match link.split_once('#') {
        Some((main, tag)) => (main, Some(percent_decode(tag)).filter(|t| !t.is_empty())),
        None => (link, None),
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals
fn split_host_port(input: &str) -> Option<(String, u16)> {
    let (host, port) = input.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.trim().parse().ok()?))
}

fn query_pairs(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn links<'a>(decoded: &'a str, scheme: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    decoded
        .lines()
        .map(str::trim)
        .filter(move |line| line.starts_with(scheme))
}

// ============================================================================
// Shadowsocks
// ============================================================================

/// Apply a SIP003 plugin string (`name;key=value;flag`) to a node.
///
/// Returns `false` for plugins with no node representation.
fn apply_ss_plugin(node: &mut ShadowsocksNode, plugin: &str) -> bool {
    let mut parts = plugin.split(';').map(str::trim);
    let name = parts.next().unwrap_or_default();
    let mut opts = BTreeMap::new();
    for part in parts.filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((k, v)) => opts.insert(k.to_string(), v.to_string()),
            None => opts.insert(part.to_string(), String::new()),
        };
    }

    match name {
        "" => true,
        "obfs-local" | "simple-obfs" | "obfs" => {
            node.obfs = match opts.get("obfs").map(String::as_str) {
                Some("tls") => Some(ShadowsocksObfs::Tls),
                Some("http") => Some(ShadowsocksObfs::Http),
                _ => return false,
            };
            node.obfs_host = opts.get("obfs-host").cloned();
            node.obfs_uri = opts.get("obfs-uri").cloned();
            true
        }
        "v2ray-plugin" => {
            if opts.get("mode").map_or(false, |m| m != "websocket") {
                return false;
            }
            let tls = opts.contains_key("tls");
            node.obfs = Some(if tls {
                ShadowsocksObfs::Wss
            } else {
                ShadowsocksObfs::Ws
            });
            node.obfs_host = opts.get("host").cloned();
            node.obfs_uri = opts.get("path").cloned();
            node.mux = opts.get("mux").map(|v| v != "0" && v != "false");
            true
        }
        _ => false,
    }
}

fn shadowsocks_node(
    name: String,
    host: String,
    port: u16,
    method: &str,
    password: &str,
    hints: &ParseHints,
) -> ShadowsocksNode {
    ShadowsocksNode {
        base: NodeBase::new(name),
        hostname: host,
        port,
        method: method.to_string(),
        password: password.to_string(),
        udp_relay: hints.udp_relay,
        ..Default::default()
    }
}

/// Parse a SIP002 or legacy `ss://` link
pub fn parse_ss_uri(link: &str, hints: &ParseHints) -> Option<ShadowsocksNode> {
    let rest = link.trim().strip_prefix("ss://")?;
    let (main, tag) = split_fragment(rest);
    let (main, query) = match main.split_once('?') {
        Some((m, q)) => (m.trim_end_matches('/'), Some(q)),
        None => (main.trim_end_matches('/'), None),
    };

    let (method, password, host, port) = match main.rsplit_once('@') {
        Some((userinfo, server)) => {
            let userinfo = decode_base64(userinfo).unwrap_or_else(|| percent_decode(userinfo));
            let (method, password) = userinfo.split_once(':')?;
            let (host, port) = split_host_port(server)?;
            (method.to_string(), password.to_string(), host, port)
        }
        None => {
            let decoded = decode_base64(main)?;
            let (userinfo, server) = decoded.rsplit_once('@')?;
            let (method, password) = userinfo.split_once(':')?;
            let (host, port) = split_host_port(server)?;
            (method.to_string(), password.to_string(), host, port)
        }
    };

    let name = tag.unwrap_or_else(|| format!("{}:{}", host, port));
    let mut node = shadowsocks_node(name, host, port, &method, &password, hints);

    if let Some(plugin) = query.map(query_pairs).and_then(|mut q| q.remove("plugin")) {
        if !apply_ss_plugin(&mut node, &plugin) {
            warn!("Unsupported shadowsocks plugin '{}' on {}, node skipped", plugin, node.base.node_name);
            return None;
        }
    }

    Some(node)
}

pub fn parse_shadowsocks_subscription(body: &str, hints: &ParseHints) -> Vec<NodeConfig> {
    let decoded = decode_body(body);
    links(&decoded, "ss://")
        .filter_map(|link| {
            let node = parse_ss_uri(link, hints);
            if node.is_none() {
                warn!("Skipping malformed shadowsocks link");
            }
            node
        })
        .map(NodeConfig::Shadowsocks)
        .collect()
}

#[derive(Debug, Deserialize)]
struct SsJsonServer {
    server: String,
    server_port: u16,
    password: String,
    method: String,
    #[serde(default)]
    remarks: Option<String>,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    plugin_opts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SsJsonConfig {
    configs: Vec<SsJsonServer>,
}

/// Shadowsocks GUI config export: `{"configs": [...]}`
pub fn parse_shadowsocks_json(body: &str, hints: &ParseHints) -> Result<Vec<NodeConfig>, String> {
    let config: SsJsonConfig = serde_json::from_str(body).map_err(|e| e.to_string())?;

    Ok(config
        .configs
        .into_iter()
        .filter_map(|server| {
            let name = server
                .remarks
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| format!("{}:{}", server.server, server.server_port));
            let mut node = shadowsocks_node(
                name,
                server.server,
                server.server_port,
                &server.method,
                &server.password,
                hints,
            );

            if let Some(plugin) = server.plugin.filter(|p| !p.is_empty()) {
                let spec = match server.plugin_opts {
                    Some(ref opts) if !opts.is_empty() => format!("{};{}", plugin, opts),
                    _ => plugin,
                };
                if !apply_ss_plugin(&mut node, &spec) {
                    warn!("Unsupported plugin on {}, node skipped", node.base.node_name);
                    return None;
                }
            }
            Some(NodeConfig::Shadowsocks(node))
        })
        .collect())
}

// ============================================================================
// SSD
// ============================================================================

#[derive(Debug, Deserialize)]
struct SsdServer {
    server: String,
    port: Option<u16>,
    encryption: Option<String>,
    password: Option<String>,
    plugin: Option<String>,
    plugin_options: Option<String>,
    remarks: Option<String>,
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SsdAirport {
    airport: String,
    port: u16,
    encryption: String,
    password: String,
    plugin: Option<String>,
    plugin_options: Option<String>,
    servers: Vec<SsdServer>,
}

/// `ssd://base64(json)`: airport defaults with per-server overrides
pub fn parse_ssd(body: &str, hints: &ParseHints) -> Result<Vec<NodeConfig>, String> {
    let encoded = body
        .trim()
        .strip_prefix("ssd://")
        .ok_or_else(|| "body does not start with ssd://".to_string())?;
    let json = decode_base64(encoded).ok_or_else(|| "invalid base64 payload".to_string())?;
    let airport: SsdAirport = serde_json::from_str(&json).map_err(|e| e.to_string())?;

    Ok(airport
        .servers
        .into_iter()
        .filter_map(|server| {
            let name = server.remarks.filter(|r| !r.is_empty()).unwrap_or_else(|| {
                format!("{} {}", airport.airport, server.id.unwrap_or_default())
            });
            let method = server.encryption.as_deref().unwrap_or(&airport.encryption);
            let password = server.password.as_deref().unwrap_or(&airport.password);
            let mut node = shadowsocks_node(
                name,
                server.server,
                server.port.unwrap_or(airport.port),
                method,
                password,
                hints,
            );

            let plugin = server.plugin.or_else(|| airport.plugin.clone());
            let options = server.plugin_options.or_else(|| airport.plugin_options.clone());
            if let Some(plugin) = plugin.filter(|p| !p.is_empty()) {
                let spec = match options {
                    Some(opts) if !opts.is_empty() => format!("{};{}", plugin, opts),
                    _ => plugin,
                };
                if !apply_ss_plugin(&mut node, &spec) {
                    warn!("Unsupported plugin on {}, node skipped", node.base.node_name);
                    return None;
                }
            }
            Some(NodeConfig::Shadowsocks(node))
        })
        .collect())
}

// ============================================================================
// Shadowsocksr
// ============================================================================

/// `ssr://base64(host:port:protocol:method:obfs:base64(pass)/?params)`
pub fn parse_ssr_uri(link: &str, hints: &ParseHints) -> Option<ShadowsocksrNode> {
    let payload = decode_base64(link.trim().strip_prefix("ssr://")?)?;
    let (main, query) = match payload.split_once("/?") {
        Some((m, q)) => (m, q),
        None => (payload.split_once('?').map_or(payload.as_str(), |(m, _)| m), ""),
    };

    // The host may itself contain colons (IPv6), so split from the right
    let mut fields = main.rsplitn(6, ':');
    let password = decode_base64(fields.next()?)?;
    let obfs = fields.next()?.to_string();
    let method = fields.next()?.to_string();
    let protocol = fields.next()?.to_string();
    let port: u16 = fields.next()?.parse().ok()?;
    let hostname = fields
        .next()?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let params: BTreeMap<String, String> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), decode_base64(v).unwrap_or_default()))
        .collect();

    let name = params
        .get("remarks")
        .filter(|r| !r.is_empty())
        .cloned()
        .unwrap_or_else(|| format!("{}:{}", hostname, port));

    Some(ShadowsocksrNode {
        base: NodeBase::new(name),
        hostname,
        port,
        method,
        protocol,
        obfs,
        password,
        obfsparam: params.get("obfsparam").cloned().unwrap_or_default(),
        protoparam: params.get("protoparam").cloned().unwrap_or_default(),
        udp_relay: hints.udp_relay,
    })
}

pub fn parse_shadowsocksr_subscription(body: &str, hints: &ParseHints) -> Vec<NodeConfig> {
    let decoded = decode_body(body);
    links(&decoded, "ssr://")
        .filter_map(|link| {
            let node = parse_ssr_uri(link, hints);
            if node.is_none() {
                warn!("Skipping malformed shadowsocksr link");
            }
            node
        })
        .map(NodeConfig::Shadowsocksr)
        .collect()
}

// ============================================================================
// V2rayN
// ============================================================================

/// Numbers in V2rayN links arrive as either JSON numbers or strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

impl NumOrString {
    fn as_string(&self) -> String {
        match self {
            NumOrString::Num(n) => n.to_string(),
            NumOrString::Str(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct V2rayNLink {
    #[serde(default)]
    ps: String,
    add: String,
    port: NumOrString,
    id: String,
    aid: Option<NumOrString>,
    #[serde(default)]
    net: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    tls: String,
    #[serde(default)]
    sni: String,
    #[serde(default)]
    scy: String,
}

/// `vmess://base64(json)` in the V2rayN layout
pub fn parse_vmess_uri(link: &str, hints: &ParseHints) -> Option<VmessNode> {
    let json = decode_base64(link.trim().strip_prefix("vmess://")?)?;
    let raw: V2rayNLink = serde_json::from_str(&json).ok()?;

    let network = match raw.net.as_str() {
        "" | "tcp" => Network::Tcp,
        "ws" => Network::Ws,
        other => {
            warn!("Unsupported vmess network '{}' on {}, node skipped", other, raw.ps);
            return None;
        }
    };
    let port: u16 = raw.port.as_string().parse().ok()?;
    let tls = raw.tls == "tls";
    let host = if !raw.sni.is_empty() && tls {
        Some(raw.sni)
    } else {
        Some(raw.host).filter(|h| !h.is_empty())
    };

    let alter_id = if hints.compatible_mode {
        "0".to_string()
    } else {
        raw.aid.map(|a| a.as_string()).unwrap_or_else(|| "0".to_string())
    };

    let name = if raw.ps.is_empty() {
        format!("{}:{}", raw.add, port)
    } else {
        raw.ps
    };

    Some(VmessNode {
        base: NodeBase::new(name),
        hostname: raw.add,
        port,
        method: VmessMethod::from_name(&raw.scy),
        uuid: raw.id,
        alter_id,
        network,
        tls,
        host,
        path: Some(raw.path).filter(|p| !p.is_empty()),
        udp_relay: hints.udp_relay,
        tls13: if tls { hints.tls13 } else { None },
        skip_cert_verify: if tls { hints.skip_cert_verify } else { None },
        ws_headers: None,
        server_cert_fingerprint_sha256: None,
    })
}

pub fn parse_v2rayn_subscription(body: &str, hints: &ParseHints) -> Vec<NodeConfig> {
    let decoded = decode_body(body);
    links(&decoded, "vmess://")
        .filter_map(|link| parse_vmess_uri(link, hints))
        .map(NodeConfig::Vmess)
        .collect()
}

// ============================================================================
// Trojan
// ============================================================================

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "True")
}

/// `trojan://password@host:port?sni=..&allowInsecure=1#name`
pub fn parse_trojan_uri(link: &str, hints: &ParseHints) -> Option<TrojanNode> {
    let url = url::Url::parse(link.trim()).ok()?;
    if url.scheme() != "trojan" {
        return None;
    }

    let hostname = url
        .host_str()?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url.port().unwrap_or(443);
    let password = percent_decode(url.username());
    if password.is_empty() {
        return None;
    }
    let params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();

    let network = match params.get("type").map(String::as_str) {
        None | Some("tcp") | Some("") => None,
        Some("ws") => Some(Network::Ws),
        Some(other) => {
            warn!("Unsupported trojan transport '{}', node skipped", other);
            return None;
        }
    };
    let ws_headers = params
        .get("host")
        .filter(|_| network.is_some())
        .map(|h| BTreeMap::from([("Host".to_string(), h.clone())]));

    let name = url
        .fragment()
        .map(percent_decode)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}:{}", hostname, port));

    Some(TrojanNode {
        base: NodeBase::new(name),
        tls: TlsEndpoint {
            hostname,
            port,
            tls13: hints.tls13,
            skip_cert_verify: params
                .get("allowInsecure")
                .map(|v| is_truthy(v))
                .or(hints.skip_cert_verify),
            sni: params.get("sni").or_else(|| params.get("peer")).cloned(),
            alpn: params
                .get("alpn")
                .map(|a| a.split(',').map(str::to_string).collect()),
            server_cert_fingerprint_sha256: None,
        },
        password,
        udp_relay: hints.udp_relay,
        network,
        ws_path: params.get("path").filter(|_| network.is_some()).cloned(),
        ws_headers,
    })
}

pub fn parse_trojan_subscription(body: &str, hints: &ParseHints) -> Vec<NodeConfig> {
    let decoded = decode_body(body);
    links(&decoded, "trojan://")
        .filter_map(|link| {
            let node = parse_trojan_uri(link, hints);
            if node.is_none() {
                warn!("Skipping malformed trojan link");
            }
            node
        })
        .map(NodeConfig::Trojan)
        .collect()
}
