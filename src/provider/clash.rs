//! Clash configuration files as a node source
//!
//! Reads the `proxies` list (or the legacy capitalized `Proxy` key). Every
//! entry is decoded on its own so that an unknown type or a malformed entry
//! only drops that entry.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::warn;

use super::subscription::ParseHints;
use crate::node::{
    HttpNode, HttpsNode, Network, NodeBase, NodeConfig, ShadowsocksNode, ShadowsocksObfs,
    ShadowsocksrNode, SnellNode, Socks5Node, TlsEndpoint, TrojanNode, VmessMethod, VmessNode,
};

#[derive(Debug, Deserialize)]
struct ClashDocument {
    proxies: Option<Vec<Value>>,
    #[serde(rename = "Proxy")]
    legacy_proxies: Option<Vec<Value>>,
}

/// Clash writes numbers as either integers or strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Loose {
    Num(u64),
    Str(String),
}

impl Loose {
    fn to_port(&self) -> Option<u16> {
        match self {
            Loose::Num(n) => u16::try_from(*n).ok(),
            Loose::Str(s) => s.trim().parse().ok(),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Loose::Num(n) => n.to_string(),
            Loose::Str(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsOpts {
    path: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashShadowsocks {
    name: String,
    server: String,
    port: Loose,
    cipher: String,
    password: String,
    udp: Option<bool>,
    plugin: Option<String>,
    #[serde(default)]
    plugin_opts: BTreeMap<String, Value>,
    /// Pre-plugin obfs syntax
    obfs: Option<String>,
    obfs_host: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashShadowsocksr {
    name: String,
    server: String,
    port: Loose,
    cipher: String,
    password: String,
    protocol: String,
    obfs: String,
    #[serde(alias = "obfsparam", default)]
    obfs_param: String,
    #[serde(alias = "protocolparam", default)]
    protocol_param: String,
    udp: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashVmess {
    name: String,
    server: String,
    port: Loose,
    uuid: String,
    #[serde(rename = "alterId")]
    alter_id: Option<Loose>,
    #[serde(default)]
    cipher: String,
    network: Option<String>,
    #[serde(default)]
    tls: bool,
    servername: Option<String>,
    skip_cert_verify: Option<bool>,
    udp: Option<bool>,
    ws_opts: Option<WsOpts>,
    ws_path: Option<String>,
    ws_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashTrojan {
    name: String,
    server: String,
    port: Loose,
    password: String,
    sni: Option<String>,
    skip_cert_verify: Option<bool>,
    udp: Option<bool>,
    alpn: Option<Vec<String>>,
    network: Option<String>,
    ws_opts: Option<WsOpts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashSocks5 {
    name: String,
    server: String,
    port: Loose,
    username: Option<String>,
    password: Option<String>,
    tls: Option<bool>,
    sni: Option<String>,
    skip_cert_verify: Option<bool>,
    udp: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashHttp {
    name: String,
    server: String,
    port: Loose,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    tls: bool,
    sni: Option<String>,
    skip_cert_verify: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SnellObfsOpts {
    mode: Option<String>,
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClashSnell {
    name: String,
    server: String,
    port: Loose,
    psk: String,
    version: Option<Loose>,
    obfs_opts: Option<SnellObfsOpts>,
}

fn port_of(name: &str, port: &Loose) -> Result<u16, String> {
    port.to_port()
        .ok_or_else(|| format!("invalid port {:?} on {}", port, name))
}

fn yaml_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn shadowsocks(raw: ClashShadowsocks, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    let mut node = ShadowsocksNode {
        base: NodeBase::new(raw.name),
        hostname: raw.server,
        port,
        method: raw.cipher,
        password: raw.password,
        udp_relay: raw.udp.or(hints.udp_relay),
        ..Default::default()
    };

    let opt = |key: &str| raw.plugin_opts.get(key).and_then(yaml_text);
    match raw.plugin.as_deref() {
        Some("obfs") => {
            node.obfs = match opt("mode").as_deref() {
                Some("tls") => Some(ShadowsocksObfs::Tls),
                Some("http") => Some(ShadowsocksObfs::Http),
                other => return Err(format!("unsupported obfs mode {:?}", other)),
            };
            node.obfs_host = opt("host");
        }
        Some("v2ray-plugin") => {
            if opt("mode").as_deref().map_or(false, |m| m != "websocket") {
                return Err("v2ray-plugin only supports websocket mode".to_string());
            }
            let tls = raw
                .plugin_opts
                .get("tls")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            node.obfs = Some(if tls {
                ShadowsocksObfs::Wss
            } else {
                ShadowsocksObfs::Ws
            });
            node.obfs_host = opt("host");
            node.obfs_uri = opt("path");
            node.skip_cert_verify = raw
                .plugin_opts
                .get("skip-cert-verify")
                .and_then(Value::as_bool)
                .or(hints.skip_cert_verify);
            node.mux = raw.plugin_opts.get("mux").and_then(Value::as_bool);
            node.tls13 = if tls { hints.tls13 } else { None };
        }
        Some(other) => return Err(format!("unsupported plugin {}", other)),
        None => {
            node.obfs = match raw.obfs.as_deref() {
                None | Some("") => None,
                Some("tls") => Some(ShadowsocksObfs::Tls),
                Some("http") => Some(ShadowsocksObfs::Http),
                Some(other) => return Err(format!("unsupported obfs {}", other)),
            };
            node.obfs_host = raw.obfs_host;
        }
    }

    Ok(NodeConfig::Shadowsocks(node))
}

fn shadowsocksr(raw: ClashShadowsocksr, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    Ok(NodeConfig::Shadowsocksr(ShadowsocksrNode {
        base: NodeBase::new(raw.name),
        hostname: raw.server,
        port,
        method: raw.cipher,
        protocol: raw.protocol,
        obfs: raw.obfs,
        password: raw.password,
        obfsparam: raw.obfs_param,
        protoparam: raw.protocol_param,
        udp_relay: raw.udp.or(hints.udp_relay),
    }))
}

fn vmess(raw: ClashVmess, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    let network = match raw.network.as_deref() {
        None | Some("") | Some("tcp") => Network::Tcp,
        Some("ws") => Network::Ws,
        Some(other) => return Err(format!("unsupported network {}", other)),
    };

    let ws = raw.ws_opts.unwrap_or_default();
    let mut headers = raw.ws_headers.unwrap_or_default();
    headers.extend(ws.headers);
    let host = raw.servername.or_else(|| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("host"))
            .map(|(_, v)| v.clone())
    });
    headers.retain(|k, _| !k.eq_ignore_ascii_case("host"));

    let alter_id = match raw.alter_id {
        Some(ref id) if !hints.compatible_mode => id.to_text(),
        _ => "0".to_string(),
    };

    Ok(NodeConfig::Vmess(VmessNode {
        base: NodeBase::new(raw.name),
        hostname: raw.server,
        port,
        method: VmessMethod::from_name(&raw.cipher),
        uuid: raw.uuid,
        alter_id,
        network,
        tls: raw.tls,
        host,
        path: ws.path.or(raw.ws_path),
        udp_relay: raw.udp.or(hints.udp_relay),
        tls13: if raw.tls { hints.tls13 } else { None },
        skip_cert_verify: if raw.tls {
            raw.skip_cert_verify.or(hints.skip_cert_verify)
        } else {
            None
        },
        ws_headers: Some(headers).filter(|h| !h.is_empty()),
        server_cert_fingerprint_sha256: None,
    }))
}

fn trojan(raw: ClashTrojan, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    let network = match raw.network.as_deref() {
        None | Some("") | Some("tcp") => None,
        Some("ws") => Some(Network::Ws),
        Some(other) => return Err(format!("unsupported network {}", other)),
    };
    let ws = raw.ws_opts.unwrap_or_default();

    Ok(NodeConfig::Trojan(TrojanNode {
        base: NodeBase::new(raw.name),
        tls: TlsEndpoint {
            hostname: raw.server,
            port,
            tls13: hints.tls13,
            skip_cert_verify: raw.skip_cert_verify.or(hints.skip_cert_verify),
            sni: raw.sni,
            alpn: raw.alpn,
            server_cert_fingerprint_sha256: None,
        },
        password: raw.password,
        udp_relay: raw.udp.or(hints.udp_relay),
        network,
        ws_path: network.and(ws.path),
        ws_headers: Some(ws.headers).filter(|h| network.is_some() && !h.is_empty()),
    }))
}

fn socks5(raw: ClashSocks5, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    let tls = raw.tls.unwrap_or(false);
    Ok(NodeConfig::Socks5(Socks5Node {
        base: NodeBase::new(raw.name),
        hostname: raw.server,
        port,
        username: raw.username,
        password: raw.password,
        tls: raw.tls,
        tls13: if tls { hints.tls13 } else { None },
        skip_cert_verify: if tls {
            raw.skip_cert_verify.or(hints.skip_cert_verify)
        } else {
            None
        },
        udp_relay: raw.udp.or(hints.udp_relay),
        sni: raw.sni,
        ..Default::default()
    }))
}

fn http(raw: ClashHttp, hints: &ParseHints) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    if !raw.tls {
        return Ok(NodeConfig::Http(HttpNode {
            base: NodeBase::new(raw.name),
            hostname: raw.server,
            port,
            username: raw.username,
            password: raw.password,
        }));
    }

    Ok(NodeConfig::Https(HttpsNode {
        base: NodeBase::new(raw.name),
        tls: TlsEndpoint {
            hostname: raw.server,
            port,
            tls13: hints.tls13,
            skip_cert_verify: raw.skip_cert_verify.or(hints.skip_cert_verify),
            sni: raw.sni,
            ..Default::default()
        },
        username: raw.username,
        password: raw.password,
    }))
}

fn snell(raw: ClashSnell) -> Result<NodeConfig, String> {
    let port = port_of(&raw.name, &raw.port)?;
    let obfs = raw.obfs_opts.unwrap_or_default();
    Ok(NodeConfig::Snell(SnellNode {
        base: NodeBase::new(raw.name),
        hostname: raw.server,
        port,
        psk: raw.psk,
        obfs: obfs.mode,
        obfs_host: obfs.host,
        version: raw.version.map(|v| v.to_text()),
        reuse: None,
    }))
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, String> {
    serde_yaml::from_value(value).map_err(|e| e.to_string())
}

fn convert(item: Value, hints: &ParseHints) -> Result<NodeConfig, String> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing type".to_string())?
        .to_ascii_lowercase();

    match kind.as_str() {
        "ss" => shadowsocks(typed(item)?, hints),
        "ssr" => shadowsocksr(typed(item)?, hints),
        "vmess" => vmess(typed(item)?, hints),
        "trojan" => trojan(typed(item)?, hints),
        "socks5" => socks5(typed(item)?, hints),
        "http" => http(typed(item)?, hints),
        "snell" => snell(typed(item)?),
        other => Err(format!("unsupported type {}", other)),
    }
}

/// Parse a Clash YAML document into nodes
pub fn parse_clash_config(body: &str, hints: &ParseHints) -> Result<Vec<NodeConfig>, String> {
    let document: ClashDocument = serde_yaml::from_str(body).map_err(|e| e.to_string())?;
    let proxies = document
        .proxies
        .or(document.legacy_proxies)
        .ok_or_else(|| "no proxies found in clash config".to_string())?;

    Ok(proxies
        .into_iter()
        .filter_map(|item| {
            let name = item
                .get("name")
                .and_then(yaml_text)
                .unwrap_or_default();
            match convert(item, hints) {
                Ok(node) => Some(node),
                Err(reason) => {
                    warn!("Skipping clash proxy '{}': {}", name, reason);
                    None
                }
            }
        })
        .collect())
}
