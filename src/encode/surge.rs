//! Surge proxy lines
//!
//! Grammar: `<name> = <keyword>, <host>, <port>, key=value, ...`

use std::net::IpAddr;

use super::{
    format_extend_headers, quoted, EncodeError, EncodeOptions, LineBuilder, Rendered,
    TargetClient, OBFS_UA,
};
use crate::node::{
    HttpNode, HttpsNode, Network, NodeConfig, ShadowsocksNode, ShadowsocksrNode, SnellNode,
    Socks5Node, TrojanNode, TuicNode, VmessMethod, VmessNode,
};

pub fn render(node: &NodeConfig, options: &EncodeOptions) -> Result<Rendered, EncodeError> {
    match node {
        NodeConfig::Shadowsocks(n) => Ok(shadowsocks(n)),
        NodeConfig::Shadowsocksr(n) => shadowsocksr(n).map(Rendered::Line),
        NodeConfig::Vmess(n) => Ok(Rendered::Line(vmess(n, options))),
        NodeConfig::Trojan(n) => Ok(Rendered::Line(trojan(n))),
        NodeConfig::Socks5(n) => Ok(Rendered::Line(socks5(n))),
        NodeConfig::Snell(n) => Ok(Rendered::Line(snell(n))),
        NodeConfig::Tuic(n) => Ok(Rendered::Line(tuic(n))),
        NodeConfig::Http(n) => Ok(Rendered::Line(http(n))),
        NodeConfig::Https(n) => Ok(Rendered::Line(https(n))),
    }
}

fn shadowsocks(n: &ShadowsocksNode) -> Rendered {
    if let Some(obfs) = n.obfs.filter(|o| o.is_websocket()) {
        return Rendered::Unsupported(format!("v2ray-plugin obfs '{}'", obfs.as_str()));
    }

    let mut line = LineBuilder::new("ss");
    line.push(&n.hostname)
        .push(n.port)
        .kv("encrypt-method", &n.method)
        .kv("password", &n.password)
        .opt("udp-relay", n.udp_relay)
        .opt("obfs", n.obfs.map(|o| o.as_str()))
        .opt("obfs-host", n.obfs_host.as_deref())
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("test-url", n.base.test_url.as_deref())
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .shadow_tls(&n.base);

    Rendered::Line(line.finish(&n.base.node_name))
}

fn https(n: &HttpsNode) -> String {
    let mut line = LineBuilder::new("https");
    line.push(&n.tls.hostname)
        .push(n.tls.port)
        .push(&n.username)
        .push(&n.password)
        .opt("sni", n.tls.sni.as_deref())
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("tls13", n.tls.tls13)
        .opt("test-url", n.base.test_url.as_deref())
        .opt("skip-cert-verify", n.tls.skip_cert_verify)
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt(
            "server-cert-fingerprint-sha256",
            n.tls.server_cert_fingerprint_sha256.as_deref(),
        )
        .shadow_tls(&n.base);

    line.finish(&n.base.node_name)
}

fn http(n: &HttpNode) -> String {
    let mut line = LineBuilder::new("http");
    line.push(&n.hostname)
        .push(n.port)
        .push(&n.username)
        .push(&n.password)
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt("test-url", n.base.test_url.as_deref())
        .shadow_tls(&n.base);

    line.finish(&n.base.node_name)
}

fn snell(n: &SnellNode) -> String {
    let mut line = LineBuilder::new("snell");
    line.push(&n.hostname)
        .push(n.port)
        .kv("psk", &n.psk)
        .opt("obfs", n.obfs.as_deref())
        .opt("obfs-host", n.obfs_host.as_deref())
        .opt("version", n.version.as_deref())
        .opt("reuse", n.reuse)
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("test-url", n.base.test_url.as_deref())
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .shadow_tls(&n.base);

    line.finish(&n.base.node_name)
}

/// Shadowsocksr runs as an external process listening on a local port
fn shadowsocksr(n: &ShadowsocksrNode) -> Result<String, EncodeError> {
    let bin_path = n
        .base
        .bin_path
        .as_ref()
        .ok_or_else(|| EncodeError::MissingBinPath(n.base.node_name.clone()))?;

    let local_port = match n.base.local_port {
        Some(port) if port != 0 => port,
        _ => {
            return Err(EncodeError::MissingLocalPort {
                provider: n
                    .base
                    .provider
                    .clone()
                    .unwrap_or_else(|| "<unknown>".to_string()),
                node: n.base.node_name.clone(),
                target: TargetClient::Surge,
            })
        }
    };

    let port = n.port.to_string();
    let local = local_port.to_string();
    let mut args: Vec<&str> = vec![
        "-s",
        &n.hostname,
        "-p",
        &port,
        "-m",
        &n.method,
        "-o",
        &n.obfs,
        "-O",
        &n.protocol,
        "-k",
        &n.password,
        "-l",
        &local,
        "-b",
        "127.0.0.1",
    ];
    if !n.protoparam.is_empty() {
        args.extend(["-G", n.protoparam.as_str()]);
    }
    if !n.obfsparam.is_empty() {
        args.extend(["-g", n.obfsparam.as_str()]);
    }

    let mut parts = vec![
        "external".to_string(),
        format!("exec = {}", quoted(&bin_path.to_string_lossy())),
    ];
    parts.extend(args.iter().map(|arg| format!("args = {}", quoted(arg))));
    parts.push(format!("local-port = {}", local_port));

    let mut addresses: Vec<IpAddr> = Vec::new();
    let literal = n.hostname.parse::<IpAddr>().ok();
    for ip in n.base.hostname_ip.iter().copied().chain(literal) {
        if !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }
    parts.extend(addresses.iter().map(|ip| format!("addresses = {}", ip)));

    Ok(format!("{} = {}", n.base.node_name, parts.join(", ")))
}

fn vmess(n: &VmessNode, options: &EncodeOptions) -> String {
    let mut line = LineBuilder::new("vmess");
    line.push(&n.hostname)
        .push(n.port)
        .kv("username", &n.uuid);

    if matches!(n.method, VmessMethod::Aes128Gcm | VmessMethod::Chacha20IetfPoly1305) {
        line.kv("encrypt-method", n.method.as_str());
    }

    if n.network == Network::Ws {
        let ws_host = n.host.as_deref().unwrap_or(&n.hostname);
        // The host field always wins over a host entry in the header map
        let mut headers: Vec<(&str, &str)> = vec![("host", ws_host), ("user-agent", OBFS_UA)];
        if let Some(ref extra) = n.ws_headers {
            headers.extend(
                extra
                    .iter()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case("host"))
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }

        line.kv("ws", true)
            .kv("ws-path", n.path.as_deref().unwrap_or("/"))
            .kv("ws-headers", quoted(&format_extend_headers(headers)));
    }

    if n.tls {
        line.kv("tls", true)
            .opt("tls13", n.tls13)
            .opt("skip-cert-verify", n.skip_cert_verify)
            .opt(
                "server-cert-fingerprint-sha256",
                n.server_cert_fingerprint_sha256.as_deref(),
            )
            .opt("sni", n.host.as_deref());
    }

    line.opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt("test-url", n.base.test_url.as_deref())
        .kv("vmess-aead", options.vmess_aead)
        .shadow_tls(&n.base);

    line.finish(&n.base.node_name)
}

fn trojan(n: &TrojanNode) -> String {
    let mut line = LineBuilder::new("trojan");
    line.push(&n.tls.hostname)
        .push(n.tls.port)
        .kv("password", &n.password)
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("sni", n.tls.sni.as_deref())
        .opt("tls13", n.tls.tls13)
        .opt("test-url", n.base.test_url.as_deref())
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt("skip-cert-verify", n.tls.skip_cert_verify)
        .opt(
            "server-cert-fingerprint-sha256",
            n.tls.server_cert_fingerprint_sha256.as_deref(),
        )
        .shadow_tls(&n.base);

    if n.network == Some(Network::Ws) {
        line.kv("ws", true)
            .kv("ws-path", n.ws_path.as_deref().unwrap_or("/"));

        if let Some(ref headers) = n.ws_headers {
            let joined = format_extend_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            line.kv("ws-headers", quoted(&joined));
        }
    }

    line.finish(&n.base.node_name)
}

fn socks5(n: &Socks5Node) -> String {
    let tls = n.tls == Some(true);
    let mut line = LineBuilder::new(if tls { "socks5-tls" } else { "socks5" });
    line.push(&n.hostname)
        .push(n.port)
        .opt("username", n.username.as_deref())
        .opt("password", n.password.as_deref())
        .opt("sni", n.sni.as_deref())
        .opt("tfo", n.base.tfo)
        .opt("mptcp", n.base.mptcp)
        .opt("tls13", n.tls13)
        .opt("udp-relay", n.udp_relay)
        .opt("test-url", n.base.test_url.as_deref())
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt(
            "server-cert-fingerprint-sha256",
            n.server_cert_fingerprint_sha256.as_deref(),
        )
        .shadow_tls(&n.base);

    if tls {
        line.opt("skip-cert-verify", n.skip_cert_verify)
            .opt("client-cert", n.client_cert.as_deref());
    }

    line.finish(&n.base.node_name)
}

fn tuic(n: &TuicNode) -> String {
    let mut line = LineBuilder::new("tuic");
    line.push(&n.tls.hostname)
        .push(n.tls.port)
        .kv("token", &n.token)
        .opt("sni", n.tls.sni.as_deref())
        .opt("underlying-proxy", n.base.underlying_proxy.as_deref())
        .opt("test-url", n.base.test_url.as_deref())
        .opt("skip-cert-verify", n.tls.skip_cert_verify)
        .opt(
            "server-cert-fingerprint-sha256",
            n.tls.server_cert_fingerprint_sha256.as_deref(),
        )
        .opt("alpn", n.tls.alpn.as_ref().map(|alpn| alpn.join(",")));

    line.finish(&n.base.node_name)
}
