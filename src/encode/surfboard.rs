//! Surfboard proxy lines
//!
//! Surfboard reads the Surge line grammar but knows fewer protocols and
//! fewer tuning keys. Nodes it cannot express are reported as unsupported.

use super::{format_extend_headers, EncodeOptions, EncodeError, LineBuilder, Rendered};
use crate::node::{
    HttpNode, HttpsNode, Network, NodeBase, NodeConfig, ShadowsocksNode, Socks5Node, TrojanNode,
    VmessMethod, VmessNode,
};

pub fn render(node: &NodeConfig, options: &EncodeOptions) -> Result<Rendered, EncodeError> {
    if node.base().shadow_tls.is_some() {
        return Ok(Rendered::Unsupported("shadow-tls overlay".to_string()));
    }

    let rendered = match node {
        NodeConfig::Shadowsocks(n) => shadowsocks(n),
        NodeConfig::Vmess(n) => Rendered::Line(vmess(n, options)),
        NodeConfig::Trojan(n) => Rendered::Line(trojan(n)),
        NodeConfig::Socks5(n) => Rendered::Line(socks5(n)),
        NodeConfig::Http(n) => Rendered::Line(http(n)),
        NodeConfig::Https(n) => Rendered::Line(https(n)),
        NodeConfig::Shadowsocksr(_) | NodeConfig::Snell(_) | NodeConfig::Tuic(_) => {
            Rendered::Unsupported(format!("protocol {}", node.node_type()))
        }
    };

    Ok(rendered)
}

fn with_test_url<'a>(line: &'a mut LineBuilder, base: &NodeBase) -> &'a mut LineBuilder {
    line.opt("test-url", base.test_url.as_deref())
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
        .opt("obfs", n.obfs.map(|o| o.as_str()))
        .opt("obfs-host", n.obfs_host.as_deref())
        .opt("udp-relay", n.udp_relay);
    with_test_url(&mut line, &n.base);

    Rendered::Line(line.finish(&n.base.node_name))
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
        let mut headers = vec![("host", ws_host)];
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
            .kv("ws-headers", format_extend_headers(headers));
    }

    if n.tls {
        line.kv("tls", true)
            .opt("skip-cert-verify", n.skip_cert_verify)
            .opt("sni", n.host.as_deref());
    }

    line.opt("udp-relay", n.udp_relay)
        .kv("vmess-aead", options.vmess_aead);
    with_test_url(&mut line, &n.base);

    line.finish(&n.base.node_name)
}

fn trojan(n: &TrojanNode) -> String {
    let mut line = LineBuilder::new("trojan");
    line.push(&n.tls.hostname)
        .push(n.tls.port)
        .kv("password", &n.password)
        .opt("sni", n.tls.sni.as_deref())
        .opt("skip-cert-verify", n.tls.skip_cert_verify)
        .opt("udp-relay", n.udp_relay);

    if n.network == Some(Network::Ws) {
        line.kv("ws", true)
            .kv("ws-path", n.ws_path.as_deref().unwrap_or("/"));
        if let Some(ref headers) = n.ws_headers {
            line.kv(
                "ws-headers",
                format_extend_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            );
        }
    }
    with_test_url(&mut line, &n.base);

    line.finish(&n.base.node_name)
}

fn socks5(n: &Socks5Node) -> String {
    let tls = n.tls == Some(true);
    let mut line = LineBuilder::new(if tls { "socks5-tls" } else { "socks5" });
    line.push(&n.hostname).push(n.port);

    // Credentials are positional and come as a pair
    if let (Some(user), Some(pass)) = (n.username.as_deref(), n.password.as_deref()) {
        line.push(user).push(pass);
    }
    if tls {
        line.opt("sni", n.sni.as_deref())
            .opt("skip-cert-verify", n.skip_cert_verify);
    }
    line.opt("udp-relay", n.udp_relay);
    with_test_url(&mut line, &n.base);

    line.finish(&n.base.node_name)
}

fn http(n: &HttpNode) -> String {
    let mut line = LineBuilder::new("http");
    line.push(&n.hostname)
        .push(n.port)
        .push(&n.username)
        .push(&n.password);
    with_test_url(&mut line, &n.base);

    line.finish(&n.base.node_name)
}

fn https(n: &HttpsNode) -> String {
    let mut line = LineBuilder::new("https");
    line.push(&n.tls.hostname)
        .push(n.tls.port)
        .push(&n.username)
        .push(&n.password)
        .opt("sni", n.tls.sni.as_deref())
        .opt("skip-cert-verify", n.tls.skip_cert_verify);
    with_test_url(&mut line, &n.base);

    line.finish(&n.base.node_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ShadowTls, ShadowsocksObfs, SnellNode, TlsEndpoint, TuicNode};

    fn line(node: NodeConfig) -> String {
        match render(&node, &EncodeOptions::default()).unwrap() {
            Rendered::Line(l) => l,
            Rendered::Unsupported(reason) => panic!("unexpected drop: {}", reason),
        }
    }

    fn ss() -> ShadowsocksNode {
        ShadowsocksNode {
            base: NodeBase::new("ss"),
            hostname: "ss.example.com".to_string(),
            port: 443,
            method: "aes-128-gcm".to_string(),
            password: "pw".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_shadowsocks_obfs() {
        let mut node = ss();
        node.obfs = Some(ShadowsocksObfs::Http);
        node.obfs_host = Some("bing.com".to_string());
        node.udp_relay = Some(true);
        node.base.tfo = Some(true);

        assert_eq!(
            line(NodeConfig::Shadowsocks(node)),
            "ss = ss, ss.example.com, 443, encrypt-method=aes-128-gcm, password=pw, obfs=http, \
             obfs-host=bing.com, udp-relay=true"
        );
    }

    #[test]
    fn test_vmess_ws_tls() {
        let node = VmessNode {
            base: NodeBase::new("vmess"),
            hostname: "v.example.com".to_string(),
            port: 443,
            uuid: "uuid".to_string(),
            network: Network::Ws,
            tls: true,
            path: Some("/ray".to_string()),
            ..Default::default()
        };

        assert_eq!(
            line(NodeConfig::Vmess(node)),
            "vmess = vmess, v.example.com, 443, username=uuid, ws=true, ws-path=/ray, \
             ws-headers=host:v.example.com, tls=true, vmess-aead=true"
        );
    }

    #[test]
    fn test_vmess_aead_follows_options() {
        let node = VmessNode {
            base: NodeBase::new("vmess"),
            hostname: "v.example.com".to_string(),
            port: 443,
            uuid: "uuid".to_string(),
            ..Default::default()
        };
        let rendered = render(&NodeConfig::Vmess(node), &EncodeOptions { vmess_aead: false }).unwrap();
        assert_eq!(
            rendered,
            Rendered::Line("vmess = vmess, v.example.com, 443, username=uuid, vmess-aead=false".to_string())
        );
    }

    #[test]
    fn test_trojan() {
        let node = TrojanNode {
            base: NodeBase::new("trojan"),
            tls: TlsEndpoint {
                hostname: "t.example.com".to_string(),
                port: 443,
                sni: Some("sni.example.com".to_string()),
                skip_cert_verify: Some(false),
                ..Default::default()
            },
            password: "pw".to_string(),
            ..Default::default()
        };

        assert_eq!(
            line(NodeConfig::Trojan(node)),
            "trojan = trojan, t.example.com, 443, password=pw, sni=sni.example.com, \
             skip-cert-verify=false"
        );
    }

    #[test]
    fn test_socks5_credentials_are_positional() {
        let node = Socks5Node {
            base: NodeBase::new("socks"),
            hostname: "1.2.3.4".to_string(),
            port: 1080,
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            tls: Some(true),
            sni: Some("s.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            line(NodeConfig::Socks5(node)),
            "socks = socks5-tls, 1.2.3.4, 1080, u, p, sni=s.example.com"
        );
    }

    #[test]
    fn test_http_and_https() {
        let node = HttpNode {
            base: NodeBase::new("http"),
            hostname: "h.example.com".to_string(),
            port: 80,
            username: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(line(NodeConfig::Http(node)), "http = http, h.example.com, 80, u, p");

        let node = HttpsNode {
            base: NodeBase::new("https"),
            tls: TlsEndpoint {
                hostname: "h.example.com".to_string(),
                port: 443,
                ..Default::default()
            },
            username: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(line(NodeConfig::Https(node)), "https = https, h.example.com, 443, u, p");
    }

    #[test]
    fn test_unsupported_protocols() {
        let snell = NodeConfig::Snell(SnellNode {
            base: NodeBase::new("snell"),
            hostname: "n.example.com".to_string(),
            port: 1,
            psk: "psk".to_string(),
            ..Default::default()
        });
        let tuic = NodeConfig::Tuic(TuicNode {
            base: NodeBase::new("tuic"),
            token: "t".to_string(),
            ..Default::default()
        });

        for node in [snell, tuic] {
            let rendered = render(&node, &EncodeOptions::default()).unwrap();
            assert!(matches!(rendered, Rendered::Unsupported(_)));
        }
    }

    #[test]
    fn test_shadow_tls_is_unsupported() {
        let mut node = ss();
        node.base.shadow_tls = Some(ShadowTls {
            password: "st".to_string(),
            sni: None,
        });
        let rendered = render(&NodeConfig::Shadowsocks(node), &EncodeOptions::default()).unwrap();
        assert_eq!(rendered, Rendered::Unsupported("shadow-tls overlay".to_string()));
    }
}
