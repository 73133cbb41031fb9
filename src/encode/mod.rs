//! Protocol encoders
//!
//! Every target client gets a module with one rendering rule per protocol.
//! Rules return [`Rendered::Unsupported`] for nodes the client cannot
//! express; those nodes are dropped with a warning and the batch continues.
//! Missing values that the caller's setup should have provided fail the
//! whole call with an [`EncodeError`].

pub mod surfboard;
pub mod surge;

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;
use crate::node::{apply_filter, NodeBase, NodeConfig, NodeFilter};

/// User agent sent in websocket headers of obfuscated transports
pub const OBFS_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";

/// Downstream proxy client whose grammar is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TargetClient {
    Surge,
    Surfboard,
}

impl fmt::Display for TargetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetClient::Surge => f.write_str("Surge"),
            TargetClient::Surfboard => f.write_str("Surfboard"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("An explicit node filter is required to encode nodes")]
    MissingFilter,

    #[error("Node '{0}' needs a Shadowsocksr executable; set bin-path.shadowsocksr in the config")]
    MissingBinPath(String),

    #[error("start-port must be set on provider '{provider}' to generate Shadowsocksr node '{node}' for {target}")]
    MissingLocalPort {
        provider: String,
        node: String,
        target: TargetClient,
    },
}

/// A node dropped because the target cannot represent it
#[derive(Debug, Clone, PartialEq)]
pub struct UnsupportedNode {
    pub node_name: String,
    pub target: TargetClient,
    pub reason: String,
}

impl fmt::Display for UnsupportedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cannot express node '{}' ({}), node is omitted",
            self.target, self.node_name, self.reason
        )
    }
}

/// Outcome of rendering a single node
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Line(String),
    Unsupported(String),
}

/// Encoder switches that apply to a whole target client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Value of the `vmess-aead` key on every VMess line
    pub vmess_aead: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { vmess_aead: true }
    }
}

impl EncodeOptions {
    pub fn for_target(config: &AppConfig, target: TargetClient) -> Self {
        match target {
            TargetClient::Surge => Self {
                vmess_aead: config.surge_config.vmess_aead,
            },
            TargetClient::Surfboard => Self {
                vmess_aead: config.surfboard_config.vmess_aead,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeOutput {
    pub lines: Vec<String>,
    pub warnings: Vec<UnsupportedNode>,
}

impl EncodeOutput {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

// ============================================================================
// Line assembly
// ============================================================================

/// Builds `<name> = <keyword>, <field>, ..., key=value` lines
#[derive(Debug)]
pub(crate) struct LineBuilder {
    parts: Vec<String>,
}

impl LineBuilder {
    pub(crate) fn new(keyword: &str) -> Self {
        Self {
            parts: vec![keyword.to_string()],
        }
    }

    /// Positional value
    pub(crate) fn push(&mut self, value: impl fmt::Display) -> &mut Self {
        self.parts.push(value.to_string());
        self
    }

    pub(crate) fn kv(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.parts.push(format!("{}={}", key, value));
        self
    }

    /// `key=value` only when the value is present
    pub(crate) fn opt<T: fmt::Display>(&mut self, key: &str, value: Option<T>) -> &mut Self {
        if let Some(v) = value {
            self.kv(key, v);
        }
        self
    }

    /// Shadow-TLS overlay: password, then the optional SNI
    pub(crate) fn shadow_tls(&mut self, base: &NodeBase) -> &mut Self {
        if let Some(ref overlay) = base.shadow_tls {
            self.kv("shadow-tls-password", &overlay.password);
            self.opt("shadow-tls-sni", overlay.sni.as_deref());
        }
        self
    }

    pub(crate) fn finish(&self, name: &str) -> String {
        format!("{} = {}", name, self.parts.join(", "))
    }
}

/// Join headers as `key:value|key:value`
pub(crate) fn format_extend_headers<'a, I>(headers: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("|")
}

/// Quote a value the way the client config parser expects
pub(crate) fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

// ============================================================================
// Entry points
// ============================================================================

/// Render a single node for the target client
pub fn render_node(
    node: &NodeConfig,
    target: TargetClient,
    options: &EncodeOptions,
) -> Result<Rendered, EncodeError> {
    match target {
        TargetClient::Surge => surge::render(node, options),
        TargetClient::Surfboard => surfboard::render(node, options),
    }
}

/// Filter and render nodes, keeping the dropped ones as warnings.
///
/// The filter is mandatory here: pass [`NodeFilter::all`] to encode every
/// node. A structural error on any node aborts the call.
pub fn encode_nodes(
    nodes: &[NodeConfig],
    filter: Option<&NodeFilter>,
    target: TargetClient,
    options: &EncodeOptions,
) -> Result<EncodeOutput, EncodeError> {
    let filter = filter.ok_or(EncodeError::MissingFilter)?;
    let mut output = EncodeOutput::default();

    for node in apply_filter(nodes, Some(filter)) {
        match render_node(&node, target, options)? {
            Rendered::Line(line) => output.lines.push(line),
            Rendered::Unsupported(reason) => {
                let skipped = UnsupportedNode {
                    node_name: node.name().to_string(),
                    target,
                    reason,
                };
                warn!("{}", skipped);
                output.warnings.push(skipped);
            }
        }
    }

    Ok(output)
}

/// Filter and render nodes into newline separated text
pub fn encode(
    nodes: &[NodeConfig],
    filter: Option<&NodeFilter>,
    target: TargetClient,
    options: &EncodeOptions,
) -> Result<String, EncodeError> {
    encode_nodes(nodes, filter, target, options).map(|out| out.text())
}
