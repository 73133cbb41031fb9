//! Provider definitions
//!
//! Definitions are validated when they are constructed: an unknown kind, a
//! port outside 1024-65535, a missing URL or node list, or a malformed
//! filter expression is rejected before any network traffic happens.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::filter::{self as filters, FilterRuleError};
use crate::node::NodeFilter;

pub const MIN_START_PORT: u32 = 1024;
pub const MAX_START_PORT: u32 = 65535;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("Unsupported provider type: {0}")]
    UnknownKind(String),

    #[error("Provider definition has no type")]
    MissingKind,

    #[error("start-port must be between 1024 and 65535, got {0}")]
    InvalidStartPort(u32),

    #[error("Provider type '{0}' requires a url")]
    MissingUrl(ProviderKind),

    #[error("Provider type 'custom' requires a node-list")]
    MissingNodeList,

    #[error("Invalid provider definition: {0}")]
    Parse(String),
}

/// Supported provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Clash,
    Custom,
    ShadowsocksSubscribe,
    ShadowsocksrSubscribe,
    ShadowsocksJsonSubscribe,
    #[serde(rename = "v2rayn_subscribe")]
    V2rayNSubscribe,
    Ssd,
    Trojan,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 8] = [
        ProviderKind::Clash,
        ProviderKind::Custom,
        ProviderKind::ShadowsocksSubscribe,
        ProviderKind::ShadowsocksrSubscribe,
        ProviderKind::ShadowsocksJsonSubscribe,
        ProviderKind::V2rayNSubscribe,
        ProviderKind::Ssd,
        ProviderKind::Trojan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Clash => "clash",
            ProviderKind::Custom => "custom",
            ProviderKind::ShadowsocksSubscribe => "shadowsocks_subscribe",
            ProviderKind::ShadowsocksrSubscribe => "shadowsocksr_subscribe",
            ProviderKind::ShadowsocksJsonSubscribe => "shadowsocks_json_subscribe",
            ProviderKind::V2rayNSubscribe => "v2rayn_subscribe",
            ProviderKind::Ssd => "ssd",
            ProviderKind::Trojan => "trojan",
        }
    }

    /// Whether node lists come from a remote subscription URL
    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Custom)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConstructionError::UnknownKind(s.to_string()))
    }
}

/// `relay-url`: either a flag or a URL template
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RelayUrl {
    Enabled(bool),
    Template(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RawRenameRule {
    pattern: String,
    #[serde(default)]
    replacement: String,
}

/// Regex replacement applied to node names
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRenameRule")]
pub struct RenameRule {
    pattern: Regex,
    replacement: String,
}

impl TryFrom<RawRenameRule> for RenameRule {
    type Error = FilterRuleError;

    fn try_from(raw: RawRenameRule) -> Result<Self, Self::Error> {
        let pattern = Regex::new(&raw.pattern)
            .map_err(|e| FilterRuleError::InvalidRegexp(raw.pattern.clone(), e.to_string()))?;
        Ok(Self {
            pattern,
            replacement: raw.replacement,
        })
    }
}

impl RenameRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self, FilterRuleError> {
        RenameRule::try_from(RawRenameRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        })
    }

    pub fn apply(&self, name: &str) -> String {
        self.pattern
            .replace_all(name, self.replacement.as_str())
            .into_owned()
    }
}

/// Validated provider definition. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub url: Option<String>,
    /// Inline nodes of a `custom` provider
    pub node_list: Option<Vec<serde_json::Value>>,
    pub udp_relay: Option<bool>,
    pub tls13: Option<bool>,
    pub skip_cert_verify: Option<bool>,
    /// Skip fields some clients reject, such as VMess alterId
    #[serde(default)]
    pub compatible_mode: bool,
    pub node_filter: Option<NodeFilter>,
    pub netflix_filter: Option<NodeFilter>,
    pub youtube_premium_filter: Option<NodeFilter>,
    #[serde(default)]
    pub custom_filters: BTreeMap<String, NodeFilter>,
    #[serde(default)]
    pub add_flag: bool,
    #[serde(default)]
    pub remove_existing_flag: bool,
    pub tfo: Option<bool>,
    pub mptcp: Option<bool>,
    pub underlying_proxy: Option<String>,
    pub start_port: Option<u32>,
    #[serde(default)]
    pub rename_node: Vec<RenameRule>,
    pub relay_url: Option<RelayUrl>,
    pub request_user_agent: Option<String>,
}

impl ProviderConfig {
    /// Parse and validate a raw definition
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConstructionError> {
        // Check the kind first so an unknown kind gets its own error
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ConstructionError::MissingKind)?;
        kind.parse::<ProviderKind>()?;

        let config: ProviderConfig =
            serde_json::from_value(value).map_err(|e| ConstructionError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConstructionError> {
        if let Some(port) = self.start_port {
            if !(MIN_START_PORT..=MAX_START_PORT).contains(&port) {
                return Err(ConstructionError::InvalidStartPort(port));
            }
        }

        if self.kind.is_remote() && self.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConstructionError::MissingUrl(self.kind));
        }

        if self.kind == ProviderKind::Custom && self.node_list.is_none() {
            return Err(ConstructionError::MissingNodeList);
        }

        Ok(())
    }

    /// First allocated local port, already range checked
    pub fn start_port(&self) -> Option<u16> {
        self.start_port.and_then(|p| u16::try_from(p).ok())
    }

    /// Look up a named filter: custom filters first, then the Netflix and
    /// YouTube Premium slots, then the built-in presets
    pub fn filter(&self, name: &str) -> Option<NodeFilter> {
        if let Some(filter) = self.custom_filters.get(name) {
            return Some(filter.clone());
        }

        match name {
            "netflix" => Some(
                self.netflix_filter
                    .clone()
                    .unwrap_or_else(filters::netflix_filter),
            ),
            "youtube-premium" => Some(
                self.youtube_premium_filter
                    .clone()
                    .unwrap_or_else(filters::youtube_premium_filter),
            ),
            other => filters::preset(other).ok(),
        }
    }
}
