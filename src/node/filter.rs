//! Node filters
//!
//! A filter either tests one node at a time ([`NodeFilter::Predicate`]) or
//! receives the whole list and returns a new, possibly reordered one
//! ([`NodeFilter::Sorted`]). Filters never modify the nodes they are given.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{NodeConfig, NodeType};

pub type PredicateFn = dyn Fn(&NodeConfig) -> bool + Send + Sync;
pub type SortFn = dyn Fn(&[NodeConfig]) -> Vec<NodeConfig> + Send + Sync;

#[derive(Error, Debug, PartialEq)]
pub enum FilterRuleError {
    #[error("Invalid filter regexp '{0}': {1}")]
    InvalidRegexp(String, String),

    #[error("Unknown filter preset: {0}")]
    UnknownPreset(String),

    #[error("Sorted filters cannot be merged")]
    SortedInMerge,

    #[error("Empty flag keyword")]
    EmptyKeyword,
}

/// Closed set of node filters
#[derive(Clone, Deserialize)]
#[serde(try_from = "FilterRule")]
pub enum NodeFilter {
    Predicate(Arc<PredicateFn>),
    Sorted {
        filter: Arc<SortFn>,
        supports_sort: bool,
    },
}

impl fmt::Debug for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeFilter::Predicate(_) => f.write_str("NodeFilter::Predicate"),
            NodeFilter::Sorted { supports_sort, .. } => f
                .debug_struct("NodeFilter::Sorted")
                .field("supports_sort", supports_sort)
                .finish(),
        }
    }
}

impl NodeFilter {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&NodeConfig) -> bool + Send + Sync + 'static,
    {
        NodeFilter::Predicate(Arc::new(f))
    }

    pub fn sorted<F>(f: F) -> Self
    where
        F: Fn(&[NodeConfig]) -> Vec<NodeConfig> + Send + Sync + 'static,
    {
        NodeFilter::Sorted {
            filter: Arc::new(f),
            supports_sort: true,
        }
    }

    /// Select every node
    pub fn all() -> Self {
        NodeFilter::predicate(|_| true)
    }

    /// Whether the filter may reorder nodes
    pub fn supports_sort(&self) -> bool {
        match self {
            NodeFilter::Predicate(_) => false,
            NodeFilter::Sorted { supports_sort, .. } => *supports_sort,
        }
    }

    /// Apply the filter to a node list
    pub fn apply(&self, nodes: &[NodeConfig]) -> Vec<NodeConfig> {
        match self {
            NodeFilter::Predicate(f) => nodes.iter().filter(|n| f(n)).cloned().collect(),
            NodeFilter::Sorted { filter, .. } => filter(nodes),
        }
    }
}

/// Declarative filter forms accepted in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterRule {
    /// Node name contains any of the keywords
    Keywords(Vec<String>),
    /// Node name contains all of the keywords
    StrictKeywords(Vec<String>),
    DiscardKeywords(Vec<String>),
    Regexp(String),
    DiscardRegexp(String),
    /// Keep nodes matching a keyword, ordered by keyword position
    SortedKeywords(Vec<String>),
    Providers(Vec<String>),
    Protocols(Vec<NodeType>),
    Preset(String),
}

impl TryFrom<FilterRule> for NodeFilter {
    type Error = FilterRuleError;

    fn try_from(rule: FilterRule) -> Result<Self, Self::Error> {
        match rule {
            FilterRule::Keywords(k) => Ok(use_keywords(k, false)),
            FilterRule::StrictKeywords(k) => Ok(use_keywords(k, true)),
            FilterRule::DiscardKeywords(k) => Ok(discard_keywords(k, false)),
            FilterRule::Regexp(r) => use_regexp(&r),
            FilterRule::DiscardRegexp(r) => discard_regexp(&r),
            FilterRule::SortedKeywords(k) => Ok(use_sorted_keywords(k)),
            FilterRule::Providers(p) => Ok(use_providers(p)),
            FilterRule::Protocols(p) => Ok(use_protocols(p)),
            FilterRule::Preset(name) => preset(&name),
        }
    }
}

// ============================================================================
// Pure filter application
// ============================================================================

/// Apply an optional filter to a node list.
///
/// Disabled nodes are always dropped. A missing filter selects every
/// remaining node; callers that require an explicit filter check for it
/// before calling this.
pub fn apply_filter(nodes: &[NodeConfig], filter: Option<&NodeFilter>) -> Vec<NodeConfig> {
    let enabled: Vec<NodeConfig> = nodes.iter().filter(|n| n.is_enabled()).cloned().collect();

    match filter {
        None => enabled,
        Some(f) => f.apply(&enabled),
    }
}

// ============================================================================
// Filter constructors
// ============================================================================

fn compile(pattern: &str) -> Result<Regex, FilterRuleError> {
    Regex::new(pattern).map_err(|e| FilterRuleError::InvalidRegexp(pattern.to_string(), e.to_string()))
}

/// Keep nodes whose name contains the keywords (any of them, or all when strict)
pub fn use_keywords(keywords: Vec<String>, strict: bool) -> NodeFilter {
    NodeFilter::predicate(move |node| {
        let name = node.name();
        if strict {
            keywords.iter().all(|k| name.contains(k.as_str()))
        } else {
            keywords.iter().any(|k| name.contains(k.as_str()))
        }
    })
}

/// Drop nodes whose name contains the keywords (any of them, or all when strict)
pub fn discard_keywords(keywords: Vec<String>, strict: bool) -> NodeFilter {
    NodeFilter::predicate(move |node| {
        let name = node.name();
        if strict {
            !keywords.iter().all(|k| name.contains(k.as_str()))
        } else {
            !keywords.iter().any(|k| name.contains(k.as_str()))
        }
    })
}

pub fn use_regexp(pattern: &str) -> Result<NodeFilter, FilterRuleError> {
    let re = compile(pattern)?;
    Ok(NodeFilter::predicate(move |node| re.is_match(node.name())))
}

pub fn discard_regexp(pattern: &str) -> Result<NodeFilter, FilterRuleError> {
    let re = compile(pattern)?;
    Ok(NodeFilter::predicate(move |node| !re.is_match(node.name())))
}

/// Keep nodes owned by one of the named providers
pub fn use_providers(providers: Vec<String>) -> NodeFilter {
    NodeFilter::predicate(move |node| {
        node.base()
            .provider
            .as_ref()
            .map(|p| providers.iter().any(|name| name == p))
            .unwrap_or(false)
    })
}

pub fn use_protocols(protocols: Vec<NodeType>) -> NodeFilter {
    NodeFilter::predicate(move |node| protocols.contains(&node.node_type()))
}

/// Keep nodes matching any keyword, grouped in keyword order.
///
/// A node matching several keywords appears once, under the first keyword
/// it matches.
pub fn use_sorted_keywords(keywords: Vec<String>) -> NodeFilter {
    NodeFilter::sorted(move |nodes| {
        let mut taken = vec![false; nodes.len()];
        let mut result = Vec::new();

        for keyword in &keywords {
            for (idx, node) in nodes.iter().enumerate() {
                if !taken[idx] && node.name().contains(keyword.as_str()) {
                    taken[idx] = true;
                    result.push(node.clone());
                }
            }
        }

        result
    })
}

/// Combine predicate filters with AND (strict) or OR
pub fn merge_filters(filters: Vec<NodeFilter>, strict: bool) -> Result<NodeFilter, FilterRuleError> {
    let mut predicates = Vec::with_capacity(filters.len());
    for filter in filters {
        match filter {
            NodeFilter::Predicate(f) => predicates.push(f),
            NodeFilter::Sorted { .. } => return Err(FilterRuleError::SortedInMerge),
        }
    }

    Ok(NodeFilter::predicate(move |node| {
        if strict {
            predicates.iter().all(|f| f(node))
        } else {
            predicates.iter().any(|f| f(node))
        }
    }))
}

fn keywords(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn hk_filter() -> NodeFilter {
    case_insensitive_keywords(&["港", "HK", "Hong Kong", "🇭🇰"])
}

pub fn tw_filter() -> NodeFilter {
    case_insensitive_keywords(&["台", "TW", "Taiwan", "🇹🇼"])
}

pub fn us_filter() -> NodeFilter {
    case_insensitive_keywords(&["美", "US", "United States", "🇺🇸"])
}

pub fn japan_filter() -> NodeFilter {
    case_insensitive_keywords(&["日本", "JP", "Japan", "🇯🇵"])
}

pub fn korea_filter() -> NodeFilter {
    case_insensitive_keywords(&["韩", "韓", "KR", "Korea", "🇰🇷"])
}

pub fn singapore_filter() -> NodeFilter {
    case_insensitive_keywords(&["新加坡", "狮城", "SG", "Singapore", "🇸🇬"])
}

pub fn netflix_filter() -> NodeFilter {
    case_insensitive_keywords(&["netflix", "nf", "hkbn", "hkt", "hgc", "nbu"])
}

pub fn youtube_premium_filter() -> NodeFilter {
    case_insensitive_keywords(&[
        "日本", "美国", "美國", "韩国", "韓國", "🇯🇵", "🇺🇸", "🇰🇷", "JP", "US", "KR",
    ])
}

fn case_insensitive_keywords(list: &[&str]) -> NodeFilter {
    let lowered: Vec<String> = keywords(list).into_iter().map(|k| k.to_lowercase()).collect();
    NodeFilter::predicate(move |node| {
        let name = node.name().to_lowercase();
        lowered.iter().any(|k| name.contains(k.as_str()))
    })
}

/// Look up a named preset filter
pub fn preset(name: &str) -> Result<NodeFilter, FilterRuleError> {
    match name {
        "hk" => Ok(hk_filter()),
        "tw" => Ok(tw_filter()),
        "us" => Ok(us_filter()),
        "japan" => Ok(japan_filter()),
        "korea" => Ok(korea_filter()),
        "singapore" => Ok(singapore_filter()),
        "netflix" => Ok(netflix_filter()),
        "youtube-premium" => Ok(youtube_premium_filter()),
        other => Err(FilterRuleError::UnknownPreset(other.to_string())),
    }
}
