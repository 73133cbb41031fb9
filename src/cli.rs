use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{AppConfig, CacheType};
use crate::encode::TargetClient;
use crate::provider::{ProviderConfig, SubscriptionUserinfo};

#[derive(Parser, Debug)]
#[command(name = "subforge")]
#[command(about = "Render a provider's proxy nodes as Surge or Surfboard lines")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file (JSON or JSONC)
    #[arg(required = true)]
    pub config_file: PathBuf,

    /// Provider to render, as named in the `providers` table
    #[arg(short, long)]
    pub provider: String,

    /// Client whose configuration syntax is produced
    #[arg(short, long, value_enum, default_value_t = TargetClient::Surge)]
    pub target: TargetClient,

    /// Named filter: a custom filter of the provider or a built-in preset
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Prefix for the user agent sent to the subscription server
    #[arg(long, value_name = "UA", env = "SUBFORGE_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Print the subscription usage reported by the provider
    #[arg(long)]
    pub usage: bool,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Validate the config and show the provider without fetching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Path to a .env file, e.g. for SUBFORGE_PROVIDER_CACHE_MAXAGE
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Describe what a run would do without touching the network
pub fn format_dry_run(config: &AppConfig, provider: &ProviderConfig, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "subforge v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Config: {}\n\n", args.config_file.display()));

    output.push_str(&format!("Providers ({}):\n", config.providers.len()));
    for (name, raw) in &config.providers {
        let kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or("?");
        let marker = if *name == args.provider { "*" } else { "-" };
        output.push_str(&format!("  {} {} [{}]\n", marker, name, kind));
    }
    output.push('\n');

    output.push_str(&format!("Provider: {}\n", args.provider));
    output.push_str(&format!("  Type: {}\n", provider.kind));
    if let Some(ref url) = provider.url {
        output.push_str(&format!("  URL: {}\n", url));
    }
    if let Some(ref nodes) = provider.node_list {
        output.push_str(&format!("  Inline nodes: {}\n", nodes.len()));
    }
    if let Some(port) = provider.start_port() {
        output.push_str(&format!("  Start port: {}\n", port));
    }
    if !provider.custom_filters.is_empty() {
        let names: Vec<&str> = provider.custom_filters.keys().map(String::as_str).collect();
        output.push_str(&format!("  Custom filters: {}\n", names.join(", ")));
    }
    output.push('\n');

    let cache = match config.cache.cache_type {
        CacheType::Default => "in-process".to_string(),
        CacheType::Redis => format!(
            "redis ({})",
            config.cache.redis_url.as_deref().unwrap_or_default()
        ),
    };
    output.push_str(&format!(
        "Cache: {}, max-age {}s\n",
        cache, config.provider_cache_maxage_secs
    ));
    output.push_str(&format!("Target: {}\n", args.target));
    if let Some(ref filter) = args.filter {
        output.push_str(&format!("Filter: {}\n", filter));
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Remove --dry-run to fetch and render nodes.\n");

    output
}

/// One line per subscription usage report
pub fn format_usage(provider: &str, info: Option<&SubscriptionUserinfo>) -> String {
    match info {
        Some(info) => format!("{}: {}", provider, info.summary()),
        None => format!("{}: no usage reported", provider),
    }
}
