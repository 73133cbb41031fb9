use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use subforge::cache::build_cache;
use subforge::cli::{format_dry_run, format_usage, Args};
use subforge::config::load_config_file;
use subforge::encode::{encode_nodes, EncodeOptions};
use subforge::node::NodeFilter;
use subforge::provider::{build_provider, get_provider_nodes, ReqwestFetcher, ResourceLoader};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env before the config so environment overrides apply
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config_file(&args.config_file).with_context(|| {
        format!("Failed to load config file {}", args.config_file.display())
    })?;

    // Dry-run mode: print provider info and exit
    if args.dry_run {
        let provider = config.provider_config(&args.provider)?;
        println!("{}", format_dry_run(&config, &provider, &args));
        return Ok(());
    }

    let config = Arc::new(config);
    let cache = build_cache(&config.cache).await?;
    let fetcher = Arc::new(ReqwestFetcher::new(Duration::from_secs(args.timeout))?);
    let loader = Arc::new(ResourceLoader::new(
        cache,
        fetcher,
        Duration::from_secs(config.provider_cache_maxage_secs),
    ));

    let mut provider = build_provider(&args.provider, &config, loader)?;
    let user_agent = args.user_agent.as_deref();

    let filter = match args.filter {
        Some(ref name) => provider
            .base()
            .config
            .filter(name)
            .ok_or_else(|| anyhow!("Provider '{}' has no filter named '{}'", args.provider, name))?,
        None => NodeFilter::all(),
    };

    let nodes = get_provider_nodes(provider.as_mut(), user_agent).await?;
    info!("Rendering {} nodes for {}", nodes.len(), args.target);

    let options = EncodeOptions::for_target(&config, args.target);
    let output = encode_nodes(&nodes, Some(&filter), args.target, &options)?;
    println!("{}", output.text());

    if !output.warnings.is_empty() {
        info!("{} nodes skipped for {}", output.warnings.len(), args.target);
    }

    if args.usage {
        if provider.supports_subscription_userinfo() {
            let usage = provider.get_subscription_userinfo(user_agent).await?;
            eprintln!("{}", format_usage(provider.name(), usage.as_ref()));
        } else {
            eprintln!("{}: usage is not available for {} providers", provider.name(), provider.kind());
        }
    }

    Ok(())
}
