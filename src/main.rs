use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plugwire::{Config, ModuleHost, ServiceCollection};

/// Plugwire - load module units and run their lifecycle
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Module root, skipping directory discovery
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Boot, print the loaded modules and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // RUST_LOG wins over --debug when set
    let installed = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to set global default subscriber")?;

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default()?,
    };
    if let Some(root) = args.root {
        config.module_root = Some(root);
    }

    let mut host = ModuleHost::new(&config);
    let provider = host
        .boot(&config, ServiceCollection::new())
        .context("Failed to boot modules")?;

    for instance in host.registry().iter() {
        println!("{:<24} {}", instance.unit(), instance.type_name());
    }
    println!(
        "{} modules, {} services",
        host.registry().len(),
        provider.len()
    );

    let stats = host.chain().stats();
    info!(
        "Resolution: {} local, {} fallback, {} cached, {} missed, {} skipped",
        stats.locality_hits, stats.fallback_hits, stats.cache_hits, stats.misses, stats.skipped
    );

    if args.check {
        return Ok(());
    }

    // Dependencies can still be resolved lazily, so keep the host alive
    info!("Modules running; press Ctrl-C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    Ok(())
}
