//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner crawler.

use anyhow::Context;
use clap::Parser;
use gleaner::config::{load_config_with_hash, Config};
use gleaner::crawler::run_crawl;
use gleaner::output::{
    generate_markdown_summary, load_persisted_state, print_persisted_state, print_run_stats,
};
use gleaner::storage::CheckpointStore;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Gleaner: resilient entity discovery and identity harvesting
///
/// Gleaner discovers entities from a rate-limited remote source, harvests
/// the identities associated with each one, and exports them in fixed-size
/// chunks. Progress is checkpointed, so an interrupted run resumes where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "Resilient entity discovery and identity harvesting", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard the checkpoint and start at the first phase (dedup and export state are kept)
    #[arg(long)]
    fresh: bool,

    /// Validate config and show the crawl plan without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show persisted dedup, export and checkpoint state and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config);
    } else {
        handle_crawl(config, config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gleaner=info,warn"),
            1 => EnvFilter::new("gleaner=debug,info"),
            2 => EnvFilter::new("gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &Config) {
    println!("=== Gleaner Dry Run ===\n");

    println!("Discovery:");
    println!("  Search terms ({}):", config.crawler.search_terms.len());
    for term in &config.crawler.search_terms {
        println!("    - {}", term);
    }
    println!("  Pages per search term: {}", config.crawler.search_pages);
    println!("  Pages per listing: {}", config.crawler.listing_pages);
    println!("  Related entities explored: {}", config.crawler.related_limit);
    println!(
        "  Accept: adult-only={}, include-restricted={}",
        config.discovery.adult_only, config.discovery.include_restricted
    );

    println!("\nHarvest:");
    println!("  Batch size: {}", config.crawler.batch_size);
    println!("  Posts per entity: {}", config.crawler.posts_per_entity);
    println!("  Time filters: {}", config.crawler.time_filters.join(", "));
    if config.crawler.rotate_after_posts > 0 {
        println!(
            "  Proactive rotation every {} posts",
            config.crawler.rotate_after_posts
        );
    }

    println!("\nRecovery:");
    println!(
        "  Rotations: listing {}, fallback {}, item {}, discovery {}",
        config.recovery.listing_rotations,
        config.recovery.fallback_rotations,
        config.recovery.item_rotations,
        config.recovery.discovery_rotations
    );
    println!(
        "  Max failed rotations in a row: {}",
        config.recovery.max_failed_rotations
    );
    println!(
        "  Transient retries: {} ({}-{}ms backoff)",
        config.recovery.transient_retries,
        config.recovery.backoff_min_ms,
        config.recovery.backoff_max_ms
    );

    println!("\nNetwork:");
    println!("  Source: {}", config.source.base_url);
    println!("  Proxy: {}", config.rotator.proxy_url);
    println!("  Address check: {}", config.rotator.ip_check_url);

    println!("\nExport:");
    println!("  Chunk size: {}", config.export.chunk_size);
    println!("  Threshold: {}", config.export.threshold);
    match &config.delivery {
        Some(delivery) if delivery.is_complete() => println!(
            "  Delivery: {}@{}:{}{}",
            delivery.user, delivery.host, delivery.port, delivery.remote_dir
        ),
        _ => println!("  Delivery: disabled"),
    }

    println!("\nOutput:");
    println!("  Data directory: {}", config.output.data_dir);
    println!("  Summary: {}", config.output.summary_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows persisted state
fn handle_stats(config: &Config) {
    println!("Data directory: {}\n", config.output.data_dir);
    let state = load_persisted_state(
        Path::new(&config.output.data_dir),
        config.dedup.persist_interval,
    );
    print_persisted_state(&state);
}

/// Cancels `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::warn!("Shutdown requested, finishing the current item");
        token.cancel();
    });
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    let data_dir = PathBuf::from(&config.output.data_dir);
    let summary_path = PathBuf::from(&config.output.summary_path);

    if fresh {
        tracing::info!("Starting fresh crawl (checkpoint discarded)");
        CheckpointStore::new(&data_dir)
            .delete()
            .context("failed to delete checkpoint")?;
    } else {
        tracing::info!("Starting crawl (will resume from checkpoint if present)");
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let stats = match run_crawl(config, config_hash.clone(), cancel).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Crawl could not start: {}", e);
            return Err(e.into());
        }
    };

    print_run_stats(&stats);

    if let Err(e) = generate_markdown_summary(&stats, &config_hash, &summary_path) {
        tracing::error!("Failed to write summary: {}", e);
    } else {
        tracing::info!("Summary written to {}", summary_path.display());
    }

    Ok(())
}
