//! School-Sweep main entry point
//!
//! This is the command-line interface for the School-Sweep directory crawler.

use anyhow::Context;
use clap::Parser;
use school_sweep::config::{load_config_with_hash, Config};
use school_sweep::output::{print_report, WriterSink};
use school_sweep::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// School-Sweep: a change-aware school directory crawler
///
/// School-Sweep crawls a division's paginated school list, follows every school to its
/// detail page for the address, and prints the records as a JSON array. Divisions whose
/// list page is unchanged since the last run are served from the cache.
#[derive(Parser, Debug)]
#[command(name = "school-sweep")]
#[command(version = "1.0.0")]
#[command(about = "A change-aware school directory crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Division code to scrape; repeat to scrape several concurrently
    #[arg(
        short,
        long = "division",
        value_name = "CODE",
        required_unless_present_any = ["dry_run", "show_cache"]
    )]
    divisions: Vec<u32>,

    /// Crawl even when the cached fingerprint still matches
    #[arg(long)]
    force_refresh: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "show_cache")]
    dry_run: bool,

    /// List cached divisions and exit
    #[arg(long, conflicts_with = "dry_run")]
    show_cache: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &cli.divisions)?;
    } else if cli.show_cache {
        handle_show_cache(&config)?;
    } else {
        handle_scrape(config, &cli.divisions, cli.force_refresh, cli.quiet).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so stdout carries only the record stream.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("school_sweep=info,warn"),
            1 => EnvFilter::new("school_sweep=debug,info"),
            2 => EnvFilter::new("school_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, divisions: &[u32]) -> anyhow::Result<()> {
    println!("=== School-Sweep Dry Run ===\n");

    println!("Site:");
    println!("  Base URL: {}", config.site.base_url);
    println!("  List path: {}", config.site.list_path);
    println!("  Address selector: {}", config.site.address_selector);

    println!("\nCrawler Configuration:");
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!(
        "  Max requests per minute: {}",
        config.crawler.max_requests_per_minute
    );
    println!("  Max retries: {}", config.crawler.max_request_retries);
    println!(
        "  Politeness delay: {}-{}ms",
        config.crawler.politeness_delay_min_ms, config.crawler.politeness_delay_max_ms
    );

    let tiers = config.effective_proxy_tiers();
    println!("\nProxy Tiers ({}):", tiers.len());
    for (index, tier) in tiers.iter().enumerate() {
        if tier.endpoints.is_empty() {
            println!("  {}: direct", index);
        } else {
            println!("  {}: {} endpoints", index, tier.endpoints.len());
        }
    }

    println!("\nCache:");
    println!("  Strategy: {:?}", config.cache.strategy);
    println!("  Database: {}", config.cache.database_path);

    println!("\n✓ Configuration is valid");
    for code in divisions {
        let url = school_sweep::url::division_list_url(&config.site, *code)?;
        println!("✓ Would scrape division {} from {}", code, url);
    }

    Ok(())
}

/// Handles the --show-cache mode: lists cached divisions
fn handle_show_cache(config: &Config) -> anyhow::Result<()> {
    use school_sweep::storage::SqliteStorage;
    use std::path::Path;

    println!("Database: {}\n", config.cache.database_path);

    let storage = SqliteStorage::new(Path::new(&config.cache.database_path))
        .with_context(|| format!("Failed to open cache database {}", config.cache.database_path))?;
    let entries = storage.list_cache_entries()?;

    if entries.is_empty() {
        println!("No cached divisions");
        return Ok(());
    }

    for entry in entries {
        println!(
            "  division {:>4}: {:>4} records, updated {}, fingerprint {}",
            entry.division_code,
            entry.data.len(),
            entry.timestamp.to_rfc3339(),
            entry.fingerprint
        );
    }

    Ok(())
}

/// Handles the main scrape operation
///
/// A single division streams straight to stdout. Several divisions run concurrently on
/// one shared crawler and are printed one JSON array per line, in argument order.
async fn handle_scrape(
    config: Config,
    divisions: &[u32],
    force_refresh: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config)?;

    if let [code] = divisions {
        let sink = Box::new(WriterSink::new(std::io::stdout()));
        match orchestrator.scrape(*code, force_refresh, sink).await {
            Ok(outcome) => {
                if !quiet {
                    print_report(&outcome.report);
                }
                return Ok(());
            }
            Err(e) => {
                tracing::error!("Scrape failed: {}", e);
                return Err(e.into());
            }
        }
    }

    let orchestrator = Arc::new(orchestrator);
    let handles: Vec<_> = divisions
        .iter()
        .map(|&code| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.scrape_to_vec(code, force_refresh).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await?);
    }

    let mut failed = 0;
    for (code, result) in divisions.iter().zip(results) {
        match result {
            Ok((records, outcome)) => {
                println!("{}", serde_json::to_string(&records)?);
                if !quiet {
                    print_report(&outcome.report);
                }
            }
            Err(e) => {
                tracing::error!("Scrape of division {} failed: {}", code, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} divisions failed", failed, divisions.len());
    }

    Ok(())
}
