//! PagePull main entry point
//!
//! This is the command-line interface for the PagePull website mirror.

use anyhow::Context;
use clap::Parser;
use pagepull::config::{load_config, Config};
use pagepull::output::print_summary;
use pagepull::schedule::{format_interval, parse_interval, run_scheduled};
use pagepull::Mirror;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PagePull: polite, incremental website mirroring
///
/// PagePull downloads a site and the assets its pages reference, rewrites
/// every reference into a relative local path, and re-validates stored files
/// with conditional requests on later runs.
#[derive(Parser, Debug)]
#[command(name = "pagepull")]
#[command(version)]
#[command(about = "Polite, incremental website mirroring", long_about = None)]
struct Cli {
    /// Seed URL (overrides [site] url)
    #[arg(value_name = "URL")]
    url: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<u32>,

    /// Base delay before each request, in milliseconds
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,

    /// Aggregate request rate across all workers (requests per second)
    #[arg(long, value_name = "RPS")]
    rate: Option<f64>,

    /// Randomized delays and rotating browser user agents
    #[arg(long)]
    stealth: bool,

    /// Ignore robots.txt
    #[arg(long)]
    no_robots: bool,

    /// Do not send conditional requests based on the previous run
    #[arg(long)]
    no_incremental: bool,

    /// Delete the output directory and manifest before running
    #[arg(long)]
    fresh: bool,

    /// Only keep these asset types (comma separated: css,js,image,font,media,other)
    #[arg(long, value_delimiter = ',', value_name = "TYPES")]
    include: Vec<String>,

    /// Never keep these asset types (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "TYPES")]
    exclude: Vec<String>,

    /// Keep only assets whose URL matches this regex (repeatable)
    #[arg(long, value_name = "REGEX")]
    include_pattern: Vec<String>,

    /// Skip resources whose URL matches this regex (repeatable)
    #[arg(long, value_name = "REGEX")]
    exclude_pattern: Vec<String>,

    /// Minimum asset size in KB
    #[arg(long, value_name = "KB")]
    min_asset_size: Option<u64>,

    /// Maximum asset size in KB
    #[arg(long, value_name = "KB")]
    max_asset_size: Option<u64>,

    /// Maximum link depth for pages
    #[arg(long)]
    max_depth: Option<u32>,

    /// Seed for the stealth random source
    #[arg(long)]
    seed: Option<u64>,

    /// Re-run on an interval such as 30m, 6h or 1d
    #[arg(long, value_name = "INTERVAL")]
    interval: Option<String>,

    /// Stop after this many scheduled runs
    #[arg(long, requires = "interval")]
    max_runs: Option<u32>,

    /// Validate the configuration and print it without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = build_config(&cli)?;
    let mirror = Mirror::new(config).context("Invalid configuration")?;

    if cli.dry_run {
        handle_dry_run(&mirror);
        return Ok(());
    }

    // Ctrl-C stops the frontier; in-flight fetches finish and the manifest stays consistent
    let cancel = mirror.cancel_handle();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight requests");
                cancel.cancel();
            }
        }
    });

    match cli.interval.as_deref() {
        Some(interval) => {
            let interval = parse_interval(interval)?;
            tracing::info!("Running every {}", format_interval(interval));
            let summaries = run_scheduled(&mirror, interval, cli.max_runs, &cancel).await;
            if let Some(last) = summaries.last() {
                if !cli.quiet {
                    print_summary(last);
                }
            }
        }
        None => {
            let summary = mirror.run_once().await.context("Mirror run failed")?;
            if !cli.quiet {
                print_summary(&summary);
            }
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pagepull=info,warn"),
            1 => EnvFilter::new("pagepull=debug,info"),
            2 => EnvFilter::new("pagepull=trace,debug"),
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

/// Loads the config file, if any, and applies command-line overrides
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(url) = &cli.url {
        config.site.url = url.clone();
    }
    if let Some(output) = &cli.output {
        config.output.directory = output.clone();
    }

    let crawler = &mut config.crawler;
    if let Some(workers) = cli.workers {
        crawler.workers = workers;
    }
    if let Some(delay) = cli.delay_ms {
        crawler.delay_ms = delay;
    }
    if let Some(rate) = cli.rate {
        crawler.requests_per_second = rate;
    }
    if cli.stealth {
        crawler.stealth = true;
    }
    if cli.no_robots {
        crawler.respect_robots = false;
    }
    if cli.no_incremental {
        crawler.incremental = false;
    }
    if cli.max_depth.is_some() {
        crawler.max_depth = cli.max_depth;
    }
    if cli.seed.is_some() {
        crawler.random_seed = cli.seed;
    }

    let filter = &mut config.filter;
    if !cli.include.is_empty() {
        filter.include_types = cli.include.clone();
    }
    if !cli.exclude.is_empty() {
        filter.exclude_types = cli.exclude.clone();
    }
    filter.include_patterns.extend(cli.include_pattern.iter().cloned());
    filter.exclude_patterns.extend(cli.exclude_pattern.iter().cloned());
    if cli.min_asset_size.is_some() {
        filter.min_asset_size_kb = cli.min_asset_size;
    }
    if cli.max_asset_size.is_some() {
        filter.max_asset_size_kb = cli.max_asset_size;
    }

    if cli.fresh {
        config.output.clean = true;
    }

    Ok(config)
}

/// Handles the --dry-run mode: shows what would be mirrored
fn handle_dry_run(mirror: &Mirror) {
    let config = mirror.config();
    println!("=== PagePull Dry Run ===\n");

    println!("Site:");
    println!("  Seed: {}", mirror.seed());
    println!("  Output: {}", mirror.output_dir().display());

    println!("\nCrawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  Delay: {}ms", config.crawler.delay_ms);
    println!("  Rate: {} requests/sec", config.crawler.requests_per_second);
    println!("  Stealth: {}", config.crawler.stealth);
    println!("  Robots.txt: {}", config.crawler.respect_robots);
    println!("  Incremental: {}", config.crawler.incremental);
    match config.crawler.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }

    println!("\nFilter:");
    println!("  Include types: {:?}", config.filter.include_types);
    println!("  Exclude types: {:?}", config.filter.exclude_types);
    println!("  Include patterns: {:?}", config.filter.include_patterns);
    println!("  Exclude patterns: {:?}", config.filter.exclude_patterns);
    println!(
        "  Size bounds: {:?} KB .. {:?} KB",
        config.filter.min_asset_size_kb, config.filter.max_asset_size_kb
    );

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("\n✓ Configuration is valid");
}
