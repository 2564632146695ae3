//! scholar-citations - Google Scholar citation snapshots for static sites
//!
//! ## Usage
//!
//! ### Refresh the site snapshot
//! ```bash
//! scholar-citations update --site-root .
//! ```
//!
//! ### Look up one publication
//! ```bash
//! scholar-citations fetch qc6CJjYAAAAJ qc6CJjYAAAAJ:u5HHmVD_uO8C
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use scholar_citations::config::SiteLayout;
use scholar_citations::cookies::CookieJar;
use scholar_citations::fetcher::{CitationOutput, Fetcher};
use scholar_citations::gscholar::ProfileScraper;
use scholar_citations::reconciler::Reconciler;
use scholar_citations::snapshot::SnapshotStore;
use scholar_citations::transport::{self, ProxyStrategy, TransportOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Google Scholar citation snapshots for static sites
#[derive(Parser)]
#[command(name = "scholar-citations")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Proxy URL to try before direct access (repeatable, e.g. socks5h://127.0.0.1:1080)
    #[arg(long = "proxy", global = true)]
    proxies: Vec<String>,

    /// Also try the local Tor SOCKS proxy
    #[arg(long, global = true)]
    tor: bool,

    /// Accept proxies without a test request
    #[arg(long, global = true)]
    no_probe: bool,

    /// Mirror site URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Cookie jar file (default: ~/.scholar_citations_cookies.json)
    #[arg(long = "cookies", global = true, value_name = "FILE")]
    cookie_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the citation count of one publication as JSON
    Fetch {
        /// Google Scholar author ID
        author_id: String,

        /// Google Scholar publication ID (USER:PUBID)
        publication_id: String,

        /// Skip the random pause before the request
        #[arg(long)]
        no_delay: bool,
    },

    /// Refresh the citation snapshot of a Jekyll site
    Update {
        /// Site root containing _config.yml and _data/
        #[arg(long, default_value = ".")]
        site_root: PathBuf,

        /// Snapshot file (default: <site-root>/_data/citations.yml)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the cookie jar sent with Scholar requests
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Show cookie file path
    Path,
    /// Clear stored cookies
    Clear,
    /// Replace the jar with the Google cookies of a browser export
    Import {
        /// JSON file, e.g. [{"name":"NID","value":"xxx","domain":".google.com"}]
        file: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is reserved for command output
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let options = transport_options(&cli);

    match cli.command {
        Commands::Fetch {
            author_id,
            publication_id,
            no_delay,
        } => run_fetch(&options, &author_id, &publication_id, no_delay).await,
        Commands::Update { site_root, output } => run_update(&options, site_root, output).await,
        Commands::Cookies { action } => handle_cookies(cli.cookie_file.as_deref(), action),
    }
}

fn transport_options(cli: &Cli) -> TransportOptions {
    let mut strategies: Vec<ProxyStrategy> = cli.proxies.iter().map(ProxyStrategy::explicit).collect();
    if cli.tor {
        strategies.push(ProxyStrategy::tor());
    }

    TransportOptions {
        strategies,
        base_url: cli.base_url.clone(),
        probe: !cli.no_probe,
        cookie_file: cli.cookie_file.clone(),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_fetch(
    options: &TransportOptions,
    author_id: &str,
    publication_id: &str,
    no_delay: bool,
) -> Result<ExitCode> {
    let session = match transport::establish(options).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Cannot reach Google Scholar");
            return Ok(ExitCode::FAILURE);
        }
    };

    if !no_delay {
        // Spread out back-to-back invocations from site builds
        let pause = rand::thread_rng().gen_range(1.0..3.0);
        tokio::time::sleep(Duration::from_secs_f64(pause)).await;
    }

    let fetcher = Fetcher::new(ProfileScraper::new(session));
    let lookup = fetcher.fetch(author_id, publication_id).await;

    let output = serde_json::to_string(&CitationOutput::from(&lookup))
        .context("Failed to encode citation output")?;
    println!("{}", output);

    Ok(ExitCode::SUCCESS)
}

async fn run_update(options: &TransportOptions, site_root: PathBuf, output: Option<PathBuf>) -> Result<ExitCode> {
    let mut site = SiteLayout::new(site_root);
    if let Some(path) = output {
        site = site.with_output(path);
    }

    let session = transport::establish(options)
        .await
        .context("Failed to set up HTTP session")?;

    let store = SnapshotStore::new(site.snapshot_path());
    let reconciler = Reconciler::new(ProfileScraper::new(session), store);

    let outcome = reconciler.run(&site).await.context("Citation update aborted")?;

    info!(
        site = %site.root().display(),
        author = %outcome.snapshot.metadata.scholar_userid,
        fetched = outcome.fetched,
        attempts = outcome.attempts,
        updated = outcome.stats.updated,
        skipped = outcome.stats.skipped,
        papers = outcome.snapshot.papers.len(),
        persisted = outcome.persisted,
        "Citation update finished"
    );

    Ok(ExitCode::SUCCESS)
}

fn handle_cookies(jar_path: Option<&Path>, action: CookieAction) -> Result<ExitCode> {
    let jar = CookieJar::locate(jar_path)?;

    match action {
        CookieAction::Path => {
            println!("{}", jar.path().display());
        }
        CookieAction::Clear => {
            if jar.clear()? {
                println!("Cookies cleared.");
            } else {
                println!("No cookie jar at {}", jar.path().display());
            }
        }
        CookieAction::Import { file } => {
            let kept = jar
                .import(&file)
                .with_context(|| format!("Failed to import cookies from {}", file.display()))?;
            println!("Saved {} Google cookies to {}", kept, jar.path().display());
        }
    }

    Ok(ExitCode::SUCCESS)
}
