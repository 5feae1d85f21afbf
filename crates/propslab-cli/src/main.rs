use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use propslab_client::{BrowserFetcher, CachedFetcher, HttpFetcher, IdentityPool, SelectorExtractor};
use propslab_core::schema::{load_schema_file, SchemaResolver};
use propslab_core::{
    Collector, ExtractionSchema, Fetcher, NullFetcher, RunConfig, RunOutcome, Target,
};

#[derive(Parser)]
#[command(name = "propslab", version, about = "Multi-strategy web data collection pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect records from a list of targets
    Collect {
        /// JSON file with the target list
        #[arg(short, long)]
        targets: PathBuf,

        /// Directory holding extraction schema files
        #[arg(short, long, default_value = "schemas")]
        schemas: PathBuf,

        /// Output dataset path (CSV by default)
        #[arg(short, long)]
        out: PathBuf,

        /// Write the dataset as JSON lines instead of CSV
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Write the per-target failure report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Retry budget per strategy for transient failures
        #[arg(long, default_value_t = 2)]
        retries: u32,

        /// Maximum requests per second across both strategies
        #[arg(long, default_value_t = 4)]
        rate: u32,

        /// Concurrent lightweight HTTP fetches
        #[arg(long, default_value_t = 8)]
        http_concurrency: usize,

        /// Concurrent browser tabs
        #[arg(long, default_value_t = 2)]
        browser_concurrency: usize,

        /// Per-fetch timeout for the HTTP strategy, in seconds
        #[arg(long, default_value_t = 30)]
        http_timeout: u64,

        /// Per-fetch timeout for the browser strategy, in seconds;
        /// rendering needs more headroom than a plain GET
        #[arg(long, default_value_t = 45)]
        browser_timeout: u64,

        /// Skip the browser strategy entirely; browser-hinted targets
        /// fail over to plain HTTP
        #[arg(long, default_value_t = false)]
        no_browser: bool,

        /// Seed for identity rotation and backoff jitter, for
        /// replayable runs
        #[arg(long)]
        seed: Option<u64>,

        /// CSS selector the browser waits for before reading the DOM
        #[arg(long)]
        wait_selector: Option<String>,
    },

    /// Validate an extraction schema file
    Check {
        /// Path to the schema JSON file
        #[arg(short, long)]
        schema: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("propslab=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            targets,
            schemas,
            out,
            json,
            report,
            retries,
            rate,
            http_concurrency,
            browser_concurrency,
            http_timeout,
            browser_timeout,
            no_browser,
            seed,
            wait_selector,
        } => {
            let opts = CollectOpts {
                targets,
                schemas,
                out,
                json,
                report,
                retries,
                rate,
                http_concurrency,
                browser_concurrency,
                http_timeout,
                browser_timeout,
                no_browser,
                seed,
                wait_selector,
            };
            cmd_collect(opts).await?;
        }
        Commands::Check { schema } => cmd_check(&schema)?,
    }

    Ok(())
}

struct CollectOpts {
    targets: PathBuf,
    schemas: PathBuf,
    out: PathBuf,
    json: bool,
    report: Option<PathBuf>,
    retries: u32,
    rate: u32,
    http_concurrency: usize,
    browser_concurrency: usize,
    http_timeout: u64,
    browser_timeout: u64,
    no_browser: bool,
    seed: Option<u64>,
    wait_selector: Option<String>,
}

async fn cmd_collect(opts: CollectOpts) -> Result<()> {
    let targets = load_targets(&opts.targets)?;
    let schemas = resolve_schemas(&targets, &opts.schemas)?;

    let config = RunConfig::default()
        .with_max_retries(opts.retries)
        .with_rate_limit(opts.rate, Duration::from_secs(1))
        .with_concurrency(opts.http_concurrency, opts.browser_concurrency)
        .with_timeouts(
            Duration::from_secs(opts.http_timeout),
            Duration::from_secs(opts.browser_timeout),
        );

    let identities = match opts.seed {
        Some(seed) => IdentityPool::seeded(seed),
        None => IdentityPool::new(),
    };
    let http = CachedFetcher::new(
        HttpFetcher::with_timeout(identities.clone(), config.http_timeout)
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to build HTTP fetcher")?,
        256,
    );

    // Ctrl-C ends the run gracefully: in-flight work gets the grace
    // period, partial results are still written.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight work");
            trigger.cancel();
        }
    });

    let outcome = if opts.no_browser {
        run_collection(http, NullFetcher, schemas, config, targets, cancel).await
    } else {
        // A browser that won't launch is fatal: silently degrading
        // every browser-hinted target to HTTP is --no-browser's job.
        let mut browser = BrowserFetcher::launch(identities, config.browser_timeout)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .context("failed to launch browser (use --no-browser to run without it)")?;
        if let Some(selector) = opts.wait_selector {
            browser = browser.with_wait_selector(selector);
        }
        let outcome =
            run_collection(http, browser.clone(), schemas, config, targets, cancel).await;
        browser.shutdown().await;
        outcome
    };

    write_outputs(&outcome, &opts.out, opts.json, opts.report.as_deref())?;

    println!(
        "collected {} records, {} targets failed{}",
        outcome.dataset.len(),
        outcome.failures.len(),
        if outcome.cancelled {
            " (run cancelled)"
        } else {
            ""
        }
    );
    Ok(())
}

async fn run_collection<B>(
    http: CachedFetcher<HttpFetcher>,
    browser: B,
    schemas: HashMap<String, ExtractionSchema>,
    config: RunConfig,
    targets: Vec<Target>,
    cancel: CancellationToken,
) -> RunOutcome
where
    B: Fetcher + 'static,
{
    let collector = Collector::new(http, browser, SelectorExtractor::new(), schemas, config);
    collector.collect_with_cancel(targets, cancel).await
}

fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read targets file: {}", path.display()))?;
    let targets: Vec<Target> =
        serde_json::from_str(&raw).context("invalid JSON in targets file")?;
    if targets.is_empty() {
        tracing::warn!("targets file is empty, nothing to collect");
    }
    Ok(targets)
}

/// Resolve every distinct schema reference in the target list up
/// front, so a broken schema fails the run before any fetch happens.
fn resolve_schemas(
    targets: &[Target],
    schemas_dir: &Path,
) -> Result<HashMap<String, ExtractionSchema>> {
    let resolver = SchemaResolver::new(schemas_dir);
    let mut schemas = HashMap::new();
    for target in targets {
        if schemas.contains_key(&target.schema) {
            continue;
        }
        let schema = resolver
            .resolve(&target.schema)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("schema '{}' failed to load", target.schema))?;
        schemas.insert(target.schema.clone(), schema);
    }
    Ok(schemas)
}

fn write_outputs(
    outcome: &RunOutcome,
    out: &Path,
    json: bool,
    report: Option<&Path>,
) -> Result<()> {
    let file = std::fs::File::create(out)
        .with_context(|| format!("failed to create output file: {}", out.display()))?;
    if json || out.extension().is_some_and(|e| e == "jsonl") {
        outcome
            .dataset
            .write_json_lines(file)
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        outcome
            .dataset
            .write_csv(file)
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    tracing::info!(path = %out.display(), records = outcome.dataset.len(), "dataset written");

    if let Some(report_path) = report {
        let file = std::fs::File::create(report_path)
            .with_context(|| format!("failed to create report file: {}", report_path.display()))?;
        outcome.write_report(file).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(path = %report_path.display(), failures = outcome.failures.len(), "failure report written");
    }
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let schema = load_schema_file(path).map_err(|e| anyhow::anyhow!(e))?;
    println!(
        "schema '{}' is valid: {} fields, identity over [{}]",
        schema.name,
        schema.fields.len(),
        schema.identity_fields().join(", ")
    );
    Ok(())
}
