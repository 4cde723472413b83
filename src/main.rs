use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricefeed::browser::WebDriverPage;
use pricefeed::config::{Config, SiteConfig};
use pricefeed::migrate::read_catalog;
use pricefeed::rpc::{self, AppState};
use pricefeed::types::{ConflictKey, Retailer};
use pricefeed::{
    BatchUpserter, CrawlMode, Crawler, MemoryStore, Migrator, PriceSearchService, PriceStore,
    RestStore, SubmissionGuard,
};

const STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "pricefeed",
    version,
    about = "Community price aggregation: scrape, import, search and submit"
)]
struct Cli {
    /// TOML configuration file; stock settings are used when omitted.
    #[arg(long, short, global = true, env = "PRICEFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Where prices are persisted.
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::Rest)]
    store: StoreKind,

    /// Base URL of the hosted price store.
    #[arg(long, global = true, env = "PRICEFEED_STORE_URL")]
    store_url: Option<String>,

    /// Service key for the hosted price store.
    #[arg(long, global = true, env = "PRICEFEED_STORE_KEY", hide_env_values = true)]
    store_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Rest,
    Memory,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape retailer category pages into the price store.
    Run {
        /// Only crawl this retailer.
        #[arg(long)]
        source: Option<Retailer>,
        /// First category, first page only.
        #[arg(long)]
        test: bool,
        /// Extract and log, never write.
        #[arg(long)]
        dry_run: bool,
        /// Screenshot every page visited.
        #[arg(long)]
        debug: bool,
    },
    /// Import a catalog export (JSON) into the price store.
    Migrate {
        file: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve search and submissions over HTTP.
    Serve {
        #[arg(long, env = "PRICEFEED_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::with_default_sites(),
    };

    match &cli.command {
        Command::Run {
            source,
            test,
            dry_run,
            debug,
        } => {
            let mode = CrawlMode {
                test: *test,
                dry_run: *dry_run,
                debug: *debug,
            };
            run(&cli, config, *source, mode).await
        }
        Command::Migrate { file, dry_run } => migrate(&cli, config, file, *dry_run).await,
        Command::Serve { bind } => serve(&cli, config, bind).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "pricefeed=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Store credentials from flags or the environment. The Supabase variable
/// names are honoured for existing deployments.
fn store_credentials(cli: &Cli) -> Option<(String, String)> {
    let url = cli
        .store_url
        .clone()
        .or_else(|| std::env::var("SUPABASE_URL").ok())
        .filter(|u| !u.trim().is_empty())?;
    let key = cli
        .store_key
        .clone()
        .or_else(|| std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok())
        .filter(|k| !k.trim().is_empty())?;
    Some((url, key))
}

/// Open the store once and check it answers. Dry runs never write, so they
/// fall back to an in-memory store when no credentials are configured.
async fn open_store(cli: &Cli, dry_run: bool) -> Result<Arc<dyn PriceStore>> {
    let store: Arc<dyn PriceStore> = match (cli.store, store_credentials(cli)) {
        (StoreKind::Memory, _) => Arc::new(MemoryStore::new()),
        (StoreKind::Rest, Some((url, key))) => Arc::new(
            RestStore::new(&url, &key, STORE_TIMEOUT).context("failed to create store client")?,
        ),
        (StoreKind::Rest, None) if dry_run => {
            warn!("no store credentials configured, dry run uses an in-memory store");
            Arc::new(MemoryStore::new())
        }
        (StoreKind::Rest, None) => {
            bail!("missing store credentials: set PRICEFEED_STORE_URL and PRICEFEED_STORE_KEY")
        }
    };
    store.ping().await.context("store is not reachable")?;
    Ok(store)
}

fn select_sites(config: &Config, source: Option<Retailer>) -> Result<Vec<SiteConfig>> {
    match source {
        None => Ok(config.sites.clone()),
        Some(retailer) => config
            .site(retailer)
            .cloned()
            .map(|site| vec![site])
            .ok_or_else(|| anyhow!("no site configured for {}", retailer)),
    }
}

async fn run(cli: &Cli, config: Config, source: Option<Retailer>, mode: CrawlMode) -> Result<()> {
    let sites = select_sites(&config, source)?;
    let store = open_store(cli, mode.dry_run).await?;
    let page = WebDriverPage::connect(&config.crawl.webdriver_url, config.crawl.headless)
        .await
        .with_context(|| format!("failed to start browser via {}", config.crawl.webdriver_url))?;

    println!("🛒 Price Scraper\n");
    println!("{}", "=".repeat(60));
    if mode.test {
        println!("Test mode: first category, first page only");
    }
    if mode.dry_run {
        println!("Dry run: nothing will be written");
    }

    let upserter = BatchUpserter::new(
        store,
        ConflictKey::NaturalKey,
        config.upsert.batch_size,
        mode.dry_run,
    );
    let mut crawler = Crawler::new(page, config.crawl.clone(), mode, upserter);
    let summary = crawler.run(&sites).await;

    println!("\n{}", "-".repeat(60));
    for report in crawler.reports() {
        println!("{:<28} {:>5} items  {:?}", report.name, report.items, report.state);
    }

    if let Err(e) = crawler.into_page().close().await {
        warn!(error = %e, "failed to close browser session");
    }

    println!("\n{}", "=".repeat(60));
    println!("📊 SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total scraped: {}", summary.total);
    println!("Saved:         {}", summary.saved);
    println!("Errors:        {}", summary.errors);
    Ok(())
}

async fn migrate(cli: &Cli, config: Config, file: &Path, dry_run: bool) -> Result<()> {
    let rows = read_catalog(file)?;
    let store = open_store(cli, dry_run).await?;

    let migrator = Migrator::new(store, &config.upsert, config.migrate.clone(), dry_run);
    let report = migrator.run(&rows).await;

    println!("\n{}", "=".repeat(60));
    println!("📦 IMPORT {}", if dry_run { "(dry run)" } else { "" });
    println!("{}", "=".repeat(60));
    println!("Total:      {}", report.total);
    println!("Successful: {}", report.successful);
    println!("Failed:     {}", report.failed);
    println!("Skipped:    {}", report.skipped);
    if !report.errors.is_empty() {
        println!("\nFirst errors:");
        for error in &report.errors {
            println!("  - {}", error);
        }
    }
    Ok(())
}

async fn serve(cli: &Cli, config: Config, bind: &str) -> Result<()> {
    let store = open_store(cli, false).await?;
    let state = AppState {
        search: Arc::new(PriceSearchService::new(store.clone(), config.search.clone())),
        submit: Arc::new(SubmissionGuard::new(store, config.submit.clone())),
    };
    let app = rpc::router(state);

    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "price rpc listening");
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
