use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use roprox_client::{CheckerConfig, HttpLivenessChecker, LoaderConfig, ReqwestLoader, default_sources};
use roprox_core::models::{ProxyStatus, ProxyType};
use roprox_core::source::SourceSpec;
use roprox_core::traits::{LivenessCheck, NoBrowser, PageOpener};
use roprox_core::{ProxyPoolService, SchedulerConfig};
use roprox_db::{Database, DatabaseConfig, ProxyRepository};

#[derive(Parser)]
#[command(name = "roprox", version, about = "Self-maintaining pool of free proxy servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest, probe and evict proxies until interrupted
    Run {
        #[command(flatten)]
        pool: PoolArgs,

        #[command(flatten)]
        loader: LoaderArgs,

        /// Only run these sources (by id); all built-in sources by default
        #[arg(long = "source", value_delimiter = ',')]
        sources: Vec<String>,
    },

    /// Run one eviction pass and one probe round, then exit
    Sweep {
        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Check a single proxy and print OK or FAIL
    Check {
        #[arg(long)]
        host: String,

        #[arg(short, long)]
        port: u16,

        /// http, https, socks4 or socks5
        #[arg(short = 't', long = "type", default_value = "http")]
        proxy_type: ProxyType,

        #[arg(long, env = "ROPROX_PROBE_URL", default_value = "http://httpbin.org/ip")]
        probe_url: String,

        /// Seconds
        #[arg(long, env = "ROPROX_PROBE_TIMEOUT", default_value_t = 10)]
        probe_timeout: u64,
    },

    /// Show stored proxies, best score first
    List {
        /// OK, FAIL or UNK
        #[arg(short, long)]
        status: Option<ProxyStatus>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Print CSV instead of a table
        #[arg(long, default_value_t = false)]
        csv: bool,
    },

    /// List the built-in proxy list sources
    Sources,
}

#[derive(Args)]
struct PoolArgs {
    /// Number of concurrent probe workers
    #[arg(long, env = "ROPROX_PROBE_SIZE", default_value_t = 16)]
    probe_size: usize,

    #[arg(long, env = "ROPROX_QUEUE_CAPACITY", default_value_t = 128)]
    queue_capacity: usize,

    /// Seconds before a probed proxy is due again
    #[arg(long, env = "ROPROX_PROBE_INTERVAL", default_value_t = 300)]
    probe_interval: u64,

    /// Seconds allowed for one liveness check
    #[arg(long, env = "ROPROX_PROBE_TIMEOUT", default_value_t = 10)]
    probe_timeout: u64,

    #[arg(long, env = "ROPROX_PROBE_URL", default_value = "http://httpbin.org/ip")]
    probe_url: String,

    /// Seconds between eviction passes
    #[arg(long, env = "ROPROX_EVICTION_INTERVAL", default_value_t = 600)]
    eviction_interval: u64,

    /// Seconds a failing proxy may go unreported before it is deleted
    #[arg(long, env = "ROPROX_EVICTION_TIMEOUT", default_value_t = 86_400)]
    eviction_timeout: u64,

    /// Only evict failing proxies scoring below this value
    #[arg(long, env = "ROPROX_EVICTION_SCORE_THRESHOLD")]
    eviction_score_threshold: Option<f64>,
}

impl PoolArgs {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_probe_pool_size(self.probe_size)
            .with_queue_capacity(self.queue_capacity)
            .with_probe_interval(Duration::from_secs(self.probe_interval))
            .with_probe_timeout(Duration::from_secs(self.probe_timeout))
            .with_eviction_interval(Duration::from_secs(self.eviction_interval))
            .with_eviction_timeout(Duration::from_secs(self.eviction_timeout))
            .with_eviction_score_floor(self.eviction_score_threshold)
    }

    fn checker(&self) -> HttpLivenessChecker {
        HttpLivenessChecker::new(
            CheckerConfig::new()
                .with_timeout(Duration::from_secs(self.probe_timeout))
                .with_test_url(&self.probe_url),
        )
    }
}

#[derive(Args)]
struct LoaderArgs {
    /// Proxy for sources that can't be reached directly (host:port or URL)
    #[arg(long, env = "ROPROX_MASTER_PROXY")]
    master_proxy: Option<String>,

    /// Retries after a transient fetch failure
    #[arg(long, env = "ROPROX_HTTP_RETRY", default_value_t = 3)]
    http_retry: u32,

    /// Seconds allowed for one page download
    #[arg(long, env = "ROPROX_HTTP_TIMEOUT", default_value_t = 30)]
    http_timeout: u64,

    /// Seconds allowed for one browser-driven page
    #[arg(long, env = "ROPROX_PAGE_TIMEOUT", default_value_t = 180)]
    page_timeout: u64,

    #[arg(long, env = "ROPROX_USER_AGENT")]
    user_agent: Option<String>,
}

impl LoaderArgs {
    fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::new()
            .with_timeout(Duration::from_secs(self.http_timeout))
            .with_http_retry(self.http_retry)
            .with_master_proxy(self.master_proxy.clone());
        if let Some(ua) = &self.user_agent {
            config = config.with_user_agent(ua);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("roprox=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pool,
            loader,
            sources,
        } => cmd_run(&pool, &loader, &sources).await,
        Commands::Sweep { pool } => cmd_sweep(&pool).await,
        Commands::Check {
            host,
            port,
            proxy_type,
            probe_url,
            probe_timeout,
        } => cmd_check(&host, port, proxy_type, &probe_url, probe_timeout).await,
        Commands::List { status, limit, csv } => cmd_list(status, limit, csv).await,
        Commands::Sources => {
            cmd_sources();
            Ok(())
        }
    }
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<ProxyRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.proxy_repo())
}

/// Cancel the returned token on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        trigger.cancel();
    });
    token
}

fn select_sources(filter: &[String]) -> Result<Vec<Arc<dyn SourceSpec>>> {
    let all = default_sources();
    if filter.is_empty() {
        return Ok(all);
    }
    for wanted in filter {
        if !all.iter().any(|s| s.uid().eq_ignore_ascii_case(wanted)) {
            anyhow::bail!("Unknown source '{wanted}' (see `roprox sources`)");
        }
    }
    Ok(all
        .into_iter()
        .filter(|s| filter.iter().any(|w| s.uid().eq_ignore_ascii_case(w)))
        .collect())
}

async fn cmd_run(pool: &PoolArgs, loader: &LoaderArgs, sources: &[String]) -> Result<()> {
    let config = pool.scheduler_config();
    config.validate()?;
    let sources = select_sources(sources)?;
    let page_loader = ReqwestLoader::new(&loader.loader_config())?;
    let repo = connect_db().await?;

    #[cfg(feature = "browser")]
    match roprox_client::ChromiumBrowser::launch(loader.master_proxy.as_deref()).await {
        Ok(browser) => {
            return serve(repo, pool.checker(), page_loader, browser, config, sources, loader).await;
        }
        Err(e) => tracing::warn!(error = %e, "Headless browser unavailable, dynamic sources disabled"),
    }

    serve(repo, pool.checker(), page_loader, NoBrowser, config, sources, loader).await
}

async fn serve<B: PageOpener>(
    repo: ProxyRepository,
    checker: HttpLivenessChecker,
    page_loader: ReqwestLoader,
    browser: B,
    config: SchedulerConfig,
    sources: Vec<Arc<dyn SourceSpec>>,
    loader: &LoaderArgs,
) -> Result<()> {
    let service = ProxyPoolService::new(repo, checker, page_loader, browser, config)
        .with_sources(sources)
        .with_page_timeout(Duration::from_secs(loader.page_timeout));

    let report = service.run(shutdown_token()).await?;
    println!(
        "Probed {} proxies ({} ok, {} failed, {} write failures) in {} scans; evicted {}",
        report.probes.probed,
        report.probes.ok,
        report.probes.failed,
        report.probes.write_failures,
        report.scheduler.scans,
        report.scheduler.evicted,
    );
    Ok(())
}

async fn cmd_sweep(pool: &PoolArgs) -> Result<()> {
    let config = pool.scheduler_config();
    config.validate()?;
    let repo = connect_db().await?;

    let service = ProxyPoolService::new(
        repo.clone(),
        pool.checker(),
        ReqwestLoader::new(&LoaderConfig::new())?,
        NoBrowser,
        config,
    );
    let report = service.sweep(shutdown_token()).await?;

    println!("Evicted:  {}", report.evicted);
    println!("Probed:   {} of {} stale", report.probes.probed, report.enqueued);
    println!("  OK:     {}", report.probes.ok);
    println!("  FAIL:   {}", report.probes.failed);
    for status in [ProxyStatus::Ok, ProxyStatus::Fail, ProxyStatus::Unknown] {
        println!("Total {:<4} {}", status.as_str(), repo.count_by_status(status).await?);
    }
    Ok(())
}

async fn cmd_check(
    host: &str,
    port: u16,
    proxy_type: ProxyType,
    probe_url: &str,
    probe_timeout: u64,
) -> Result<()> {
    let timeout = Duration::from_secs(probe_timeout);
    let checker =
        HttpLivenessChecker::new(CheckerConfig::new().with_timeout(timeout).with_test_url(probe_url));

    let passed = tokio::time::timeout(timeout, checker.check(proxy_type, host, port))
        .await
        .unwrap_or(false);
    println!("{}", ProxyStatus::from_check(passed));
    Ok(())
}

async fn cmd_list(status: Option<ProxyStatus>, limit: usize, csv: bool) -> Result<()> {
    let repo = connect_db().await?;
    let records = repo.list(status, limit).await?;

    if csv {
        let mut writer = csv::Writer::from_writer(std::io::stdout());
        for record in &records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        return Ok(());
    }

    if records.is_empty() {
        println!("No proxies stored");
        return Ok(());
    }

    println!(
        "{:<32} {:<7} {:<4} {:>6} {:>5} {:>5}  {:<20} {}",
        "PROXY", "TYPE", "STAT", "SCORE", "OK", "FAIL", "LAST CHECK", "SOURCE"
    );
    for r in &records {
        let last_check = r
            .last_check
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<32} {:<7} {:<4} {:>6.1} {:>5} {:>5}  {:<20} {}",
            r.key().to_string(),
            r.proxy_type.as_str(),
            r.status.as_str(),
            r.score,
            r.success_count,
            r.fail_count,
            last_check,
            r.source,
        );
    }
    println!("\nTotal: {} proxies", records.len());
    Ok(())
}

fn cmd_sources() {
    for source in default_sources() {
        println!(
            "{:<12} {:<13} every {:>3} min{}",
            source.uid(),
            source.capability().kind().to_string(),
            source.refresh_interval(),
            if source.use_master_proxy() {
                "  (via master proxy)"
            } else {
                ""
            },
        );
        for url in source.urls() {
            println!("    {url}");
        }
    }
}
