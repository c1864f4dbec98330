//! # Cache Benchmark
//!
//! Fires concurrent product lookups through the cached and the uncached path
//! and prints throughput, latency and how many times the backing store was hit.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin cache_benchmark -- --requests 5000 --concurrency 128 --mode both
//! cargo run --bin cache_benchmark --features observability   # + Prometheus exporter on :9000
//! ```
//!
//! Defaults come from `Config.toml` / `CACHE_*` env vars; flags override them.
//! With `DATABASE_URL` set, products are read from PostgreSQL instead of memory.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use futures::stream::{self, StreamExt};
use read_through_cache::{
    database::{self, PgProductRepository},
    latency::SimulatedLatency,
    metrics,
    products::{seed_products, InMemoryProductRepository, ProductRepository},
    settings::Settings,
    CounterObserver, ProductCacheService, ProductService,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Cached,
    Uncached,
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "cache_benchmark", about = "Cached vs. uncached product lookup benchmark")]
struct Cli {
    /// Total lookups per mode
    #[arg(long)]
    requests: Option<usize>,
    /// Lookups in flight at the same time
    #[arg(long)]
    concurrency: Option<usize>,
    /// Product ids 1..=N requested round-robin
    #[arg(long)]
    distinct_keys: Option<usize>,
    #[arg(long)]
    ttl_seconds: Option<u64>,
    /// Simulated backing-store latency per lookup
    #[arg(long)]
    latency_ms: Option<u64>,
    #[arg(long, value_enum, default_value_t = Mode::Both)]
    mode: Mode,
    /// Print one product as JSON before running
    #[arg(long)]
    show_sample: bool,
}

struct RunSummary {
    label: &'static str,
    requests: usize,
    errors: u64,
    elapsed: Duration,
    latencies: Vec<Duration>,
    loader_calls: Option<u64>,
    hit_rate: Option<f64>,
}

impl RunSummary {
    fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests as f64 / secs
        } else {
            0.0
        }
    }

    fn percentile(&self, p: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let idx = ((self.latencies.len() - 1) as f64 * p).round() as usize;
        self.latencies[idx]
    }

    fn average(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
    }

    fn print(&self) {
        println!("\n{}", format!("── {} ──", self.label).bold());
        println!("  requests      : {}", self.requests);
        println!("  errors        : {}", self.errors);
        println!("  elapsed       : {:?}", self.elapsed);
        println!("  throughput    : {} req/s", format!("{:.1}", self.throughput()).green());
        println!("  avg latency   : {:?}", self.average());
        println!("  p50 / p99     : {:?} / {:?}", self.percentile(0.50), self.percentile(0.99));
        match self.loader_calls {
            Some(calls) => println!("  backing loads : {}", calls),
            None => println!("  backing loads : {}", self.requests),
        }
        if let Some(rate) = self.hit_rate {
            println!("  hit rate      : {:.1}%", rate * 100.0);
        }
    }
}

fn init_logging() {
    #[cfg(feature = "observability")]
    {
        if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
            tracing_subscriber::fmt().json().init();
        } else {
            tracing_subscriber::fmt().init();
        }
    }
    #[cfg(not(feature = "observability"))]
    env_logger::init();
}

#[cfg(feature = "observability")]
fn init_metrics_exporter() -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .context("failed to install Prometheus exporter")?;
    println!("✅ Prometheus exporter listening on 0.0.0.0:9000");
    Ok(())
}

async fn build_repository(settings: &Settings) -> Result<Arc<dyn ProductRepository>> {
    match &settings.database.url {
        Some(url) => {
            let pool = database::connect(url, settings.database.max_connections).await?;
            let repository = PgProductRepository::new(pool);
            if repository.count().await? == 0 {
                seed_products(&repository, settings.backing_store.seed_products).await?;
            }
            println!("✅ Using PostgreSQL product repository");
            Ok(Arc::new(repository))
        }
        None => {
            let repository = InMemoryProductRepository::new();
            seed_products(&repository, settings.backing_store.seed_products).await?;
            println!(
                "✅ Using in-memory product repository ({} products)",
                repository.len()
            );
            Ok(Arc::new(repository))
        }
    }
}

async fn run_lookups<F, Fut>(
    label: &'static str,
    settings: &Settings,
    lookup: F,
) -> RunSummary
where
    F: Fn(i64) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let requests = settings.benchmark.requests;
    let distinct = settings.benchmark.distinct_keys as i64;
    let errors = AtomicU64::new(0);

    let start = Instant::now();
    let mut latencies: Vec<Duration> = stream::iter(0..requests)
        .map(|i| {
            let id = (i as i64 % distinct) + 1;
            let call = lookup(id);
            let errors = &errors;
            async move {
                let t = Instant::now();
                if !call.await {
                    errors.fetch_add(1, Ordering::Relaxed);
                }
                t.elapsed()
            }
        })
        .buffer_unordered(settings.benchmark.concurrency.max(1))
        .collect()
        .await;
    let elapsed = start.elapsed();
    latencies.sort();

    RunSummary {
        label,
        requests,
        errors: errors.load(Ordering::Relaxed),
        elapsed,
        latencies,
        loader_calls: None,
        hit_rate: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    println!("🚀 Starting cache benchmark");
    println!("═══════════════════════════════════════════════════════════════════\n");

    // 1. Settings (Config.toml + env), then CLI overrides
    let mut settings = Settings::new().context("failed to load settings")?;
    if let Some(requests) = cli.requests {
        settings.benchmark.requests = requests;
    }
    if let Some(concurrency) = cli.concurrency {
        settings.benchmark.concurrency = concurrency;
    }
    if let Some(distinct) = cli.distinct_keys {
        settings.benchmark.distinct_keys = distinct;
    }
    if let Some(ttl) = cli.ttl_seconds {
        settings.cache.ttl_seconds = ttl;
    }
    if let Some(latency) = cli.latency_ms {
        settings.backing_store.simulated_latency_ms = latency;
    }
    settings.validate().context("invalid benchmark settings")?;
    println!("✅ Settings loaded: {:?}", settings.benchmark);

    // 2. Metrics
    #[cfg(feature = "observability")]
    init_metrics_exporter()?;
    metrics::describe_metrics();

    // 3. Repository + services
    let repository = build_repository(&settings).await?;
    let latency: SimulatedLatency = settings.backing_store.latency();
    let service = Arc::new(ProductService::new(repository, latency));
    let observer = Arc::new(CounterObserver::new());
    let cached = Arc::new(ProductCacheService::new(
        Arc::clone(&service),
        settings.cache.to_cache_config(),
        observer.clone(),
    )?);
    println!(
        "✅ Services ready (ttl={:?}, latency={:?})",
        settings.cache.ttl(),
        latency
    );

    if cli.show_sample {
        let sample = cached.get_product_without_cache(1).await?;
        println!("{}", serde_json::to_string_pretty(&sample)?);
    }

    // 4. Runs
    if matches!(cli.mode, Mode::Uncached | Mode::Both) {
        let summary = run_lookups("uncached (direct repository)", &settings, |id| {
            let cached = Arc::clone(&cached);
            async move { cached.get_product_without_cache(id).await.is_ok() }
        })
        .await;
        summary.print();
    }

    if matches!(cli.mode, Mode::Cached | Mode::Both) {
        observer.reset();
        cached.evict_all();
        let mut summary = run_lookups("cached (read-through)", &settings, |id| {
            let cached = Arc::clone(&cached);
            async move { cached.get_product_with_cache(id).await.is_ok() }
        })
        .await;
        let snapshot = observer.snapshot();
        summary.loader_calls = Some(snapshot.loader_calls());
        summary.hit_rate = Some(snapshot.hit_rate);
        summary.print();
        println!(
            "  coalesced     : {} (joined an in-flight load)",
            snapshot.coalesced
        );
    }

    println!("\n✅ Benchmark finished");
    Ok(())
}
