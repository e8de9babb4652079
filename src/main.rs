//! reddit-harvester — binary entrypoint.
//! Loads configuration, provisions the store and runs the ingestion scheduler until
//! Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use reddit_harvester::config::{HarvesterConfig, StoreBackend};
use reddit_harvester::ingest::providers::reddit::RedditClient;
use reddit_harvester::ingest::scheduler::spawn_scheduler;
use reddit_harvester::ingest::IngestManager;
use reddit_harvester::metrics::{self as harvest_metrics, Metrics};
use reddit_harvester::store::memory::MemoryStore;
use reddit_harvester::store::postgres::PgStore;
use reddit_harvester::store::{self, StoreClient};
use reddit_harvester::writer::RecordWriter;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; JSON lines when HARVESTER_LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reddit_harvester=info,warn"));

    let json = std::env::var("HARVESTER_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn build_store(cfg: &HarvesterConfig) -> anyhow::Result<Arc<dyn StoreClient>> {
    match cfg.store.backend {
        StoreBackend::Postgres => {
            let pg = PgStore::connect_lazy(&cfg.pg_store_config()?, cfg.retry_policy())?;
            Ok(Arc::new(pg))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = HarvesterConfig::load_default().context("loading harvester config")?;

    let store = build_store(&cfg)?;
    store::provision(store.as_ref(), &cfg.store.collections, &cfg.store.index_field)
        .await
        .context("provisioning collections and indexes")?;

    let reddit = Arc::new(RedditClient::new(
        cfg.reddit_client_config(),
        cfg.retry_policy(),
    )?);
    let writer = Arc::new(RecordWriter::new(store));
    let manager = Arc::new(
        IngestManager::new(reddit, writer, cfg.targets(), cfg.reddit.query_limit)
            .with_concurrency(cfg.scheduler.max_concurrent_sources),
    );

    let cancel = CancellationToken::new();

    if let Some(addr) = cfg.metrics.listen.clone() {
        let metrics = Metrics::init().context("installing prometheus recorder")?;
        let router = metrics.router();
        let token = cancel.clone();
        tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = harvest_metrics::serve(router, &addr, shutdown).await {
                tracing::error!(error = ?e, "metrics endpoint failed");
            }
        });
    }

    let scheduler = spawn_scheduler(
        manager,
        cfg.sources().to_vec(),
        cfg.scheduler_cfg(),
        cancel.clone(),
    );

    tracing::info!(
        sources = cfg.sources().len(),
        interval_secs = cfg.scheduler.run_frequency_secs,
        "harvester started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    let cycles = scheduler.await.context("scheduler task panicked")?;
    tracing::info!(cycles, "harvester stopped");
    Ok(())
}
