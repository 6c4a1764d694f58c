use std::sync::Arc;

use anyhow::Context;
use similarity::FingerprintCache;
use similarity::cache::SWEEP_INTERVAL;
use tokio::task::JoinSet;
use tracing::info;

use pipeline::config::AppConfig;
use pipeline::context::PipelineContext;
use pipeline::workers::{judge, plagiarism};
use pipeline::{database, schema};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = database::connect_with_retry(&config.database_url, 5)
        .await
        .context("Failed to connect to the database")?;
    schema::ensure_schema(&db)
        .await
        .context("Failed to prepare the database schema")?;

    let broker = mq::QueueBroker::connect_with_retry(&config.redis_url, 5)
        .await
        .context("Failed to connect to the queue broker")?;

    info!(judge_workers = config.judge_workers, "Pipeline starting");

    let ctx = Arc::new(PipelineContext::new(db, broker, config));

    let _sweeper = FingerprintCache::spawn_sweeper(ctx.fingerprints.clone(), SWEEP_INTERVAL);

    let mut workers = JoinSet::new();
    for worker_id in 0..ctx.config.judge_workers {
        let ctx = Arc::clone(&ctx);
        workers.spawn(async move { judge::run(ctx, worker_id).await });
    }
    {
        let ctx = Arc::clone(&ctx);
        workers.spawn(async move { plagiarism::run(ctx).await });
    }

    // Worker loops only return by panicking; surface that as a fatal exit.
    while let Some(result) = workers.join_next().await {
        result.context("Worker task failed")?;
    }

    Ok(())
}
