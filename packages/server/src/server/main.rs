// Entry point for the event dispatch and asynchronous pipeline substrate.
//
// Boots the database pool, runs migrations, wires the AI façade/budget/cost
// stack into an `InterceptedAi`, builds the `ServerKernel`, starts the
// Dispatcher (Event Log listeners) and the durable job worker pool, then
// serves the health-check HTTP surface until shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::config::Config;
use dispatch_core::domains::{boundary_extraction, companion, embedding, event_router, memo, naming};
use dispatch_core::kernel::ai::{BudgetEnforcer, CostRecorder, InterceptedAi, RigAiFacade};
use dispatch_core::kernel::jobs::{JobRegistry, PostgresJobQueue, spawn_worker_pool, JobWorkerConfig};
use dispatch_core::kernel::{Dispatcher, ServerKernel};
use dispatch_core::server::build_app;
use pipeline_core::EventBus;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dispatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting event dispatch substrate");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("migrations complete");

    let facade = Arc::new(RigAiFacade::new(
        config.anthropic_api_key.clone(),
        config.openai_api_key.clone(),
        config.default_model.clone(),
    ));
    let budget = Arc::new(BudgetEnforcer::new(pool.clone()));
    let cost = Arc::new(CostRecorder::new(pool.clone()));
    let ai = Arc::new(InterceptedAi::new(facade, budget, cost));

    let bus = EventBus::new();
    let job_queue = Arc::new(PostgresJobQueue::new(pool.clone()));
    let kernel = Arc::new(ServerKernel::new(pool.clone(), ai, bus, job_queue.clone()));

    let mut registry = JobRegistry::new();
    registry.register("boundary-extract", boundary_extraction::run);
    registry.register("naming-generate", naming::run);
    registry.register("memo-batch-check", memo::run_check);
    registry.register("memo-batch-process", memo::run_process);
    registry.register("embedding", embedding::run);
    registry.register("companion-response", companion::run);
    let registry = Arc::new(registry);

    let shutdown = CancellationToken::new();

    let mut dispatcher = Dispatcher::new(pool.clone(), kernel.clone());
    dispatcher.register(Arc::new(event_router::BoundaryExtractionListener::new()), config.listener_config.clone());
    dispatcher.register(Arc::new(event_router::NamingListener::new()), config.listener_config.clone());
    dispatcher.register(Arc::new(event_router::MemoAccumulatorListener::new()), config.listener_config.clone());
    dispatcher.register(Arc::new(event_router::EmbeddingListener::new()), config.listener_config.clone());
    let dispatcher_shutdown = shutdown.clone();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(dispatcher_shutdown).await });

    let worker_shutdown = shutdown.clone();
    let worker_config = JobWorkerConfig::default();
    let worker_handles = spawn_worker_pool(job_queue, registry, kernel.clone(), worker_config, config.worker_count, worker_shutdown);

    let app = build_app(kernel);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "starting health-check server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
    });

    tokio::select! {
        result = serve => { result.context("server error")?; }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    }

    dispatcher_handle.await.context("dispatcher task panicked")??;
    for handle in worker_handles {
        handle.await.context("job worker task panicked")?;
    }

    Ok(())
}
