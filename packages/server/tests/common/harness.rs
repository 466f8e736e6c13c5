//! Test harness with a shared Postgres+pgvector testcontainer.
//!
//! Containers and migrations are initialized once on first test, then reused
//! by every test in the binary. There is no Redis container and no GraphQL
//! client here: this system's only external dependency is Postgres, and its
//! only HTTP surface is the health check.

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatch_core::kernel::ai::{BudgetEnforcer, CostRecorder, InterceptedAi};
use dispatch_core::kernel::jobs::PostgresJobQueue;
use dispatch_core::kernel::ServerKernel;
use pipeline_core::EventBus;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;

use super::mock_ai::MockAiFacade;

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<GenericImage>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = GenericImage::new("pgvector/pgvector", "pg16")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .context("failed to start postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}/postgres", pg_host, pg_port);

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to postgres for migrations")?;

        sqlx::migrate!("../migrations").run(&pool).await.context("failed to run migrations")?;

        Ok(Self { db_url, _postgres: postgres })
    }

    pub(super) async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to initialize shared test infrastructure") })
            .await
    }
}

/// Per-test state: a fresh pool against the shared container, a fresh
/// `ServerKernel` wired to a scriptable `MockAiFacade`, and handles to the
/// budget/cost tables tests commonly assert against.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub kernel: Arc<ServerKernel>,
    pub ai_facade: Arc<MockAiFacade>,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url).await.context("failed to connect to test database")?;

        let ai_facade = Arc::new(MockAiFacade::new());
        let budget = Arc::new(BudgetEnforcer::new(db_pool.clone()));
        let cost = Arc::new(CostRecorder::new(db_pool.clone()));
        let ai = Arc::new(InterceptedAi::new(ai_facade.clone(), budget, cost));

        let bus = EventBus::new();
        let job_queue = Arc::new(PostgresJobQueue::new(db_pool.clone()));
        let kernel = Arc::new(ServerKernel::new(db_pool.clone(), ai, bus, job_queue));

        Ok(Self { db_pool, kernel, ai_facade })
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
