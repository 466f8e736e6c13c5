use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

use crate::kernel::dispatcher::ListenerConfig;
use crate::kernel::jobs::JobPriority;

/// Per-queue retry policy: how many attempts and the backoff base.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: i32,
    pub base_backoff_ms: i64,
    pub default_priority: JobPriority,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1000,
            default_priority: JobPriority::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_iterations: u32,
    pub max_results_per_search: i64,
    pub semantic_distance_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_results_per_search: 5,
            semantic_distance_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BudgetConfig {
    pub soft_limit_pct: f64,
    pub hard_limit_pct: f64,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    pub anthropic_api_key: String,
    pub openai_api_key: String,
    pub default_model: String,

    pub listener_config: ListenerConfig,
    pub queue_config: QueueConfig,
    pub retrieval_config: RetrievalConfig,
    pub budget_config: BudgetConfig,

    pub worker_count: usize,
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let listener_config = ListenerConfig {
            batch_size: env_i64("LISTENER_BATCH_SIZE", 100),
            debounce_ms: env_u64("LISTENER_DEBOUNCE_MS", 200),
            max_wait_ms: env_u64("LISTENER_MAX_WAIT_MS", 2000),
            lock_duration_ms: env_i64("LISTENER_LOCK_DURATION_MS", 30_000),
            refresh_interval_ms: env_i64("LISTENER_REFRESH_INTERVAL_MS", 10_000),
            max_retries: env_u64("LISTENER_MAX_RETRIES", 5) as u32,
            base_backoff_ms: env_u64("LISTENER_BASE_BACKOFF_MS", 200),
        };

        let queue_config = QueueConfig {
            max_attempts: env_i64("QUEUE_MAX_ATTEMPTS", 5) as i32,
            base_backoff_ms: env_i64("QUEUE_BASE_BACKOFF_MS", 1000),
            default_priority: JobPriority::Normal,
        };

        let retrieval_config = RetrievalConfig {
            max_iterations: env_u64("RETRIEVAL_MAX_ITERATIONS", 5) as u32,
            max_results_per_search: env_i64("RETRIEVAL_MAX_RESULTS_PER_SEARCH", 5),
            semantic_distance_threshold: env_f64("RETRIEVAL_SEMANTIC_DISTANCE_THRESHOLD", 0.3),
        };

        let budget_config = BudgetConfig {
            soft_limit_pct: env_f64("BUDGET_SOFT_LIMIT_PCT", 80.0),
            hard_limit_pct: env_f64("BUDGET_HARD_LIMIT_PCT", 100.0),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY must be set")?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            default_model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string()),
            listener_config,
            queue_config,
            retrieval_config,
            budget_config,
            worker_count: env_u64("WORKER_COUNT", 4) as usize,
        })
    }
}
