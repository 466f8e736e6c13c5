// HTTP server setup: a minimal axum surface over the kernel. The real
// entry points into this system are the Dispatcher's listeners and the
// JobWorker pool, both started alongside this router in `main.rs`; the
// HTTP surface here exists for health checks and operational visibility,
// not request/response business logic.

pub mod routes;

use std::sync::Arc;

use axum::{Extension, Router};

use crate::kernel::ServerKernel;

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<ServerKernel>,
}

pub fn build_app(kernel: Arc<ServerKernel>) -> Router {
    let state = AppState { kernel };

    Router::new()
        .merge(routes::router())
        .layer(Extension(state))
}
