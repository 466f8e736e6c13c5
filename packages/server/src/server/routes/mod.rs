// HTTP routes
pub mod health;

use axum::{Router, routing::get};

use health::health_handler;

pub fn router() -> Router {
    Router::new().route("/health", get(health_handler))
}
