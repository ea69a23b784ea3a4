//! Marginalia Kernel Library
//!
//! Collaboration markup filtering, document diffs, collaboration tokens,
//! content export/import and entity usage tracking. The HTTP server and
//! CLI live in the `marginalia` binary.

pub mod config;
pub mod content;
pub mod content_export;
pub mod cron;
pub mod error;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .merge(routes::cron::router())
        .merge(routes::collaboration::router())
        .merge(routes::filter::router())
        .merge(routes::diff::router())
        .merge(routes::content::router())
        // Middleware layers (last added = first executed in request flow):
        // TraceLayer → CORS → routes
        .layer(build_cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    if config.cors_allowed_origins.len() == 1 && config.cors_allowed_origins[0] == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
    }
}
