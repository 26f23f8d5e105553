//! dbgauge-api — HTTP surface of the exporter.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Landing page |
//! | GET | telemetry path (default `/metrics`) | Scrape and render |
//! | GET | `/reloadConfig` | Reload the target file |
//! | GET | `/getTimeout` | Current scrape budget |
//! | GET | `/setTimeout?v=<n>` | Change the scrape budget |
//! | GET | `/testConn` | Run the connectivity probe once |
//!
//! The metrics path accepts `tablerows`, `tablebytes`, `indexbytes`,
//! `lobbytes` and `recovery` query flags (`=true`). They enable the heavy
//! collectors for that request only, on top of the exporter's defaults.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use dbgauge_scrape::Scraper;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scraper: Arc<Scraper>,
    pub telemetry_path: Arc<str>,
}

/// Build the complete router.
///
/// `telemetry_path` must start with `/` and must not be `/` itself.
pub fn build_router(scraper: Arc<Scraper>, telemetry_path: &str) -> Router {
    let state = ApiState {
        scraper,
        telemetry_path: Arc::from(telemetry_path),
    };

    Router::new()
        .route("/", get(handlers::landing_page))
        .route(telemetry_path, get(handlers::metrics))
        .route("/reloadConfig", get(handlers::reload_config))
        .route("/getTimeout", get(handlers::get_timeout))
        .route("/setTimeout", get(handlers::set_timeout))
        .route("/testConn", get(handlers::test_conn))
        .with_state(state)
}
