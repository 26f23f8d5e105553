//! HTTP handlers.
//!
//! The control endpoints answer in plain text like the exporters they are
//! modelled on; `/reloadConfig` and `/testConn` answer JSON on success.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use tracing::{info, warn};

use dbgauge_connect::ProbeError;
use dbgauge_core::{CollectOptions, Feature};

use crate::ApiState;

/// Flags the metrics path accepts, in landing page order.
const REQUEST_FEATURES: [Feature; 5] = [
    Feature::TableRows,
    Feature::TableBytes,
    Feature::IndexBytes,
    Feature::LobBytes,
    Feature::Recovery,
];

#[derive(serde::Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: msg.to_string(),
        }),
    )
}

/// Options a request asks for: only the flags set to `true`.
pub fn requested_options(params: &HashMap<String, String>) -> CollectOptions {
    let on = |feature: Feature| params.get(feature.flag()).is_some_and(|v| v == "true");
    CollectOptions {
        default_metrics: false,
        recovery: on(Feature::Recovery),
        tablerows: on(Feature::TableRows),
        tablebytes: on(Feature::TableBytes),
        indexbytes: on(Feature::IndexBytes),
        lobbytes: on(Feature::LobBytes),
    }
}

// ── Landing ────────────────────────────────────────────────────

/// GET /
pub async fn landing_page(State(state): State<ApiState>) -> Html<String> {
    let path = &state.telemetry_path;
    let flags: String = REQUEST_FEATURES
        .iter()
        .map(|f| format!("<li><a href=\"{path}?{flag}=true\">{path}?{flag}=true</a></li>\n", flag = f.flag()))
        .collect();
    Html(format!(
        "<html>\n<head><title>dbgauge exporter</title></head>\n<body>\n\
         <h1>dbgauge exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <ul>\n{flags}</ul>\n\
         <ul>\n\
         <li><a href=\"/reloadConfig\">/reloadConfig</a></li>\n\
         <li><a href=\"/getTimeout\">/getTimeout</a></li>\n\
         <li><a href=\"/setTimeout?v=10\">/setTimeout?v=10</a></li>\n\
         <li><a href=\"/testConn\">/testConn</a></li>\n\
         </ul>\n</body>\n</html>\n"
    ))
}

// ── Metrics ────────────────────────────────────────────────────

/// GET <telemetry path>
pub async fn metrics(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let options = state.scraper.defaults().union(&requested_options(&params));
    let outcome = state.scraper.scrape(options).await;
    if let Some(e) = &outcome.error {
        warn!(error = %e, "scrape finished with an error");
    }

    let body = outcome.snapshot.to_prometheus(&options);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ── Runtime control ────────────────────────────────────────────

/// GET /reloadConfig
///
/// The file is read on the blocking pool.
pub async fn reload_config(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = Arc::clone(state.scraper.registry());
    match tokio::task::spawn_blocking(move || registry.reload()).await {
        Ok(Ok(set)) => {
            info!(targets = set.len(), "target file reloaded");
            Json(set.to_redacted_file()).into_response()
        }
        Ok(Err(e)) => format!("loadConfig: false ({e})").into_response(),
        Err(e) => {
            warn!(error = %e, "reload task failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /getTimeout
pub async fn get_timeout(State(state): State<ApiState>) -> String {
    format!("current timeout={}", state.scraper.timeout().get())
}

/// GET /setTimeout?v=<n>
pub async fn set_timeout(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let raw = params.get("v").map(String::as_str).unwrap_or_default();
    match raw.parse::<i64>() {
        Err(e) => format!("Err {e}"),
        Ok(v) => match state.scraper.timeout().set(v) {
            Ok(secs) => format!("ok, timeout={secs}"),
            Err(_) => "bad timeout, 1<v<15".to_string(),
        },
    }
}

/// GET /testConn
pub async fn test_conn(State(state): State<ApiState>) -> impl IntoResponse {
    match state.scraper.test_connections().await {
        Ok(samples) => Json(samples).into_response(),
        Err(ProbeError::Busy) => {
            error_response(&ProbeError::Busy.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e) => {
            warn!(error = %e, "connectivity probe failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}
