//! Families the orchestrator itself writes.

use std::sync::Arc;

use dbgauge_core::{FamilyDesc, NAMESPACE};

/// Upper bounds for the phase timing histogram, in seconds.
pub const PHASE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0];

/// Error categories that do not come from a built-in collector.
pub const ERROR_CATEGORIES: &[&str] = &[
    "connect",
    "probe_timeout",
    "connect_timeout",
    "deadline",
    "custom_exec",
    "custom_labels",
    "store",
    "task",
];

/// Descriptors of the exporter's own families, built once.
#[derive(Debug, Clone)]
pub struct ExporterFamilies {
    pub scrapes_total: Arc<FamilyDesc>,
    pub last_scrape_duration: Arc<FamilyDesc>,
    pub last_scrape_error: Arc<FamilyDesc>,
    pub scrape_errors_total: Arc<FamilyDesc>,
    pub phase_duration: Arc<FamilyDesc>,
    pub up: Arc<FamilyDesc>,
    pub used_times: Arc<FamilyDesc>,
}

impl Default for ExporterFamilies {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterFamilies {
    pub fn new() -> Self {
        let exporter = |name: &str| format!("{NAMESPACE}_exporter_{name}");
        Self {
            scrapes_total: Arc::new(FamilyDesc::counter(
                exporter("scrapes_total"),
                "Total number of times the databases were scraped.",
                &[],
            )),
            last_scrape_duration: Arc::new(
                FamilyDesc::gauge(
                    exporter("last_scrape_duration_seconds"),
                    "Duration of the last scrape in seconds.",
                    &[],
                )
                .lifetime(),
            ),
            last_scrape_error: Arc::new(
                FamilyDesc::gauge(
                    exporter("last_scrape_error"),
                    "Whether the last scrape hit any error (1 for error, 0 for success).",
                    &[],
                )
                .lifetime(),
            ),
            scrape_errors_total: Arc::new(FamilyDesc::counter(
                exporter("scrape_errors_total"),
                "Total number of scrape errors per collector.",
                &["collector"],
            )),
            phase_duration: Arc::new(FamilyDesc::histogram(
                exporter("phase_duration_seconds"),
                "Time spent per scrape phase.",
                &["phase"],
                PHASE_BUCKETS,
            )),
            up: Arc::new(FamilyDesc::gauge(
                format!("{NAMESPACE}_up"),
                "Whether the database target is up.",
                &["database", "dbinstance"],
            )),
            used_times: Arc::new(FamilyDesc::gauge(
                format!("{NAMESPACE}_collect_used_times"),
                "Seconds spent per collection step and endpoint.",
                &["ipport", "svname", "column"],
            )),
        }
    }
}
