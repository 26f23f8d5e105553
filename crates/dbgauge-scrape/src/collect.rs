//! Per-target collection.
//!
//! One task per connected target runs its collectors one after another and
//! writes each result straight into the store. The task owns the target's
//! handle and releases it when it is done, whether or not the orchestrator
//! is still waiting for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use tracing::{debug, warn};

use dbgauge_connect::TargetHandle;
use dbgauge_core::{CollectOptions, FamilyDesc, Feature, TargetSet};
use dbgauge_metrics::{MetricStore, ScrapeWriter};
use dbgauge_query::{Builtins, Series, run_custom_query};

use crate::families::ExporterFamilies;

/// Collection steps in execution order; `None` is the custom query step.
const STEPS: &[(Option<Feature>, &str)] = &[
    (Some(Feature::Recovery), "recovery"),
    (Some(Feature::Default), "default"),
    (None, "custom"),
    (Some(Feature::TableRows), "tablerows"),
    (Some(Feature::TableBytes), "tablebytes"),
    (Some(Feature::IndexBytes), "indexbytes"),
    (Some(Feature::LobBytes), "lobbytes"),
];

/// How a target's collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected {
    /// Every enabled collector ran.
    Complete,
    /// The deadline passed before the last collector finished.
    Truncated,
    /// A newer scrape reset the store; remaining writes would be dropped.
    Superseded,
}

/// State shared by every collection task of one scrape.
pub struct CollectContext {
    pub writer: ScrapeWriter,
    pub store: Arc<MetricStore>,
    pub builtins: Arc<Builtins>,
    pub targets: Arc<TargetSet>,
    pub families: Arc<ExporterFamilies>,
    pub options: CollectOptions,
    pub deadline: Instant,
    faults: AtomicU64,
}

impl CollectContext {
    pub fn new(
        writer: ScrapeWriter,
        store: Arc<MetricStore>,
        builtins: Arc<Builtins>,
        targets: Arc<TargetSet>,
        families: Arc<ExporterFamilies>,
        options: CollectOptions,
        deadline: Instant,
    ) -> Self {
        Self {
            writer,
            store,
            builtins,
            targets,
            families,
            options,
            deadline,
            faults: AtomicU64::new(0),
        }
    }

    /// Count a local fault under `category`.
    pub fn fault(&self, category: &str) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self
            .store
            .inc_counter(&self.families.scrape_errors_total, &[category], 1.0)
        {
            warn!(error = %e, "failed to count scrape error");
        }
    }

    /// Faults counted so far.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Write one series. Returns `false` once this scrape's series were reset.
    pub fn write(&self, desc: &Arc<FamilyDesc>, labels: Vec<String>, value: f64) -> bool {
        match self.writer.upsert(desc, labels, value) {
            Ok(()) => true,
            Err(e) if e.is_stale() => {
                debug!(family = %desc.name, "scrape superseded, write dropped");
                false
            }
            Err(e) => {
                warn!(family = %desc.name, error = %e, "series rejected");
                self.fault("store");
                true
            }
        }
    }

    pub fn write_all(&self, desc: &Arc<FamilyDesc>, series: Vec<Series>) -> bool {
        series.into_iter().all(|s| self.write(desc, s.labels, s.value))
    }

    /// Record `collect_used_times{ipport,svname,column}`.
    pub fn used_time(&self, ipport: &str, svname: &str, column: &str, seconds: f64) -> bool {
        self.write(
            &self.families.used_times,
            vec![ipport.to_string(), svname.to_string(), column.to_string()],
            seconds,
        )
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Run every enabled collector for one target, then release its handle.
pub async fn collect_target(ctx: Arc<CollectContext>, mut handle: TargetHandle) -> Collected {
    let target = Arc::clone(&handle.target);
    let (ipport, svname) = target.endpoint();
    let started = Instant::now();

    let ended = 'steps: {
        for (feature, column) in STEPS {
            if feature.is_some_and(|f| !ctx.options.enabled(f)) {
                continue;
            }
            let step_started = Instant::now();

            match feature {
                Some(feature) => {
                    for (collector, desc) in ctx.builtins.group(*feature) {
                        if ctx.expired() {
                            debug!(endpoint = %target.log_name(), collector = collector.name, "deadline reached, collection truncated");
                            break 'steps Collected::Truncated;
                        }
                        match collector.run(&mut handle, ctx.deadline).await {
                            Ok(series) => {
                                if !ctx.write_all(desc, series) {
                                    break 'steps Collected::Superseded;
                                }
                            }
                            Err(e) => match e.category() {
                                Some(category) => {
                                    warn!(endpoint = %target.log_name(), error = %e, "collector failed");
                                    ctx.fault(category);
                                }
                                None => break 'steps Collected::Truncated,
                            },
                        }
                    }
                }
                None => {
                    for spec in &target.queries {
                        if ctx.expired() {
                            debug!(endpoint = %target.log_name(), query = %spec.name, "deadline reached, collection truncated");
                            break 'steps Collected::Truncated;
                        }
                        let Some(desc) = ctx.targets.family(&spec.name) else {
                            warn!(query = %spec.name, "no family registered for custom query");
                            continue;
                        };
                        match run_custom_query(&mut handle, spec, ctx.deadline).await {
                            Ok(series) => {
                                if !ctx.write_all(desc, series) {
                                    break 'steps Collected::Superseded;
                                }
                            }
                            Err(e) => match e.category() {
                                Some(category) => ctx.fault(category),
                                None => break 'steps Collected::Truncated,
                            },
                        }
                    }
                }
            }

            if !ctx.used_time(&ipport, &svname, column, step_started.elapsed().as_secs_f64()) {
                break 'steps Collected::Superseded;
            }
        }
        Collected::Complete
    };

    ctx.used_time(&ipport, &svname, "scrape_total", started.elapsed().as_secs_f64());
    handle.release().await;
    debug!(endpoint = %target.log_name(), ?ended, elapsed_ms = started.elapsed().as_millis() as u64, "target collected");
    ended
}
