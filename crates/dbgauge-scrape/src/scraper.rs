//! Scrape orchestration and the single-flight gate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use dbgauge_connect::{ConnectionManager, ProbeError, ProbeMode, ProbeSample, Prober};
use dbgauge_core::{CollectOptions, Driver, TargetSet};
use dbgauge_metrics::{MetricSnapshot, MetricStore, ScrapeWriter};
use dbgauge_query::Builtins;
use dbgauge_registry::TargetRegistry;

use crate::collect::{CollectContext, Collected, collect_target};
use crate::error::ScrapeError;
use crate::families::{ERROR_CATEGORIES, ExporterFamilies};
use crate::timeout::ScrapeTimeout;

// ── Outcome ────────────────────────────────────────────────────────

/// Counts describing one scrape run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    /// Targets in the snapshot the run used.
    pub targets: usize,
    pub up: usize,
    /// Targets that reported a connect failure (placeholders included).
    pub down: usize,
    /// Targets still connecting when the deadline passed.
    pub timed_out: usize,
    /// Connected targets whose collection the deadline cut short.
    pub truncated: usize,
    pub duration: Duration,
    pub options: CollectOptions,
}

/// What a scrape request gets back. Shared by every request joined to the run.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub snapshot: MetricSnapshot,
    pub error: Option<ScrapeError>,
    pub report: ScrapeReport,
}

// ── Single flight ──────────────────────────────────────────────────

struct Flight {
    id: u64,
    options: CollectOptions,
    done: watch::Receiver<Option<Arc<ScrapeOutcome>>>,
}

/// Removes a flight from the table when its run ends, also on panic.
struct FlightGuard<'a> {
    scraper: &'a Scraper,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.scraper.flights).retain(|f| f.id != self.id);
    }
}

// ── Scraper ────────────────────────────────────────────────────────

/// Runs scrapes over the registry's current targets into one store.
pub struct Scraper {
    registry: Arc<TargetRegistry>,
    store: Arc<MetricStore>,
    connections: ConnectionManager,
    builtins: Arc<Builtins>,
    timeout: ScrapeTimeout,
    defaults: CollectOptions,
    families: Arc<ExporterFamilies>,
    prober: Prober,
    /// Held for the whole of a run; runs never overlap on the store.
    run_lock: tokio::sync::Mutex<()>,
    flights: Mutex<Vec<Flight>>,
    next_flight: AtomicU64,
    /// Samples of the last connectivity probe, republished after every reset.
    last_probe: Mutex<Vec<ProbeSample>>,
}

impl Scraper {
    pub fn new(registry: Arc<TargetRegistry>, driver: Arc<dyn Driver>) -> Self {
        Self {
            registry,
            store: Arc::new(MetricStore::new()),
            prober: Prober::new(ProbeMode::InProcess(Arc::clone(&driver))),
            connections: ConnectionManager::new(driver),
            builtins: Arc::new(Builtins::postgres()),
            timeout: ScrapeTimeout::default(),
            defaults: CollectOptions::default(),
            families: Arc::new(ExporterFamilies::new()),
            run_lock: tokio::sync::Mutex::new(()),
            flights: Mutex::new(Vec::new()),
            next_flight: AtomicU64::new(0),
            last_probe: Mutex::new(Vec::new()),
        }
    }

    /// Builder method: write into an existing store.
    pub fn with_store(self, store: Arc<MetricStore>) -> Self {
        Self { store, ..self }
    }

    /// Builder method: set the startup budget in seconds.
    pub fn with_timeout(self, secs: u64) -> Self {
        Self {
            timeout: ScrapeTimeout::new(secs),
            ..self
        }
    }

    /// Builder method: options every request is merged with.
    pub fn with_defaults(self, defaults: CollectOptions) -> Self {
        Self { defaults, ..self }
    }

    /// Builder method: choose where connectivity probes run.
    pub fn with_probe_mode(self, mode: ProbeMode) -> Self {
        Self {
            prober: Prober::new(mode),
            ..self
        }
    }

    /// Builder method: replace the built-in collector catalogue.
    pub fn with_builtins(self, builtins: Builtins) -> Self {
        Self {
            builtins: Arc::new(builtins),
            ..self
        }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn timeout(&self) -> &ScrapeTimeout {
        &self.timeout
    }

    pub fn defaults(&self) -> CollectOptions {
        self.defaults
    }

    pub fn families(&self) -> &ExporterFamilies {
        &self.families
    }

    /// Scrape every target with `options`.
    ///
    /// Joins a pending run with the same options; otherwise queues a new run
    /// behind the one in progress. The run itself lives in its own task, so
    /// dropping this future does not cancel it.
    pub async fn scrape(self: &Arc<Self>, options: CollectOptions) -> Arc<ScrapeOutcome> {
        let mut done = {
            let mut flights = lock(&self.flights);
            match flights.iter().find(|f| f.options == options) {
                Some(flight) => {
                    debug!(flight = flight.id, "joining pending scrape");
                    flight.done.clone()
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    flights.push(Flight {
                        id,
                        options,
                        done: rx.clone(),
                    });

                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let _running = this.run_lock.lock().await;
                        let guard = FlightGuard { scraper: &this, id };
                        let outcome = Arc::new(this.run_scrape(options).await);
                        drop(guard);
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let published = done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone());
        match published {
            Some(outcome) => outcome,
            None => {
                error!("scrape task ended without an outcome");
                Arc::new(ScrapeOutcome {
                    snapshot: self.store.render(),
                    error: Some(ScrapeError::Aborted),
                    report: ScrapeReport {
                        options,
                        ..ScrapeReport::default()
                    },
                })
            }
        }
    }

    /// One complete run. Callers hold `run_lock`.
    async fn run_scrape(&self, options: CollectOptions) -> ScrapeOutcome {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.timeout.duration())
            .unwrap_or_else(|| started + ScrapeTimeout::MAX);
        let targets = self.registry.current();
        let writer = self.store.reset_dynamic();
        self.prime(&writer, &targets);

        let mut report = ScrapeReport {
            targets: targets.len(),
            options,
            ..ScrapeReport::default()
        };

        if targets.is_empty() {
            error!("no targets configured, nothing to scrape");
            report.duration = started.elapsed();
            self.finish(report.duration, true);
            return ScrapeOutcome {
                snapshot: self.store.render(),
                error: Some(ScrapeError::NoTargets),
                report,
            };
        }

        let ctx = Arc::new(CollectContext::new(
            writer,
            Arc::clone(&self.store),
            Arc::clone(&self.builtins),
            Arc::clone(&targets),
            Arc::clone(&self.families),
            options,
            deadline,
        ));

        let mut tasks = JoinSet::new();
        self.connect_phase(&ctx, &targets, &mut tasks, &mut report).await;
        self.join_collectors(&ctx, tasks, &mut report).await;

        report.duration = started.elapsed();
        self.finish(report.duration, ctx.faults() > 0);
        info!(
            targets = report.targets,
            up = report.up,
            down = report.down,
            timed_out = report.timed_out,
            truncated = report.truncated,
            faults = ctx.faults(),
            elapsed_ms = report.duration.as_millis() as u64,
            "scrape finished"
        );

        ScrapeOutcome {
            snapshot: self.store.render(),
            error: None,
            report,
        }
    }

    /// Series every scrape starts with.
    fn prime(&self, writer: &ScrapeWriter, targets: &TargetSet) {
        for category in ERROR_CATEGORIES.iter().copied().chain(self.builtins.names()) {
            if let Err(e) = self
                .store
                .inc_counter(&self.families.scrape_errors_total, &[category], 0.0)
            {
                warn!(category, error = %e, "failed to initialise error counter");
            }
        }
        for sample in lock(&self.last_probe).iter() {
            self.publish_probe_sample(writer, sample);
        }
        for desc in targets.families() {
            if let Err(e) = writer.register(desc) {
                warn!(family = %desc.name, error = %e, "custom family not registered");
            }
        }
    }

    /// Connect to every target; each target's collector task starts as
    /// soon as it is connected.
    async fn connect_phase(
        &self,
        ctx: &Arc<CollectContext>,
        targets: &TargetSet,
        tasks: &mut JoinSet<Collected>,
        report: &mut ScrapeReport,
    ) {
        let started = Instant::now();
        let up = &self.families.up;
        let mut stream = self.connections.connect_all(targets.targets(), ctx.deadline);

        while let Some(outcome) = stream.next_before(ctx.deadline).await {
            let (ipport, svname) = outcome.target.endpoint();
            let secs = outcome.elapsed.as_secs_f64();
            match outcome.result {
                Ok(handle) => {
                    ctx.write(up, vec![handle.database.clone(), handle.instance.clone()], 1.0);
                    ctx.used_time(&ipport, &svname, "connect", secs);
                    report.up += 1;
                    tasks.spawn(collect_target(Arc::clone(ctx), handle));
                }
                Err(e) => {
                    let target = &outcome.target;
                    ctx.write(up, vec![target.database.clone(), target.instance.clone()], 0.0);
                    if let Some(category) = e.category() {
                        ctx.fault(category);
                    }
                    if !target.is_placeholder() {
                        ctx.used_time(&ipport, &svname, "connectfailed", secs);
                    }
                    report.down += 1;
                }
            }
        }

        for target in stream.unreported() {
            warn!(endpoint = %target.log_name(), "still connecting at the deadline, target skipped");
            ctx.write(up, vec![target.database.clone(), target.instance.clone()], 0.0);
            ctx.fault("connect_timeout");
            report.timed_out += 1;
        }

        self.observe_phase("connect", started.elapsed());
    }

    /// Wait for collector tasks until the deadline; stragglers are detached.
    ///
    /// Every target cut short by the deadline counts once under `deadline`,
    /// whether its task noticed the deadline itself or was detached.
    async fn join_collectors(&self, ctx: &CollectContext, mut tasks: JoinSet<Collected>, report: &mut ScrapeReport) {
        let started = Instant::now();
        loop {
            match timeout_at(ctx.deadline, tasks.join_next()).await {
                Ok(Some(Ok(Collected::Truncated))) => {
                    report.truncated += 1;
                    ctx.fault("deadline");
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "collector task failed");
                    ctx.fault("task");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = tasks.len(), "deadline reached, detaching collector tasks");
                    for _ in 0..tasks.len() {
                        ctx.fault("deadline");
                    }
                    report.truncated += tasks.len();
                    tasks.detach_all();
                    break;
                }
            }
        }
        self.observe_phase("collect", started.elapsed());
    }

    /// Lifetime bookkeeping after a run.
    fn finish(&self, elapsed: Duration, had_error: bool) {
        let f = &self.families;
        let results = [
            self.store.inc_counter(&f.scrapes_total, &[], 1.0),
            self.store
                .set_gauge(&f.last_scrape_duration, &[], elapsed.as_secs_f64()),
            self.store
                .set_gauge(&f.last_scrape_error, &[], if had_error { 1.0 } else { 0.0 }),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            warn!(error = %e, "lifetime metric not updated");
        }
        self.observe_phase("total", elapsed);
    }

    fn observe_phase(&self, phase: &str, elapsed: Duration) {
        if let Err(e) = self
            .store
            .observe(&self.families.phase_duration, &[phase], elapsed.as_secs_f64())
        {
            warn!(phase, error = %e, "phase duration not recorded");
        }
    }

    // ── Connectivity probe ─────────────────────────────────────────

    /// Probe every current target once and record the samples.
    ///
    /// Returns [`ProbeError::Busy`] while another probe is running.
    pub async fn test_connections(&self) -> Result<Vec<ProbeSample>, ProbeError> {
        let targets = self.registry.current();
        let samples = self
            .prober
            .run(targets.targets(), self.timeout.duration())
            .await?;
        info!(targets = targets.len(), samples = samples.len(), "connectivity probe finished");

        let writer = self.store.writer();
        for sample in &samples {
            self.publish_probe_sample(&writer, sample);
        }
        *lock(&self.last_probe) = samples.clone();
        Ok(samples)
    }

    fn publish_probe_sample(&self, writer: &ScrapeWriter, sample: &ProbeSample) {
        let labels = vec![
            sample.ipport.clone(),
            sample.svname.clone(),
            "connectsucc".to_string(),
        ];
        if let Err(e) = writer.upsert(&self.families.used_times, labels, sample.seconds) {
            debug!(error = %e, "probe sample not recorded");
        }
    }
}

impl std::fmt::Debug for Scraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scraper")
            .field("timeout", &self.timeout.get())
            .field("defaults", &self.defaults)
            .field("builtins", &self.builtins.len())
            .field("prober", &self.prober)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgauge_core::mock::{MockDriver, MockTarget};
    use dbgauge_core::{CustomQuerySpec, Feature, QueryResult, TargetDescriptor, Value};
    use dbgauge_query::{BuiltinCollector, Shape};

    const FAST: &str = "postgres://u:p@fast:5432/app";
    const SLOW: &str = "postgres://u:p@slow:5432/app";
    const BAD: &str = "postgres://u:p@bad:5432/app";

    static TEST_COLLECTORS: &[BuiltinCollector] = &[
        BuiltinCollector {
            name: "uptime",
            family: "uptime",
            help: "Uptime in days.",
            labels: &[],
            feature: Feature::Default,
            sql: "select uptime",
            shape: Shape::Single,
        },
        BuiltinCollector {
            name: "tablerows",
            family: "tablerows",
            help: "Rows per table.",
            labels: &["table_name"],
            feature: Feature::TableRows,
            sql: "select rows",
            shape: Shape::Labeled,
        },
    ];

    fn healthy() -> MockTarget {
        MockTarget::new()
            .query("select uptime", QueryResult::new(["days"]).with_row(vec![Value::Float(3.5)]))
            .query(
                "select rows",
                QueryResult::new(["table_name", "rows"])
                    .with_row(vec![Value::Text("Orders".into()), Value::Int(42)]),
            )
    }

    fn scraper(driver: &MockDriver, targets: Vec<TargetDescriptor>) -> Arc<Scraper> {
        let registry = Arc::new(TargetRegistry::new(TargetSet::new(targets).unwrap()));
        Arc::new(
            Scraper::new(registry, Arc::new(driver.clone()))
                .with_builtins(Builtins::new(TEST_COLLECTORS))
                .with_timeout(5),
        )
    }

    fn errors(snapshot: &MetricSnapshot, category: &str) -> Option<f64> {
        snapshot.value("dbgauge_exporter_scrape_errors_total", &[category])
    }

    #[tokio::test(start_paused = true)]
    async fn slow_target_does_not_hold_the_scrape() {
        let driver = MockDriver::new()
            .with_target(FAST, healthy())
            .with_target(SLOW, healthy().connect_delay(Duration::from_secs(60)));
        let scraper = scraper(
            &driver,
            vec![
                TargetDescriptor::new(FAST).with_names("app", "fast"),
                TargetDescriptor::new(SLOW).with_names("app", "slow"),
            ],
        );

        let started = Instant::now();
        let outcome = scraper.scrape(CollectOptions::default()).await;
        assert!(started.elapsed() <= Duration::from_secs(6));

        let snap = &outcome.snapshot;
        assert_eq!(snap.value("dbgauge_up", &["app", "fast"]), Some(1.0));
        assert_eq!(snap.value("dbgauge_up", &["app", "slow"]), Some(0.0));
        assert_eq!(snap.value("dbgauge_uptime", &["app", "fast"]), Some(3.5));
        assert_eq!(outcome.report.up, 1);
        assert_eq!(outcome.report.down + outcome.report.timed_out, 1);
        assert_eq!(snap.value("dbgauge_exporter_last_scrape_error", &[]), Some(1.0));
        assert!(outcome.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collector_is_cut_at_the_deadline() {
        let driver = MockDriver::new().with_target(
            FAST,
            healthy().slow_query(
                "select rows",
                Duration::from_secs(60),
                QueryResult::new(["table_name", "rows"]),
            ),
        );
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST).with_names("app", "fast")]);
        let options = CollectOptions {
            tablerows: true,
            ..CollectOptions::default()
        };

        let started = Instant::now();
        let outcome = scraper.scrape(options).await;
        assert!(started.elapsed() <= Duration::from_secs(6));

        let snap = &outcome.snapshot;
        assert_eq!(snap.value("dbgauge_up", &["app", "fast"]), Some(1.0));
        assert_eq!(snap.value("dbgauge_uptime", &["app", "fast"]), Some(3.5));
        assert_eq!(snap.series_count("dbgauge_tablerows"), 0);
        assert_eq!(outcome.report.up, 1);
        assert_eq!(outcome.report.truncated, 1);
        assert_eq!(errors(snap, "deadline"), Some(1.0));
        assert_eq!(snap.value("dbgauge_exporter_last_scrape_error", &[]), Some(1.0));

        // The cut-off task still hands its connection back.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_startup_timeout_is_clamped() {
        let driver = MockDriver::new().with_target(FAST, healthy());
        let registry = Arc::new(TargetRegistry::new(
            TargetSet::new(vec![TargetDescriptor::new(FAST).with_names("app", "fast")]).unwrap(),
        ));
        let scraper = Arc::new(
            Scraper::new(registry, Arc::new(driver))
                .with_builtins(Builtins::new(TEST_COLLECTORS))
                .with_timeout(u64::MAX),
        );
        assert_eq!(scraper.timeout().get(), ScrapeTimeout::MAX_SECS);

        let outcome = scraper.scrape(CollectOptions::default()).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.snapshot.value("dbgauge_exporter_scrapes_total", &[]), Some(1.0));
        assert_eq!(outcome.snapshot.value("dbgauge_uptime", &["app", "fast"]), Some(3.5));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_target_runs_no_collectors() {
        let driver = MockDriver::new()
            .with_target(FAST, healthy())
            .with_target(BAD, MockTarget::new().connect_error("connection refused"));
        let scraper = scraper(
            &driver,
            vec![
                TargetDescriptor::new(FAST).with_names("app", "fast"),
                TargetDescriptor::new(BAD).with_names("app", "bad"),
            ],
        );

        let outcome = scraper.scrape(CollectOptions::default()).await;
        let snap = &outcome.snapshot;

        assert!(driver.executed_on(BAD).is_empty());
        assert_eq!(driver.executed_on(FAST), vec!["select uptime"]);
        assert_eq!(snap.value("dbgauge_up", &["app", "bad"]), Some(0.0));
        assert_eq!(errors(snap, "connect"), Some(1.0));
        assert_eq!(
            snap.value("dbgauge_collect_used_times", &["bad:5432", "app", "connectfailed"]),
            Some(0.0)
        );
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_scrape_clears_error_flag() {
        let driver = MockDriver::new().with_target(FAST, healthy().identity("app", "discovered"));
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST)]);

        let outcome = scraper.scrape(CollectOptions::default()).await;
        let snap = &outcome.snapshot;

        assert_eq!(snap.value("dbgauge_up", &["app", "discovered"]), Some(1.0));
        assert_eq!(snap.value("dbgauge_exporter_last_scrape_error", &[]), Some(0.0));
        assert_eq!(snap.value("dbgauge_exporter_scrapes_total", &[]), Some(1.0));
        for category in ERROR_CATEGORIES.iter().copied().chain(["uptime", "tablerows"]) {
            assert_eq!(errors(snap, category), Some(0.0), "{category}");
        }
        for column in ["connect", "default", "custom", "scrape_total"] {
            assert!(
                snap.value("dbgauge_collect_used_times", &["fast:5432", "app", column]).is_some(),
                "{column}"
            );
        }
        // Heavy collectors stay off unless requested.
        assert!(snap.value("dbgauge_collect_used_times", &["fast:5432", "app", "tablerows"]).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_label_mismatch_only_drops_its_query() {
        let driver = MockDriver::new().with_target(
            FAST,
            healthy()
                .query("select broken", QueryResult::new(["v"]).with_row(vec![Value::Int(1)]))
                .query(
                    "select good",
                    QueryResult::new(["name", "v"]).with_row(vec![Value::Text("x".into()), Value::Int(7)]),
                ),
        );
        let target = TargetDescriptor::new(FAST)
            .with_names("app", "fast")
            .with_query(
                CustomQuerySpec::new("broken", "select broken")
                    .with_metrics(["v"])
                    .with_labels(["missing_col"]),
            )
            .with_query(
                CustomQuerySpec::new("good", "select good")
                    .with_metrics(["v"])
                    .with_labels(["name"]),
            );
        let scraper = scraper(&driver, vec![target]);

        let outcome = scraper.scrape(CollectOptions::default()).await;
        let snap = &outcome.snapshot;

        assert_eq!(snap.series_count("dbgauge_custom_broken"), 0);
        assert!(snap.family("dbgauge_custom_broken").is_some());
        assert_eq!(
            snap.value("dbgauge_custom_good", &["x", "v", "app", "fast", "1"]),
            Some(7.0)
        );
        assert_eq!(errors(snap, "custom_labels"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn scrape_keeps_its_target_snapshot_across_reload() {
        let other = "postgres://u:p@other:5432/app";
        let driver = MockDriver::new()
            .with_target(
                FAST,
                MockTarget::new().slow_query(
                    "select uptime",
                    Duration::from_secs(2),
                    QueryResult::new(["days"]).with_row(vec![Value::Int(1)]),
                ),
            )
            .with_target(other, healthy());
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST).with_names("app", "fast")]);

        let running = {
            let scraper = Arc::clone(&scraper);
            tokio::spawn(async move { scraper.scrape(CollectOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        scraper.registry().swap(
            TargetSet::new(vec![TargetDescriptor::new(other).with_names("app", "other")]).unwrap(),
        );

        let outcome = running.await.unwrap();
        let snap = &outcome.snapshot;
        assert_eq!(outcome.report.targets, 1);
        assert_eq!(snap.value("dbgauge_up", &["app", "fast"]), Some(1.0));
        assert_eq!(snap.value("dbgauge_uptime", &["app", "fast"]), Some(1.0));
        assert!(snap.value("dbgauge_up", &["app", "other"]).is_none());
        assert!(driver.executed_on(other).is_empty());

        let next = scraper.scrape(CollectOptions::default()).await;
        assert!(next.snapshot.value("dbgauge_up", &["app", "fast"]).is_none());
        assert_eq!(next.snapshot.value("dbgauge_up", &["app", "other"]), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_scrapes_with_same_options_share_one_run() {
        let driver = MockDriver::new().with_target(FAST, healthy());
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST).with_names("app", "fast")]);

        let options = CollectOptions::default();
        let (a, b) = tokio::join!(scraper.scrape(options), scraper.scrape(options));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(driver.connects(), 1);
        assert_eq!(a.snapshot.value("dbgauge_exporter_scrapes_total", &[]), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn scrapes_with_different_options_run_one_after_another() {
        let driver = MockDriver::new().with_target(
            FAST,
            healthy().slow_query(
                "select uptime",
                Duration::from_secs(1),
                QueryResult::new(["days"]).with_row(vec![Value::Int(1)]),
            ),
        );
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST).with_names("app", "fast")]);

        let heavy = CollectOptions {
            tablerows: true,
            ..CollectOptions::default()
        };
        let started = Instant::now();
        let (plain, with_rows) = tokio::join!(
            scraper.scrape(CollectOptions::default()),
            scraper.scrape(heavy)
        );

        assert!(!Arc::ptr_eq(&plain, &with_rows));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(driver.connects(), 2);
        assert_eq!(
            with_rows.snapshot.value("dbgauge_tablerows", &["app", "fast", "orders"]),
            Some(42.0)
        );
        assert!(plain.snapshot.family("dbgauge_tablerows").is_none());
        assert_eq!(
            scraper.store().render().value("dbgauge_exporter_scrapes_total", &[]),
            Some(2.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_set_still_yields_a_snapshot() {
        let driver = MockDriver::new();
        let scraper = scraper(&driver, Vec::new());

        let outcome = scraper.scrape(CollectOptions::default()).await;
        assert_eq!(outcome.error, Some(ScrapeError::NoTargets));
        assert_eq!(outcome.snapshot.value("dbgauge_exporter_last_scrape_error", &[]), Some(1.0));
        assert_eq!(outcome.snapshot.value("dbgauge_exporter_scrapes_total", &[]), Some(1.0));
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_samples_survive_later_scrapes() {
        let driver = MockDriver::new().with_target(FAST, healthy().identity("app", "fast"));
        let scraper = scraper(&driver, vec![TargetDescriptor::new(FAST)]);

        let samples = scraper.test_connections().await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].ipport, "fast:5432");
        assert_eq!(samples[0].svname, "app");

        let outcome = scraper.scrape(CollectOptions::default()).await;
        assert!(
            outcome
                .snapshot
                .value("dbgauge_collect_used_times", &["fast:5432", "app", "connectsucc"])
                .is_some()
        );
    }
}
