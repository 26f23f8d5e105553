//! Connectivity probe.
//!
//! A probe connects to every target, pings it and runs the identity query,
//! timing the whole sequence. It runs either in-process or in a child
//! process (`dbgauged --testconn`) that reports one line per reachable
//! target on stderr:
//!
//! ```text
//! query time postgres://u:p@db1:5432/app 250.5ms
//! query time postgres://u:p@db2:5432/app 1.5s
//! ```
//!
//! Only one probe runs at a time; a request arriving while one is running
//! is turned away rather than queued.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use dbgauge_core::{Driver, TargetDescriptor, split_conn_str};

use crate::error::{ConnectError, ConnectPhase};

/// Marker every protocol line contains.
pub const PROBE_MARKER: &str = "query time";

/// Elapsed value recorded when a line's elapsed token cannot be parsed.
pub const UNPARSABLE_ELAPSED: f64 = 999.0;

/// Extra time a child process gets beyond the probe timeout before it is killed.
const SUBPROCESS_SLACK: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("a connectivity probe is already running")]
    Busy,

    #[error("failed to run probe process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe process did not finish in time")]
    Timeout,
}

// ── Reports and samples ────────────────────────────────────────────

/// Outcome of probing one descriptor.
#[derive(Debug)]
pub struct ProbeReport {
    pub descriptor: String,
    pub elapsed: Duration,
    pub result: Result<(), ConnectError>,
}

impl ProbeReport {
    /// Protocol line for a successful probe; `None` when the probe failed.
    pub fn to_line(&self) -> Option<String> {
        self.result.as_ref().ok()?;
        Some(format!(
            "{PROBE_MARKER} {} {}",
            self.descriptor,
            format_elapsed(self.elapsed)
        ))
    }

    /// Parsed form of a successful probe.
    pub fn sample(&self) -> Option<ProbeSample> {
        self.result.as_ref().ok()?;
        let (ipport, svname) = split_conn_str(&self.descriptor);
        Some(ProbeSample {
            ipport,
            svname,
            seconds: self.elapsed.as_secs_f64(),
        })
    }
}

/// One timed, reachable endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSample {
    pub ipport: String,
    pub svname: String,
    pub seconds: f64,
}

/// `250.5ms` below one second, `1.5s` otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_micros() as f64 / 1000.0)
    } else {
        format!("{}s", elapsed.as_millis() as f64 / 1000.0)
    }
}

/// Parse probe output into samples.
///
/// Lines without the marker or with a field count other than four are
/// ignored. An elapsed token that does not parse yields
/// [`UNPARSABLE_ELAPSED`] for that endpoint.
pub fn parse_probe_output(output: &str) -> Vec<ProbeSample> {
    output
        .lines()
        .filter(|line| line.contains(PROBE_MARKER))
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim_end().split(' ').collect();
            if fields.len() != 4 {
                return None;
            }
            let (ipport, svname) = split_conn_str(fields[2]);
            Some(ProbeSample {
                ipport,
                svname,
                seconds: parse_elapsed(fields[3]).unwrap_or(UNPARSABLE_ELAPSED),
            })
        })
        .collect()
}

fn parse_elapsed(token: &str) -> Option<f64> {
    if let Some(ms) = token.strip_suffix("ms") {
        return ms.parse::<f64>().ok().map(|v| v / 1000.0);
    }
    token.replacen('s', "", 1).parse().ok()
}

// ── Probing ────────────────────────────────────────────────────────

/// Connect, ping and identify `descriptor` within `limit`.
pub async fn probe_target(driver: &dyn Driver, descriptor: &str, limit: Duration) -> ProbeReport {
    let started = Instant::now();
    let deadline = started + limit;

    let result = probe_sequence(driver, descriptor, deadline).await;

    ProbeReport {
        descriptor: descriptor.to_string(),
        elapsed: started.elapsed(),
        result,
    }
}

async fn probe_sequence(driver: &dyn Driver, descriptor: &str, deadline: Instant) -> Result<(), ConnectError> {
    let mut conn = timeout_at(deadline, driver.connect(descriptor))
        .await
        .map_err(|_| ConnectError::Timeout(ConnectPhase::Connect))??;

    let checked = async {
        timeout_at(deadline, conn.ping())
            .await
            .map_err(|_| ConnectError::Timeout(ConnectPhase::Ping))??;
        timeout_at(deadline, conn.identity())
            .await
            .map_err(|_| ConnectError::Timeout(ConnectPhase::Ping))??;
        Ok::<(), ConnectError>(())
    }
    .await;
    conn.close().await;
    checked
}

/// Probe every non-placeholder target concurrently.
pub async fn probe_all(
    driver: Arc<dyn Driver>,
    targets: &[Arc<TargetDescriptor>],
    limit: Duration,
) -> Vec<ProbeReport> {
    let mut tasks = JoinSet::new();
    for target in targets.iter().filter(|t| !t.is_placeholder()) {
        let driver = Arc::clone(&driver);
        let target = Arc::clone(target);
        tasks.spawn(async move {
            let report = probe_target(driver.as_ref(), &target.connection, limit).await;
            match &report.result {
                Ok(()) => info!(endpoint = %target.log_name(), elapsed = %format_elapsed(report.elapsed), "probe ok"),
                Err(e) => info!(endpoint = %target.log_name(), error = %e, "probe failed"),
            }
            report
        });
    }

    let mut reports = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "probe task failed"),
        }
    }
    reports
}

/// Where probes run.
#[derive(Clone)]
pub enum ProbeMode {
    InProcess(Arc<dyn Driver>),
    /// Re-run `program args… --timeout <secs>`, which prints protocol lines
    /// on stderr. The timeout is the limit of the run, not a startup value.
    Subprocess { program: PathBuf, args: Vec<String> },
}

/// Runs at most one probe at a time.
pub struct Prober {
    mode: ProbeMode,
    gate: Semaphore,
}

impl Prober {
    pub fn new(mode: ProbeMode) -> Self {
        Self {
            mode,
            gate: Semaphore::new(1),
        }
    }

    /// Probe `targets` once. Returns [`ProbeError::Busy`] when a probe is already running.
    pub async fn run(
        &self,
        targets: &[Arc<TargetDescriptor>],
        limit: Duration,
    ) -> Result<Vec<ProbeSample>, ProbeError> {
        let Ok(_permit) = self.gate.try_acquire() else {
            debug!("probe already running, request dropped");
            return Err(ProbeError::Busy);
        };

        match &self.mode {
            ProbeMode::InProcess(driver) => Ok(probe_all(Arc::clone(driver), targets, limit)
                .await
                .iter()
                .filter_map(ProbeReport::sample)
                .collect()),
            ProbeMode::Subprocess { program, args } => {
                let child = tokio::process::Command::new(program)
                    .args(args)
                    .arg("--timeout")
                    .arg(limit.as_secs().to_string())
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::piped())
                    .kill_on_drop(true)
                    .output();
                let output = timeout(limit + SUBPROCESS_SLACK, child)
                    .await
                    .map_err(|_| ProbeError::Timeout)??;
                let stderr = String::from_utf8_lossy(&output.stderr);
                let samples = parse_probe_output(&stderr);
                debug!(status = %output.status, samples = samples.len(), "probe process finished");
                Ok(samples)
            }
        }
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            ProbeMode::InProcess(_) => "in-process",
            ProbeMode::Subprocess { .. } => "subprocess",
        };
        f.debug_struct("Prober").field("mode", &mode).finish()
    }
}
