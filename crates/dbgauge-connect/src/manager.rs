//! Parallel connect phase.
//!
//! Every non-placeholder target gets its own task. Each task reports exactly
//! once into a channel whose capacity equals the number of targets, so a
//! report never waits for room even after the orchestrator stopped reading.
//! A handle whose report cannot be delivered is closed by its own task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use dbgauge_core::{Connection, Driver, DriverError, QueryResult, TargetDescriptor};

use crate::error::{ConnectError, ConnectPhase};

// ── Handle ─────────────────────────────────────────────────────────

/// A live connection to one target, owned by that target's collector task.
pub struct TargetHandle {
    pub target: Arc<TargetDescriptor>,
    /// Display name for the `database` label (configured or discovered).
    pub database: String,
    /// Display name for the `dbinstance` label (configured or discovered).
    pub instance: String,
    conn: Box<dyn Connection>,
}

impl TargetHandle {
    pub fn new(
        target: Arc<TargetDescriptor>,
        database: String,
        instance: String,
        conn: Box<dyn Connection>,
    ) -> Self {
        Self {
            target,
            database,
            instance,
            conn,
        }
    }

    /// Run `sql` on this target's connection.
    pub async fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        self.conn.query(sql).await
    }

    /// Close the connection.
    pub async fn release(self) {
        self.conn.close().await;
    }
}

impl std::fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetHandle")
            .field("target", &self.target.log_name())
            .field("database", &self.database)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

// ── Outcomes ───────────────────────────────────────────────────────

/// Result of the connect sequence for one target.
#[derive(Debug)]
pub struct ConnectOutcome {
    /// Position of the target in the slice passed to `connect_all`.
    pub index: usize,
    pub target: Arc<TargetDescriptor>,
    pub result: Result<TargetHandle, ConnectError>,
    pub elapsed: Duration,
}

/// Receiving side of one connect phase.
pub struct ConnectStream {
    rx: mpsc::Receiver<ConnectOutcome>,
    targets: Vec<Arc<TargetDescriptor>>,
    reported: Vec<bool>,
    remaining: usize,
}

impl ConnectStream {
    /// Next outcome, or `None` once every target reported or `deadline` passed.
    pub async fn next_before(&mut self, deadline: Instant) -> Option<ConnectOutcome> {
        if self.remaining == 0 {
            return None;
        }
        let outcome = match timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            // Every sender gone without reporting, or the deadline passed:
            // take only what is already queued.
            Ok(None) | Err(_) => self.rx.try_recv().ok()?,
        };
        self.mark(outcome.index);
        Some(outcome)
    }

    /// Targets that have not reported yet.
    pub fn unreported(&self) -> Vec<Arc<TargetDescriptor>> {
        self.targets
            .iter()
            .zip(&self.reported)
            .filter(|(_, done)| !**done)
            .map(|(t, _)| Arc::clone(t))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn mark(&mut self, index: usize) {
        if let Some(done) = self.reported.get_mut(index) {
            if !*done {
                *done = true;
                self.remaining -= 1;
            }
        }
    }
}

// ── Manager ────────────────────────────────────────────────────────

/// Opens connections for a target list through a [`Driver`].
#[derive(Clone)]
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Start connecting to every target; outcomes arrive as they finish.
    ///
    /// Placeholder targets report immediately without a task. Must be called
    /// from within a tokio runtime.
    pub fn connect_all(&self, targets: &[Arc<TargetDescriptor>], deadline: Instant) -> ConnectStream {
        let (tx, rx) = mpsc::channel(targets.len().max(1));

        for (index, target) in targets.iter().enumerate() {
            let target = Arc::clone(target);
            if target.is_placeholder() {
                let outcome = ConnectOutcome {
                    index,
                    target,
                    result: Err(ConnectError::Placeholder),
                    elapsed: Duration::ZERO,
                };
                // Capacity covers one report per target.
                let _ = tx.try_send(outcome);
                continue;
            }

            let driver = Arc::clone(&self.driver);
            let tx = tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = connect_one(driver.as_ref(), &target, deadline).await;
                let elapsed = started.elapsed();

                match &result {
                    Ok(_) => debug!(endpoint = %target.log_name(), elapsed_ms = elapsed.as_millis() as u64, "target connected"),
                    Err(e) => warn!(endpoint = %target.log_name(), error = %e, "target down"),
                }

                let outcome = ConnectOutcome {
                    index,
                    target,
                    result,
                    elapsed,
                };
                if let Err(unsent) = tx.try_send(outcome) {
                    let outcome = unsent.into_inner();
                    debug!(endpoint = %outcome.target.log_name(), "connect outcome arrived after the phase ended");
                    if let Ok(handle) = outcome.result {
                        handle.release().await;
                    }
                }
            });
        }

        ConnectStream {
            rx,
            reported: vec![false; targets.len()],
            remaining: targets.len(),
            targets: targets.to_vec(),
        }
    }
}

/// Connect, ping, then fill empty display names from the server.
async fn connect_one(
    driver: &dyn Driver,
    target: &Arc<TargetDescriptor>,
    deadline: Instant,
) -> Result<TargetHandle, ConnectError> {
    let mut conn = timeout_at(deadline, driver.connect(&target.connection))
        .await
        .map_err(|_| ConnectError::Timeout(ConnectPhase::Connect))??;

    match timeout_at(deadline, conn.ping()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            conn.close().await;
            return Err(e.into());
        }
        Err(_) => {
            conn.close().await;
            return Err(ConnectError::Timeout(ConnectPhase::Ping));
        }
    }

    let mut database = target.database.clone();
    let mut instance = target.instance.clone();
    if database.is_empty() || instance.is_empty() {
        match timeout_at(deadline, conn.identity()).await {
            Ok(Ok((db, inst))) => {
                if database.is_empty() {
                    database = db;
                }
                if instance.is_empty() {
                    instance = inst;
                }
            }
            Ok(Err(e)) => debug!(endpoint = %target.log_name(), error = %e, "identity discovery failed"),
            Err(_) => debug!(endpoint = %target.log_name(), "identity discovery hit the deadline"),
        }
    }

    Ok(TargetHandle::new(Arc::clone(target), database, instance, conn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgauge_core::mock::{MockDriver, MockTarget};

    fn target(descriptor: &str) -> Arc<TargetDescriptor> {
        Arc::new(TargetDescriptor::new(descriptor))
    }

    async fn drain(mut stream: ConnectStream, deadline: Instant) -> (Vec<ConnectOutcome>, ConnectStream) {
        let mut outcomes = Vec::new();
        while let Some(outcome) = stream.next_before(deadline).await {
            outcomes.push(outcome);
        }
        (outcomes, stream)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_target_is_left_unreported() {
        let driver = MockDriver::new()
            .with_target("pg://fast", MockTarget::new().identity("app", "db1"))
            .with_target(
                "pg://slow",
                MockTarget::new().connect_delay(Duration::from_secs(30)),
            );
        let manager = ConnectionManager::new(Arc::new(driver.clone()));
        let targets = vec![target("pg://fast"), target("pg://slow")];

        let started = Instant::now();
        let deadline = started + Duration::from_secs(5);
        let stream = manager.connect_all(&targets, deadline);
        let (outcomes, stream) = drain(stream, deadline).await;

        assert!(started.elapsed() <= Duration::from_secs(5) + Duration::from_millis(10));
        // The slow task reports its own timeout at the deadline, or not at all.
        let fast = outcomes.iter().find(|o| o.index == 0).unwrap();
        let handle = fast.result.as_ref().unwrap();
        assert_eq!(handle.database, "app");
        assert_eq!(handle.instance, "db1");
        let slow_reported = outcomes.iter().any(|o| o.index == 1);
        assert_eq!(stream.unreported().len(), usize::from(!slow_reported));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_target_reports_driver_error() {
        let driver = MockDriver::new()
            .with_target("pg://bad", MockTarget::new().connect_error("refused"))
            .with_target("pg://noping", MockTarget::new().ping_error("shutting down"));
        let manager = ConnectionManager::new(Arc::new(driver.clone()));
        let targets = vec![target("pg://bad"), target("pg://noping")];

        let deadline = Instant::now() + Duration::from_secs(5);
        let (outcomes, stream) = drain(manager.connect_all(&targets, deadline), deadline).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(stream.remaining(), 0);
        for outcome in &outcomes {
            let err = outcome.result.as_ref().unwrap_err();
            assert_eq!(err.category(), Some("connect"));
        }
        // The ping failure closed its connection.
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_timeout_closes_the_connection() {
        let driver = MockDriver::new().with_target(
            "pg://hung",
            MockTarget::new().ping_delay(Duration::from_secs(30)),
        );
        let manager = ConnectionManager::new(Arc::new(driver.clone()));
        let targets = vec![target("pg://hung")];

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut stream = manager.connect_all(&targets, deadline);
        // Wait past the deadline so the task's own timeout is reported.
        let outcome = stream.next_before(deadline + Duration::from_secs(1)).await.unwrap();

        assert_eq!(
            outcome.result.as_ref().unwrap_err(),
            &ConnectError::Timeout(ConnectPhase::Ping)
        );
        assert_eq!(driver.closes(), 1);
        assert_eq!(driver.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_never_connects() {
        let driver = MockDriver::new();
        let manager = ConnectionManager::new(Arc::new(driver.clone()));
        let targets = vec![target("")];

        let deadline = Instant::now() + Duration::from_secs(5);
        let (outcomes, _) = drain(manager.connect_all(&targets, deadline), deadline).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap_err(), &ConnectError::Placeholder);
        assert_eq!(outcomes[0].result.as_ref().unwrap_err().category(), None);
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_names_win_over_discovery() {
        let driver = MockDriver::new().with_target("pg://a", MockTarget::new().identity("found", "found-inst"));
        let manager = ConnectionManager::new(Arc::new(driver));
        let targets = vec![Arc::new(TargetDescriptor::new("pg://a").with_names("configured", ""))];

        let deadline = Instant::now() + Duration::from_secs(5);
        let (outcomes, _) = drain(manager.connect_all(&targets, deadline), deadline).await;

        let handle = outcomes[0].result.as_ref().unwrap();
        assert_eq!(handle.database, "configured");
        assert_eq!(handle.instance, "found-inst");
    }

    #[tokio::test(start_paused = true)]
    async fn identity_failure_keeps_target_up() {
        let driver = MockDriver::new().with_target("pg://a", MockTarget::new());
        let manager = ConnectionManager::new(Arc::new(driver));
        let targets = vec![target("pg://a")];

        let deadline = Instant::now() + Duration::from_secs(5);
        let (outcomes, _) = drain(manager.connect_all(&targets, deadline), deadline).await;

        let handle = outcomes[0].result.as_ref().unwrap();
        assert!(handle.database.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_handle_is_released_by_its_task() {
        let driver = MockDriver::new().with_target(
            "pg://slow",
            MockTarget::new().connect_delay(Duration::from_secs(2)),
        );
        let manager = ConnectionManager::new(Arc::new(driver.clone()));
        let targets = vec![target("pg://slow")];

        // The orchestrator gives up after one second; the task's own deadline is later.
        let stream = manager.connect_all(&targets, Instant::now() + Duration::from_secs(10));
        let (outcomes, stream) = drain(stream, Instant::now() + Duration::from_secs(1)).await;
        assert!(outcomes.is_empty());
        assert_eq!(stream.unreported().len(), 1);
        drop(stream);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(driver.connects(), 1);
        assert_eq!(driver.open_connections(), 0);
    }
}
