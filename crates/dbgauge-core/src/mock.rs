//! Scripted in-memory driver for tests.
//!
//! Each descriptor maps to a [`MockTarget`] describing how long connecting
//! takes, which step fails, and what each SQL text returns. The driver keeps
//! counters so tests can assert on connection lifetime and query traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::driver::{Connection, Driver, DriverError};
use crate::types::QueryResult;

/// Scripted behaviour of one SQL text.
#[derive(Debug, Clone)]
pub struct MockQuery {
    pub delay: Duration,
    pub result: Result<QueryResult, String>,
}

/// Scripted behaviour of one descriptor.
#[derive(Debug, Clone, Default)]
pub struct MockTarget {
    pub connect_delay: Duration,
    pub connect_error: Option<String>,
    pub ping_error: Option<String>,
    pub ping_delay: Duration,
    pub identity: Option<(String, String)>,
    pub queries: HashMap<String, MockQuery>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn connect_error(mut self, msg: &str) -> Self {
        self.connect_error = Some(msg.to_string());
        self
    }

    pub fn ping_error(mut self, msg: &str) -> Self {
        self.ping_error = Some(msg.to_string());
        self
    }

    pub fn ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub fn identity(mut self, database: &str, instance: &str) -> Self {
        self.identity = Some((database.to_string(), instance.to_string()));
        self
    }

    pub fn query(mut self, sql: &str, result: QueryResult) -> Self {
        self.queries.insert(
            sql.to_string(),
            MockQuery {
                delay: Duration::ZERO,
                result: Ok(result),
            },
        );
        self
    }

    pub fn slow_query(mut self, sql: &str, delay: Duration, result: QueryResult) -> Self {
        self.queries.insert(
            sql.to_string(),
            MockQuery {
                delay,
                result: Ok(result),
            },
        );
        self
    }

    pub fn failing_query(mut self, sql: &str, msg: &str) -> Self {
        self.queries.insert(
            sql.to_string(),
            MockQuery {
                delay: Duration::ZERO,
                result: Err(msg.to_string()),
            },
        );
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    open: AtomicUsize,
    closes: AtomicUsize,
    executed: Mutex<Vec<(String, String)>>,
}

/// A [`Driver`] answering from scripted [`MockTarget`]s.
#[derive(Debug, Default, Clone)]
pub struct MockDriver {
    targets: Arc<Mutex<HashMap<String, MockTarget>>>,
    counters: Arc<Counters>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: script a descriptor.
    pub fn with_target(self, descriptor: &str, target: MockTarget) -> Self {
        self.set_target(descriptor, target);
        self
    }

    /// Replace the script for a descriptor.
    pub fn set_target(&self, descriptor: &str, target: MockTarget) {
        lock(&self.targets).insert(descriptor.to_string(), target);
    }

    /// Total connect attempts.
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed or dropped.
    /// Connections handed back through `close` rather than dropped.
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// `(descriptor, sql)` pairs in execution order.
    pub fn executed(&self) -> Vec<(String, String)> {
        lock(&self.counters.executed).clone()
    }

    /// SQL texts executed against one descriptor.
    pub fn executed_on(&self, descriptor: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|(d, _)| d == descriptor)
            .map(|(_, sql)| sql)
            .collect()
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    async fn connect(&self, descriptor: &str) -> Result<Box<dyn Connection>, DriverError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.targets).get(descriptor).cloned();
        let Some(script) = script else {
            return Err(DriverError::Connect(format!("unknown host in {descriptor}")));
        };

        if !script.connect_delay.is_zero() {
            tokio::time::sleep(script.connect_delay).await;
        }
        if let Some(msg) = &script.connect_error {
            return Err(DriverError::Connect(msg.clone()));
        }

        self.counters.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            descriptor: descriptor.to_string(),
            script,
            counters: Arc::clone(&self.counters),
            closed: false,
        }))
    }
}

struct MockConnection {
    descriptor: String,
    script: MockTarget,
    counters: Arc<Counters>,
    closed: bool,
}

impl MockConnection {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn ping(&mut self) -> Result<(), DriverError> {
        if !self.script.ping_delay.is_zero() {
            tokio::time::sleep(self.script.ping_delay).await;
        }
        match &self.script.ping_error {
            Some(msg) => Err(DriverError::Ping(msg.clone())),
            None => Ok(()),
        }
    }

    async fn identity(&mut self) -> Result<(String, String), DriverError> {
        self.script
            .identity
            .clone()
            .ok_or_else(|| DriverError::Query("identity not available".to_string()))
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        lock(&self.counters.executed).push((self.descriptor.clone(), sql.to_string()));
        let Some(q) = self.script.queries.get(sql).cloned() else {
            return Err(DriverError::Query(format!("relation does not exist: {sql}")));
        };
        if !q.delay.is_zero() {
            tokio::time::sleep(q.delay).await;
        }
        q.result.map_err(DriverError::Query)
    }

    async fn close(mut self: Box<Self>) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.release();
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
