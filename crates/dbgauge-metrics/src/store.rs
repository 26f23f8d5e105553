//! Concurrency-safe store of labeled series.
//!
//! Dynamic families sit in a map behind an `RwLock`; each family guards its
//! own series with a `Mutex`. Writers take the map read lock (the write lock
//! only when a family is created), so writers to different families never
//! contend and a render only waits for the short per-family copies.
//!
//! Every dynamic write carries the epoch of the scrape that produced it.
//! `reset_dynamic` bumps the epoch under the map write lock, so a write either
//! lands before the reset (and is cleared with it) or is rejected as stale.
//!
//! Lifetime families live in a `prometheus` registry; see [`crate::lifetime`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use prometheus::Registry;
use prometheus::proto::MetricFamily;
use tracing::{debug, warn};

use dbgauge_core::{CollectOptions, FamilyDesc, MetricKind, Scope};

use crate::error::{StoreError, StoreResult};
use crate::lifetime::LifetimeFamily;

// ── Dynamic families ───────────────────────────────────────────────

struct Family {
    desc: Arc<FamilyDesc>,
    series: Mutex<BTreeMap<Vec<String>, f64>>,
}

impl Family {
    fn new(desc: Arc<FamilyDesc>) -> Self {
        Self {
            desc,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    fn series(&self) -> MutexGuard<'_, BTreeMap<Vec<String>, f64>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Named, labeled series shared by every scrape of the process.
pub struct MetricStore {
    families: RwLock<BTreeMap<String, Arc<Family>>>,
    epoch: AtomicU64,
    lifetime: RwLock<BTreeMap<String, LifetimeFamily>>,
    registry: Registry,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self {
            families: RwLock::new(BTreeMap::new()),
            epoch: AtomicU64::new(0),
            lifetime: RwLock::new(BTreeMap::new()),
            registry: Registry::new(),
        }
    }

    /// Current scrape epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Drop every dynamic family and start a new epoch.
    ///
    /// Lifetime families are untouched. The returned writer is the only way
    /// to write dynamic series for the new scrape.
    pub fn reset_dynamic(self: &Arc<Self>) -> ScrapeWriter {
        let mut families = self.write_families();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let dropped = families.len();
        families.clear();
        debug!(epoch, dropped, "dynamic series reset");
        ScrapeWriter {
            store: Arc::clone(self),
            epoch,
        }
    }

    /// Writer for the current epoch, without resetting anything.
    ///
    /// Used for out-of-band writes between scrapes; the next
    /// `reset_dynamic` invalidates it like any other writer.
    pub fn writer(self: &Arc<Self>) -> ScrapeWriter {
        ScrapeWriter {
            store: Arc::clone(self),
            epoch: self.epoch(),
        }
    }

    /// Add `by` to a lifetime counter.
    pub fn inc_counter(&self, desc: &Arc<FamilyDesc>, labels: &[&str], by: f64) -> StoreResult<()> {
        self.lifetime(desc, labels.len())?.inc(labels, by)
    }

    /// Set a lifetime gauge.
    pub fn set_gauge(&self, desc: &Arc<FamilyDesc>, labels: &[&str], value: f64) -> StoreResult<()> {
        self.lifetime(desc, labels.len())?.set(labels, value)
    }

    /// Record one observation into a lifetime histogram.
    pub fn observe(&self, desc: &Arc<FamilyDesc>, labels: &[&str], value: f64) -> StoreResult<()> {
        self.lifetime(desc, labels.len())?.observe(labels, value)
    }

    /// Copy out every family and series.
    pub fn render(&self) -> MetricSnapshot {
        let mut families: Vec<FamilySnapshot> = self
            .read_families()
            .values()
            .map(|family| FamilySnapshot {
                desc: Arc::clone(&family.desc),
                samples: family
                    .series()
                    .iter()
                    .map(|(labels, v)| Sample {
                        labels: labels.clone(),
                        value: SampleValue::Scalar(*v),
                    })
                    .collect(),
            })
            .collect();

        let gathered = self.registry.gather();
        {
            let lifetime = self.read_lifetime();
            for family in &gathered {
                match lifetime.get(family.get_name()) {
                    Some(registered) => families.push(registered.snapshot(family)),
                    None => warn!(family = family.get_name(), "gathered family has no descriptor"),
                }
            }
        }
        families.sort_by(|a, b| a.desc.name.cmp(&b.desc.name));

        MetricSnapshot {
            families,
            lifetime: gathered,
        }
    }

    // ── internals ──────────────────────────────────────────────────

    fn read_families(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Family>>> {
        self.families.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_families(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Family>>> {
        self.families.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_lifetime(&self) -> RwLockReadGuard<'_, BTreeMap<String, LifetimeFamily>> {
        self.lifetime.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find or register the lifetime family for `desc`.
    fn lifetime(&self, desc: &Arc<FamilyDesc>, arity: usize) -> StoreResult<LifetimeFamily> {
        if desc.scope != Scope::Lifetime {
            return Err(StoreError::WrongScope(desc.name.clone()));
        }
        check_arity(desc, arity)?;
        if let Some(family) = self.read_lifetime().get(&desc.name) {
            return check_lifetime(family, desc);
        }

        let mut lifetime = self.lifetime.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(family) = lifetime.get(&desc.name) {
            return check_lifetime(family, desc);
        }
        let family = LifetimeFamily::register(&self.registry, desc)?;
        lifetime.insert(desc.name.clone(), family.clone());
        Ok(family)
    }
}

impl std::fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricStore")
            .field("epoch", &self.epoch())
            .field("families", &self.read_families().len())
            .field("lifetime", &self.read_lifetime().len())
            .finish()
    }
}

fn check_desc(family: &Arc<Family>, desc: &FamilyDesc) -> StoreResult<Arc<Family>> {
    if *family.desc != *desc {
        return Err(StoreError::Conflict(desc.name.clone()));
    }
    Ok(Arc::clone(family))
}

fn check_lifetime(family: &LifetimeFamily, desc: &FamilyDesc) -> StoreResult<LifetimeFamily> {
    if *family.desc != *desc {
        return Err(StoreError::Conflict(desc.name.clone()));
    }
    Ok(family.clone())
}

fn check_arity(desc: &FamilyDesc, got: usize) -> StoreResult<()> {
    if desc.labels.len() != got {
        return Err(StoreError::LabelArity {
            name: desc.name.clone(),
            expected: desc.labels.len(),
            got,
        });
    }
    Ok(())
}

// ── Scrape writer ──────────────────────────────────────────────────

/// Write handle for the dynamic series of one scrape.
///
/// Cheap to clone; every collector task of the scrape holds one.
#[derive(Clone)]
pub struct ScrapeWriter {
    store: Arc<MetricStore>,
    epoch: u64,
}

impl ScrapeWriter {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this writer still belongs to the store's current scrape.
    pub fn is_current(&self) -> bool {
        self.store.epoch() == self.epoch
    }

    /// Set the gauge series `(desc, labels)` to `value`; last write wins.
    pub fn upsert(&self, desc: &Arc<FamilyDesc>, labels: Vec<String>, value: f64) -> StoreResult<()> {
        if desc.scope != Scope::Dynamic {
            return Err(StoreError::WrongScope(desc.name.clone()));
        }
        if desc.kind != MetricKind::Gauge {
            return Err(StoreError::wrong_kind(desc, "upsert"));
        }
        check_arity(desc, labels.len())?;

        // Holding a map lock keeps `reset_dynamic` out until the write lands.
        {
            let families = self.store.read_families();
            self.check_epoch(desc)?;
            if let Some(family) = families.get(&desc.name) {
                check_desc(family, desc)?
                    .series()
                    .insert(labels, value);
                return Ok(());
            }
        }

        let mut families = self.store.write_families();
        self.check_epoch(desc)?;
        let family = families
            .entry(desc.name.clone())
            .or_insert_with(|| Arc::new(Family::new(Arc::clone(desc))));
        check_desc(family, desc)?
            .series()
            .insert(labels, value);
        Ok(())
    }

    /// Make sure a family exists for this scrape even if it ends up with no series.
    pub fn register(&self, desc: &Arc<FamilyDesc>) -> StoreResult<()> {
        if desc.scope != Scope::Dynamic {
            return Err(StoreError::WrongScope(desc.name.clone()));
        }
        let mut families = self.store.write_families();
        self.check_epoch(desc)?;
        let family = families
            .entry(desc.name.clone())
            .or_insert_with(|| Arc::new(Family::new(Arc::clone(desc))));
        check_desc(family, desc).map(|_| ())
    }

    /// Callers must hold a map lock so the epoch cannot move underneath them.
    fn check_epoch(&self, desc: &FamilyDesc) -> StoreResult<()> {
        let current = self.store.epoch();
        if current != self.epoch {
            return Err(StoreError::Stale {
                name: desc.name.clone(),
                epoch: self.epoch,
                current,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScrapeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeWriter").field("epoch", &self.epoch).finish()
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Value of one rendered series.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    Histogram {
        /// Cumulative counts per bucket, `+Inf` last.
        cumulative: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<String>,
    pub value: SampleValue,
}

#[derive(Debug, Clone)]
pub struct FamilySnapshot {
    pub desc: Arc<FamilyDesc>,
    pub samples: Vec<Sample>,
}

/// Immutable copy of the store at one instant, ordered by family name.
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    pub families: Vec<FamilySnapshot>,
    /// Lifetime families as gathered, for the text encoder.
    lifetime: Vec<MetricFamily>,
}

impl MetricSnapshot {
    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.desc.name == name)
    }

    /// Scalar value of the series `name{labels}`.
    pub fn value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        self.family(name)?
            .samples
            .iter()
            .find(|s| s.labels.iter().map(String::as_str).eq(labels.iter().copied()))
            .and_then(|s| match s.value {
                SampleValue::Scalar(v) => Some(v),
                SampleValue::Histogram { .. } => None,
            })
    }

    /// Number of series in family `name` (0 when absent).
    pub fn series_count(&self, name: &str) -> usize {
        self.family(name).map_or(0, |f| f.samples.len())
    }

    /// Prometheus text: the lifetime families, then the dynamic families
    /// `options` allows.
    pub fn to_prometheus(&self, options: &CollectOptions) -> String {
        let mut out = crate::exposition::encode_families(&self.lifetime);
        out.push_str(&crate::exposition::render_prometheus(self.families.iter().filter(|f| {
            f.desc.scope == Scope::Dynamic && options.renders(f.desc.feature)
        })));
        out
    }
}
