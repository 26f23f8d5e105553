//! dbgauge-registry — the active target set.
//!
//! Holds the current [`TargetSet`] behind an [`ArcSwap`]. Readers take an
//! `Arc` snapshot without locking and keep it for as long as they need it; a
//! reload parses a complete new set and swaps the pointer in one step, so a
//! reader observes either the old set or the new one, never a mix.
//!
//! # Architecture
//!
//! ```text
//! TargetRegistry
//!   ├── current() → Arc<TargetSet>   ← every scrape, lock-free
//!   ├── swap(set)                     ← tests, programmatic updates
//!   └── reload() → load(source) → swap   (parse failure keeps the old set)
//! ```
//!
//! Connections are never owned by the registry. Scrape tasks own their
//! handles, so retiring a set is only an `Arc` drop and never waits on a
//! database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{info, warn};

use dbgauge_core::{ConfigError, TargetSet};

/// Atomically swappable holder of the active [`TargetSet`].
pub struct TargetRegistry {
    current: ArcSwap<TargetSet>,
    /// File the set was loaded from; `None` for programmatic registries.
    source: Option<PathBuf>,
    /// Incremented on every successful swap.
    generation: AtomicU64,
    /// Serializes reloads so two concurrent reloads cannot swap out of order.
    reload_lock: Mutex<()>,
}

impl TargetRegistry {
    /// Create a registry holding `initial`, with no backing file.
    pub fn new(initial: TargetSet) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            source: None,
            generation: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    /// Load `path` and create a registry that reloads from it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let initial = Self::load(path)?;
        info!(path = ?path, targets = initial.len(), "target file loaded");
        Ok(Self {
            source: Some(path.to_path_buf()),
            ..Self::new(initial)
        })
    }

    /// Parse and validate a target file without touching any registry.
    pub fn load(source: &Path) -> Result<TargetSet, ConfigError> {
        TargetSet::from_file(source)
    }

    /// The active set. Cheap; never blocks.
    pub fn current(&self) -> Arc<TargetSet> {
        self.current.load_full()
    }

    /// Replace the active set and return the one it replaced.
    pub fn swap(&self, set: TargetSet) -> Arc<TargetSet> {
        let previous = self.current.swap(Arc::new(set));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            generation,
            previous_targets = previous.len(),
            targets = self.current.load().len(),
            "target set swapped"
        );
        previous
    }

    /// Re-read the backing file and swap it in.
    ///
    /// On any error the previous set stays active and the error is returned.
    pub fn reload(&self) -> Result<Arc<TargetSet>, ConfigError> {
        let Some(path) = self.source.as_deref() else {
            return Err(ConfigError::Validation(
                "registry has no target file to reload".to_string(),
            ));
        };

        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match Self::load(path) {
            Ok(set) => {
                self.swap(set);
                Ok(self.current())
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "target reload failed, keeping previous set");
                Err(e)
            }
        }
    }

    /// Number of successful swaps since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("source", &self.source)
            .field("generation", &self.generation())
            .field("targets", &self.current.load().len())
            .finish_non_exhaustive()
    }
}
