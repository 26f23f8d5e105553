//! Runtime-adjustable scrape budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::TimeoutError;

/// Scrape budget in whole seconds, shared by every scrape.
#[derive(Debug)]
pub struct ScrapeTimeout {
    secs: AtomicU64,
}

impl Default for ScrapeTimeout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SECS)
    }
}

impl ScrapeTimeout {
    pub const DEFAULT_SECS: u64 = 5;
    /// Exclusive bounds: a budget lies strictly between these.
    pub const LOWER: i64 = 1;
    pub const UPPER: i64 = 15;
    /// Smallest and largest accepted budgets, in seconds.
    pub const MIN_SECS: u64 = Self::LOWER as u64 + 1;
    pub const MAX_SECS: u64 = Self::UPPER as u64 - 1;
    pub const MAX: Duration = Duration::from_secs(Self::MAX_SECS);

    /// Startup value, clamped into the accepted range.
    pub fn new(secs: u64) -> Self {
        let clamped = secs.clamp(Self::MIN_SECS, Self::MAX_SECS);
        if clamped != secs {
            warn!(requested = secs, timeout = clamped, "scrape timeout out of range, clamped");
        }
        Self {
            secs: AtomicU64::new(clamped),
        }
    }

    /// Check `secs` against the open interval (1, 15).
    pub fn validate(secs: i64) -> Result<u64, TimeoutError> {
        if secs <= Self::LOWER || secs >= Self::UPPER {
            return Err(TimeoutError::OutOfRange(secs));
        }
        Ok(secs as u64)
    }

    pub fn get(&self) -> u64 {
        self.secs.load(Ordering::Acquire)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.get())
    }

    /// Change the budget. Values outside the open interval (1, 15) are
    /// rejected and the current value is kept.
    pub fn set(&self, secs: i64) -> Result<u64, TimeoutError> {
        let secs = Self::validate(secs)?;
        let previous = self.secs.swap(secs, Ordering::AcqRel);
        info!(previous, timeout = secs, "scrape timeout changed");
        Ok(secs)
    }
}
