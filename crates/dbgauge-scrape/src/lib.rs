//! dbgauge-scrape — the scrape orchestrator.
//!
//! One scrape produces one consistent snapshot of every target:
//!
//! ```text
//! Scraper::scrape(options)
//!   ├── single-flight gate: same options share a run, others queue behind it
//!   └── run:
//!         registry.current()            ← one target snapshot for the whole run
//!         store.reset_dynamic()         ← new epoch, dynamic series cleared
//!         connect phase                 ← all targets in parallel, until deadline;
//!                                         each connected target starts its task at once:
//!               recovery → default → custom → tablerows → tablebytes → indexbytes → lobbytes
//!         join until deadline           ← late tasks are detached, not aborted
//!         lifetime counters, render
//! ```
//!
//! Local faults only cost their own series. The scrape always yields a
//! snapshot; the only scrape-wide error is an empty target set.

pub mod collect;
pub mod error;
pub mod families;
pub mod scraper;
pub mod timeout;

pub use error::{ScrapeError, TimeoutError};
pub use families::ExporterFamilies;
pub use scraper::{ScrapeOutcome, ScrapeReport, Scraper};
pub use timeout::ScrapeTimeout;
