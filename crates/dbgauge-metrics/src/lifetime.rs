//! Process-lifetime families, backed by a `prometheus` registry.
//!
//! Counters, gauges and histograms that outlive a scrape are ordinary
//! `prometheus` vectors. They are registered once, on first write, and
//! gathered on every render.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

use dbgauge_core::{FamilyDesc, MetricKind};

use crate::error::{StoreError, StoreResult};
use crate::store::{FamilySnapshot, Sample, SampleValue};

#[derive(Clone)]
enum LifetimeMetric {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

/// One registered lifetime family.
#[derive(Clone)]
pub(crate) struct LifetimeFamily {
    pub desc: Arc<FamilyDesc>,
    metric: LifetimeMetric,
}

impl LifetimeFamily {
    /// Build the vector for `desc` and register it with `registry`.
    pub fn register(registry: &Registry, desc: &Arc<FamilyDesc>) -> StoreResult<Self> {
        let labels: Vec<&str> = desc.labels.iter().map(String::as_str).collect();
        let rejected = |e: prometheus::Error| registry_error(desc, e);

        let (metric, collector): (LifetimeMetric, Box<dyn Collector>) = match &desc.kind {
            MetricKind::Counter => {
                let v = CounterVec::new(Opts::new(desc.name.clone(), desc.help.clone()), &labels)
                    .map_err(rejected)?;
                (LifetimeMetric::Counter(v.clone()), Box::new(v))
            }
            MetricKind::Gauge => {
                let v = GaugeVec::new(Opts::new(desc.name.clone(), desc.help.clone()), &labels)
                    .map_err(rejected)?;
                (LifetimeMetric::Gauge(v.clone()), Box::new(v))
            }
            MetricKind::Histogram { buckets } => {
                let opts = HistogramOpts::new(desc.name.clone(), desc.help.clone()).buckets(buckets.clone());
                let v = HistogramVec::new(opts, &labels).map_err(rejected)?;
                (LifetimeMetric::Histogram(v.clone()), Box::new(v))
            }
        };
        registry.register(collector).map_err(rejected)?;

        Ok(Self {
            desc: Arc::clone(desc),
            metric,
        })
    }

    pub fn inc(&self, labels: &[&str], by: f64) -> StoreResult<()> {
        let LifetimeMetric::Counter(v) = &self.metric else {
            return Err(StoreError::wrong_kind(&self.desc, "increment"));
        };
        // CounterVec asserts on a negative increment.
        if by < 0.0 || by.is_nan() {
            return Err(StoreError::Registry {
                name: self.desc.name.clone(),
                reason: format!("counter increment {by} must not be negative"),
            });
        }
        v.get_metric_with_label_values(labels)
            .map_err(|e| registry_error(&self.desc, e))?
            .inc_by(by);
        Ok(())
    }

    pub fn set(&self, labels: &[&str], value: f64) -> StoreResult<()> {
        let LifetimeMetric::Gauge(v) = &self.metric else {
            return Err(StoreError::wrong_kind(&self.desc, "set"));
        };
        v.get_metric_with_label_values(labels)
            .map_err(|e| registry_error(&self.desc, e))?
            .set(value);
        Ok(())
    }

    pub fn observe(&self, labels: &[&str], value: f64) -> StoreResult<()> {
        let LifetimeMetric::Histogram(v) = &self.metric else {
            return Err(StoreError::wrong_kind(&self.desc, "observe"));
        };
        v.get_metric_with_label_values(labels)
            .map_err(|e| registry_error(&self.desc, e))?
            .observe(value);
        Ok(())
    }

    /// Copy a gathered family out, label values in declared order.
    pub fn snapshot(&self, gathered: &MetricFamily) -> FamilySnapshot {
        let samples = gathered
            .get_metric()
            .iter()
            .map(|m| {
                let labels = self
                    .desc
                    .labels
                    .iter()
                    .map(|name| {
                        m.get_label()
                            .iter()
                            .find(|pair| pair.get_name() == name.as_str())
                            .map(|pair| pair.get_value().to_string())
                            .unwrap_or_default()
                    })
                    .collect();
                let value = match &self.metric {
                    LifetimeMetric::Counter(_) => SampleValue::Scalar(m.get_counter().get_value()),
                    LifetimeMetric::Gauge(_) => SampleValue::Scalar(m.get_gauge().get_value()),
                    LifetimeMetric::Histogram(_) => {
                        let h = m.get_histogram();
                        let mut cumulative: Vec<u64> =
                            h.get_bucket().iter().map(|b| b.get_cumulative_count()).collect();
                        cumulative.push(h.get_sample_count());
                        SampleValue::Histogram {
                            cumulative,
                            sum: h.get_sample_sum(),
                            count: h.get_sample_count(),
                        }
                    }
                };
                Sample { labels, value }
            })
            .collect();

        FamilySnapshot {
            desc: Arc::clone(&self.desc),
            samples,
        }
    }
}

fn registry_error(desc: &FamilyDesc, e: prometheus::Error) -> StoreError {
    StoreError::Registry {
        name: desc.name.clone(),
        reason: e.to_string(),
    }
}
