//! Metric family descriptors and per-request collection options.

use serde::{Deserialize, Serialize};

use crate::naming::clean_name;
use crate::types::CustomQuerySpec;

/// Prefix of every exported metric name.
pub const NAMESPACE: &str = "dbgauge";

/// Labels appended to every custom family after the user-declared ones.
pub const CUSTOM_FIXED_LABELS: [&str; 4] = ["metric", "database", "dbinstance", "rownum"];

/// What a family holds. Each variant has its own series representation in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    Gauge,
    Counter,
    /// Cumulative histogram with the given upper bucket bounds (`+Inf` implied).
    Histogram { buckets: Vec<f64> },
}

impl MetricKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Histogram { .. } => "histogram",
        }
    }
}

/// Whether a family is cleared at the start of every scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Cleared by `reset_dynamic`; repopulated by each scrape.
    Dynamic,
    /// Lives for the whole process (scrape counters, timing histograms).
    Lifetime,
}

/// Optional collector groups, toggled per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Default,
    Recovery,
    TableRows,
    TableBytes,
    IndexBytes,
    LobBytes,
}

impl Feature {
    /// Query parameter / CLI flag name for this feature.
    pub fn flag(&self) -> &'static str {
        match self {
            Feature::Default => "defaultmetrics",
            Feature::Recovery => "recovery",
            Feature::TableRows => "tablerows",
            Feature::TableBytes => "tablebytes",
            Feature::IndexBytes => "indexbytes",
            Feature::LobBytes => "lobbytes",
        }
    }
}

/// Descriptor of one metric family: name, help, label schema and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyDesc {
    /// Fully qualified metric name (namespace included).
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    /// Label names in series order.
    pub labels: Vec<String>,
    pub scope: Scope,
    /// Feature gate; `None` families are always rendered.
    pub feature: Option<Feature>,
}

impl FamilyDesc {
    /// A per-scrape gauge.
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Gauge,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            scope: Scope::Dynamic,
            feature: None,
        }
    }

    /// A process-lifetime counter.
    pub fn counter(name: impl Into<String>, help: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            kind: MetricKind::Counter,
            scope: Scope::Lifetime,
            ..Self::gauge(name, help, labels)
        }
    }

    /// A process-lifetime histogram.
    pub fn histogram(
        name: impl Into<String>,
        help: impl Into<String>,
        labels: &[&str],
        buckets: &[f64],
    ) -> Self {
        Self {
            kind: MetricKind::Histogram {
                buckets: buckets.to_vec(),
            },
            scope: Scope::Lifetime,
            ..Self::gauge(name, help, labels)
        }
    }

    /// Builder method: keep this family across scrapes.
    pub fn lifetime(self) -> Self {
        Self {
            scope: Scope::Lifetime,
            ..self
        }
    }

    /// Builder method: only render this family when `feature` is enabled.
    pub fn with_feature(self, feature: Feature) -> Self {
        Self {
            feature: Some(feature),
            ..self
        }
    }

    /// The family a custom query writes into.
    pub fn custom(spec: &CustomQuerySpec) -> Self {
        let mut labels = spec.label_names();
        labels.extend(CUSTOM_FIXED_LABELS.iter().map(|l| l.to_string()));
        let help = if spec.help.is_empty() {
            format!("Custom query {}.", spec.name)
        } else {
            spec.help.clone()
        };
        Self {
            name: format!("{NAMESPACE}_custom_{}", clean_name(&spec.name)),
            help,
            kind: MetricKind::Gauge,
            labels,
            scope: Scope::Dynamic,
            feature: None,
        }
    }
}

/// Which optional collector groups run (and render) for one scrape request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOptions {
    pub default_metrics: bool,
    pub recovery: bool,
    pub tablerows: bool,
    pub tablebytes: bool,
    pub indexbytes: bool,
    pub lobbytes: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            default_metrics: true,
            recovery: false,
            tablerows: false,
            tablebytes: false,
            indexbytes: false,
            lobbytes: false,
        }
    }
}

impl CollectOptions {
    /// Whether collectors gated on `feature` run for this request.
    pub fn enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Default => self.default_metrics,
            Feature::Recovery => self.recovery,
            Feature::TableRows => self.tablerows,
            Feature::TableBytes => self.tablebytes,
            Feature::IndexBytes => self.indexbytes,
            Feature::LobBytes => self.lobbytes,
        }
    }

    /// Whether a family with the given gate should be rendered.
    pub fn renders(&self, feature: Option<Feature>) -> bool {
        feature.is_none_or(|f| self.enabled(f))
    }

    /// Union of two option sets: a group runs if either side enables it.
    pub fn union(&self, other: &CollectOptions) -> CollectOptions {
        CollectOptions {
            default_metrics: self.default_metrics || other.default_metrics,
            recovery: self.recovery || other.recovery,
            tablerows: self.tablerows || other.tablerows,
            tablebytes: self.tablebytes || other.tablebytes,
            indexbytes: self.indexbytes || other.indexbytes,
            lobbytes: self.lobbytes || other.lobbytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_family_schema() {
        let spec = CustomQuerySpec::new("Slow Tables", "select 1")
            .with_metrics(["seq_scan"])
            .with_labels(["Table Name"]);
        let desc = FamilyDesc::custom(&spec);
        assert_eq!(desc.name, "dbgauge_custom_slow_tables");
        assert_eq!(
            desc.labels,
            vec!["table_name", "metric", "database", "dbinstance", "rownum"]
        );
        assert_eq!(desc.scope, Scope::Dynamic);
        assert_eq!(desc.help, "Custom query Slow Tables.");
    }

    #[test]
    fn options_gate_features() {
        let opts = CollectOptions::default();
        assert!(opts.enabled(Feature::Default));
        assert!(!opts.enabled(Feature::TableRows));
        assert!(opts.renders(None));
        assert!(!opts.renders(Some(Feature::LobBytes)));

        let request = CollectOptions {
            default_metrics: false,
            tablerows: true,
            ..CollectOptions::default()
        };
        let merged = opts.union(&request);
        assert!(merged.default_metrics);
        assert!(merged.tablerows);
        assert!(!merged.recovery);
    }

    #[test]
    fn counter_and_histogram_are_lifetime() {
        assert_eq!(FamilyDesc::counter("c", "h", &[]).scope, Scope::Lifetime);
        let h = FamilyDesc::histogram("h", "h", &["phase"], &[0.1, 1.0]);
        assert_eq!(h.scope, Scope::Lifetime);
        assert_eq!(h.kind.type_name(), "histogram");
    }
}
