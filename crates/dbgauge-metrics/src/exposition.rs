//! Prometheus text exposition format.
//!
//! Renders store snapshots into the Prometheus text exposition format
//! (version 0.0.4) for scraping by a Prometheus server or compatible agent.
//! Dynamic gauge families are written here; lifetime families go through
//! the `prometheus` crate's [`TextEncoder`].

use std::fmt::Write;

use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use tracing::error;

use crate::store::{FamilySnapshot, SampleValue};

/// Render families into Prometheus text format.
///
/// Families without samples are skipped.
pub fn render_prometheus<'a>(families: impl IntoIterator<Item = &'a FamilySnapshot>) -> String {
    let mut out = String::new();

    for family in families {
        if family.samples.is_empty() {
            continue;
        }
        let desc = &family.desc;
        let _ = writeln!(out, "# HELP {} {}", desc.name, escape_help(&desc.help));
        let _ = writeln!(out, "# TYPE {} {}", desc.name, desc.kind.type_name());

        for sample in &family.samples {
            let pairs: Vec<(&str, &str)> = desc
                .labels
                .iter()
                .map(String::as_str)
                .zip(sample.labels.iter().map(String::as_str))
                .collect();

            if let SampleValue::Scalar(v) = sample.value {
                let _ = writeln!(out, "{}{} {}", desc.name, label_set(&pairs), format_value(v));
            }
        }
    }

    out
}

/// `{a="x",b="y"}`, or nothing when there are no labels.
fn label_set(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = pairs
        .iter()
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect();
    format!("{{{}}}", parts.join(","))
}

/// Encode gathered registry families with the `prometheus` text encoder.
pub fn encode_families(families: &[MetricFamily]) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(families, &mut buffer) {
        error!(error = %e, "failed to encode lifetime families");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Sample values: integers without a fraction, `+Inf`/`-Inf`/`NaN` spelled out.
fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{v}")
    }
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', "\\\"").replace('\n', r"\n")
}

fn escape_help(s: &str) -> String {
    s.replace('\\', r"\\").replace('\n', r"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Sample;
    use dbgauge_core::FamilyDesc;
    use std::sync::Arc;

    fn family(desc: FamilyDesc, samples: Vec<Sample>) -> FamilySnapshot {
        FamilySnapshot {
            desc: Arc::new(desc),
            samples,
        }
    }

    fn scalar(labels: &[&str], v: f64) -> Sample {
        Sample {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            value: SampleValue::Scalar(v),
        }
    }

    #[test]
    fn render_gauge_with_labels() {
        let f = family(
            FamilyDesc::gauge("dbgauge_up", "Whether the target is up.", &["database", "dbinstance"]),
            vec![scalar(&["app", "db1"], 1.0), scalar(&["app", "db2"], 0.0)],
        );
        let output = render_prometheus([&f]);

        assert!(output.contains("# HELP dbgauge_up Whether the target is up."));
        assert!(output.contains("# TYPE dbgauge_up gauge"));
        assert!(output.contains("dbgauge_up{database=\"app\",dbinstance=\"db1\"} 1\n"));
        assert!(output.contains("dbgauge_up{database=\"app\",dbinstance=\"db2\"} 0\n"));
    }

    #[test]
    fn render_escapes_label_values() {
        let f = family(
            FamilyDesc::gauge("g", "h", &["v"]),
            vec![scalar(&["say \"hi\"\\\n"], 2.5)],
        );
        let output = render_prometheus([&f]);
        assert!(output.contains(r#"g{v="say \"hi\"\\\n"} 2.5"#));
    }

    #[test]
    fn render_skips_empty_families() {
        let f = family(FamilyDesc::gauge("empty", "h", &[]), vec![]);
        assert!(render_prometheus([&f]).is_empty());
    }

    #[test]
    fn special_values() {
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(7.0), "7");
        assert_eq!(format_value(0.125), "0.125");
    }
}
