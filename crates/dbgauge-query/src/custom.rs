//! Custom query evaluation.
//!
//! A custom query is executed once per target. Label columns are resolved before
//! any row is looked at: a missing label column rejects the whole query for
//! that target. Metric columns are resolved per query too, but a missing one
//! only drops that metric.
//!
//! Each emitted series is labeled, in order, with the query's cleaned label
//! columns, then `metric` (the declared metric column name), `database`,
//! `dbinstance` and `rownum` (1-based row number).

use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use dbgauge_connect::TargetHandle;
use dbgauge_core::{CustomQuerySpec, QueryResult};

use crate::Series;
use crate::coerce::format_label_value;
use crate::error::CustomQueryError;

/// Execute `spec` on `handle` and convert the result.
pub async fn run_custom_query(
    handle: &mut TargetHandle,
    spec: &CustomQuerySpec,
    deadline: Instant,
) -> Result<Vec<Series>, CustomQueryError> {
    let result = match timeout_at(deadline, handle.query(&spec.sql)).await {
        Ok(Ok(result)) => result,
        Ok(Err(source)) => {
            warn!(query = %spec.name, endpoint = %handle.target.log_name(), error = %source, "custom query failed");
            return Err(CustomQueryError::Exec {
                query: spec.name.clone(),
                source,
            });
        }
        Err(_) => {
            return Err(CustomQueryError::Timeout {
                query: spec.name.clone(),
            });
        }
    };

    let series = series_from_result(spec, &result, &handle.database, &handle.instance)?;
    debug!(query = %spec.name, endpoint = %handle.target.log_name(), series = series.len(), "custom query collected");
    Ok(series)
}

/// Convert a materialized result into series for one target.
pub fn series_from_result(
    spec: &CustomQuerySpec,
    result: &QueryResult,
    database: &str,
    instance: &str,
) -> Result<Vec<Series>, CustomQueryError> {
    if result.rows.is_empty() {
        return Ok(Vec::new());
    }

    let label_columns = spec
        .labels
        .iter()
        .map(|label| {
            result.column_index(label).ok_or_else(|| {
                warn!(query = %spec.name, label = %label, "label column not found, query skipped");
                CustomQueryError::LabelMismatch {
                    query: spec.name.clone(),
                    label: label.clone(),
                }
            })
        })
        .collect::<Result<Vec<usize>, _>>()?;

    let metric_columns: Vec<(&String, usize)> = spec
        .metrics
        .iter()
        .filter_map(|metric| match result.column_index(metric) {
            Some(index) => Some((metric, index)),
            None => {
                debug!(query = %spec.name, metric = %metric, "metric column not found");
                None
            }
        })
        .collect();

    let mut series = Vec::new();
    for (row_index, row) in result.rows.iter().enumerate() {
        let rownum = (row_index + 1).to_string();
        for (metric, column) in &metric_columns {
            let Some(value) = row.get(*column).and_then(|v| v.as_f64()) else {
                continue;
            };
            let mut labels: Vec<String> = label_columns
                .iter()
                .map(|&i| row.get(i).map(format_label_value).unwrap_or_default())
                .collect();
            labels.push(metric.to_string());
            labels.push(database.to_string());
            labels.push(instance.to_string());
            labels.push(rownum.clone());
            series.push(Series::new(labels, value));
        }
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgauge_core::Value;
    use dbgauge_core::mock::{MockDriver, MockTarget};
    use std::time::Duration;

    fn spec(metrics: &[&str], labels: &[&str]) -> CustomQuerySpec {
        CustomQuerySpec::new("q", "select")
            .with_metrics(metrics.iter().copied())
            .with_labels(labels.iter().copied())
    }

    #[test]
    fn missing_label_column_rejects_query() {
        let result = QueryResult::new(["a"]).with_row(vec![Value::Int(1)]);
        let err = series_from_result(&spec(&["a"], &["missing_col"]), &result, "db", "inst").unwrap_err();
        assert_eq!(
            err,
            CustomQueryError::LabelMismatch {
                query: "q".into(),
                label: "missing_col".into()
            }
        );
    }

    #[test]
    fn missing_metric_column_is_skipped() {
        let result = QueryResult::new(["name", "a"]).with_row(vec![Value::Text("x".into()), Value::Int(7)]);
        let series =
            series_from_result(&spec(&["a", "missing_metric"], &["name"]), &result, "app", "db1").unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, 7.0);
        assert_eq!(series[0].labels, vec!["x", "a", "app", "db1", "1"]);
    }

    #[test]
    fn rows_are_numbered_from_one() {
        let result = QueryResult::new(["v"])
            .with_row(vec![Value::Float(1.5)])
            .with_row(vec![Value::Float(2.5)]);
        let series = series_from_result(&spec(&["v"], &[]), &result, "app", "db1").unwrap();
        let rownums: Vec<&str> = series.iter().map(|s| s.labels[3].as_str()).collect();
        assert_eq!(rownums, vec!["1", "2"]);
    }

    #[test]
    fn label_values_are_coerced() {
        let result = QueryResult::new(["Size (MB)", "ratio", "v"])
            .with_row(vec![Value::Float(5.0), Value::Float(5.25), Value::Int(1)]);
        let series = series_from_result(&spec(&["V"], &["size mb", "RATIO"]), &result, "d", "i").unwrap();
        assert_eq!(series[0].labels[..2], ["5".to_string(), "5.25e+00".to_string()]);
        // The metric label keeps the declared spelling.
        assert_eq!(series[0].labels[2], "V");
    }

    #[test]
    fn non_numeric_cells_produce_nothing() {
        let result = QueryResult::new(["v"])
            .with_row(vec![Value::Null])
            .with_row(vec![Value::Text("12".into())])
            .with_row(vec![Value::Int(3)]);
        let series = series_from_result(&spec(&["v"], &[]), &result, "d", "i").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels[3], "3");
    }

    #[test]
    fn empty_result_is_not_a_label_mismatch() {
        let result = QueryResult::default();
        let series = series_from_result(&spec(&["v"], &["missing"]), &result, "d", "i").unwrap();
        assert!(series.is_empty());
    }

    async fn handle(driver: &MockDriver, descriptor: &str) -> TargetHandle {
        use dbgauge_core::Driver;
        let conn = driver.connect(descriptor).await.unwrap();
        let target = std::sync::Arc::new(dbgauge_core::TargetDescriptor::new(descriptor));
        TargetHandle::new(target, "app".into(), "db1".into(), conn)
    }

    #[tokio::test(start_paused = true)]
    async fn execution_error_is_reported() {
        let driver = MockDriver::new().with_target(
            "pg://a",
            MockTarget::new().failing_query("select", "permission denied"),
        );
        let mut h = handle(&driver, "pg://a").await;
        let deadline = Instant::now() + Duration::from_secs(5);

        let err = run_custom_query(&mut h, &spec(&["v"], &[]), deadline).await.unwrap_err();
        assert_eq!(err.category(), Some("custom_exec"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_times_out_at_deadline() {
        let driver = MockDriver::new().with_target(
            "pg://a",
            MockTarget::new().slow_query("select", Duration::from_secs(60), QueryResult::new(["v"])),
        );
        let mut h = handle(&driver, "pg://a").await;
        let deadline = Instant::now() + Duration::from_secs(1);

        let err = run_custom_query(&mut h, &spec(&["v"], &[]), deadline).await.unwrap_err();
        assert!(matches!(err, CustomQueryError::Timeout { .. }));
        assert_eq!(err.category(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn handle_names_label_the_series() {
        let driver = MockDriver::new().with_target(
            "pg://a",
            MockTarget::new().query("select", QueryResult::new(["v"]).with_row(vec![Value::Int(9)])),
        );
        let mut h = handle(&driver, "pg://a").await;
        let deadline = Instant::now() + Duration::from_secs(1);

        let series = run_custom_query(&mut h, &spec(&["v"], &[]), deadline).await.unwrap();
        assert_eq!(series, vec![Series::new(vec!["v".into(), "app".into(), "db1".into(), "1".into()], 9.0)]);
        h.release().await;
        assert_eq!(driver.open_connections(), 0);
    }
}
