//! Built-in collectors.
//!
//! Each collector is a row in a static catalogue: a family name, help text,
//! the feature that gates it, the SQL to run and the [`Shape`] of its result.
//! A single interpreter turns any shape into series, so adding a collector
//! is a data change.
//!
//! Every built-in family carries `database` and `dbinstance` first, then the
//! collector's own labels.

use std::sync::Arc;

use tokio::time::{Instant, timeout_at};
use tracing::debug;

use dbgauge_connect::TargetHandle;
use dbgauge_core::{FamilyDesc, Feature, NAMESPACE, QueryResult, Value, clean_name};

use crate::Series;
use crate::coerce::format_label_value;
use crate::error::CollectorError;

/// How a collector's result maps to series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// First row, first column is the value.
    Single,
    /// Rows of `(name, value)`; the cleaned name becomes the first label.
    KeyValue,
    /// Rows of `labels.len()` label columns followed by the value.
    Labeled,
    /// Rows of label columns (all collector labels but the leading `type`)
    /// followed by `total` and `free`; emits `type` = total, free and used.
    TotalFree,
    /// One row; every column is a value labeled with its cleaned column name.
    NamedColumns,
    /// Rows of one label column; each present row is a series with value 1.
    Presence,
}

/// One catalogue entry.
#[derive(Debug)]
pub struct BuiltinCollector {
    /// Collector name, also its error counter category.
    pub name: &'static str,
    /// Family name without the namespace.
    pub family: &'static str,
    pub help: &'static str,
    /// Labels after `database` and `dbinstance`.
    pub labels: &'static [&'static str],
    pub feature: Feature,
    pub sql: &'static str,
    pub shape: Shape,
}

impl BuiltinCollector {
    pub fn family_desc(&self) -> FamilyDesc {
        let mut labels = vec!["database", "dbinstance"];
        labels.extend_from_slice(self.labels);
        FamilyDesc::gauge(format!("{NAMESPACE}_{}", self.family), self.help, &labels)
            .with_feature(self.feature)
    }

    /// Convert a result into series for one target.
    pub fn interpret(
        &self,
        result: &QueryResult,
        database: &str,
        instance: &str,
    ) -> Result<Vec<Series>, CollectorError> {
        let series_of = |extra: Vec<String>, value: f64| {
            let mut labels = Vec::with_capacity(2 + extra.len());
            labels.push(database.to_string());
            labels.push(instance.to_string());
            labels.extend(extra);
            Series::new(labels, value)
        };
        let width = |needed: usize| -> Result<(), CollectorError> {
            if result.columns.len() < needed && !result.rows.is_empty() {
                return Err(self.shape_error(format!(
                    "expected at least {needed} columns, got {}",
                    result.columns.len()
                )));
            }
            Ok(())
        };

        let mut out = Vec::new();
        match self.shape {
            Shape::Single => {
                if let Some(value) = result.rows.first().and_then(|r| r.first()).and_then(Value::as_f64) {
                    out.push(series_of(vec![], value));
                }
            }
            Shape::KeyValue => {
                width(2)?;
                for row in &result.rows {
                    if let (Some(key), Some(value)) = (row.first(), row.get(1).and_then(Value::as_f64)) {
                        out.push(series_of(vec![clean_name(&format_label_value(key))], value));
                    }
                }
            }
            Shape::Labeled => {
                let n = self.labels.len();
                width(n + 1)?;
                for row in &result.rows {
                    let Some(value) = row.get(n).and_then(Value::as_f64) else {
                        continue;
                    };
                    let labels = self
                        .labels
                        .iter()
                        .zip(row)
                        .map(|(name, cell)| self.label_text(name, cell))
                        .collect();
                    out.push(series_of(labels, value));
                }
            }
            Shape::TotalFree => {
                let n = self.labels.len().saturating_sub(1);
                width(n + 2)?;
                for row in &result.rows {
                    let (Some(total), Some(free)) = (
                        row.get(n).and_then(Value::as_f64),
                        row.get(n + 1).and_then(Value::as_f64),
                    ) else {
                        continue;
                    };
                    let rest: Vec<String> = self
                        .labels
                        .get(1..)
                        .unwrap_or_default()
                        .iter()
                        .zip(row)
                        .map(|(name, cell)| self.label_text(name, cell))
                        .collect();
                    for (kind, value) in [("total", total), ("free", free), ("used", total - free)] {
                        let mut labels = vec![kind.to_string()];
                        labels.extend(rest.iter().cloned());
                        out.push(series_of(labels, value));
                    }
                }
            }
            Shape::NamedColumns => {
                if let Some(row) = result.rows.first() {
                    for (column, cell) in result.columns.iter().zip(row) {
                        if let Some(value) = cell.as_f64() {
                            out.push(series_of(vec![clean_name(column)], value));
                        }
                    }
                }
            }
            Shape::Presence => {
                for row in &result.rows {
                    if let Some(cell) = row.first() {
                        out.push(series_of(vec![format_label_value(cell)], 1.0));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Execute on `handle` and interpret.
    pub async fn run(&self, handle: &mut TargetHandle, deadline: Instant) -> Result<Vec<Series>, CollectorError> {
        let result = match timeout_at(deadline, handle.query(self.sql)).await {
            Ok(Ok(result)) => result,
            Ok(Err(source)) => {
                return Err(CollectorError::Exec {
                    collector: self.name,
                    source,
                });
            }
            Err(_) => return Err(CollectorError::Timeout { collector: self.name }),
        };
        let series = self.interpret(&result, &handle.database, &handle.instance)?;
        debug!(collector = self.name, endpoint = %handle.target.log_name(), series = series.len(), "collector finished");
        Ok(series)
    }

    fn label_text(&self, label: &str, cell: &Value) -> String {
        let text = format_label_value(cell);
        match label {
            "type" | "table_name" => clean_name(&text),
            _ => text,
        }
    }

    fn shape_error(&self, reason: String) -> CollectorError {
        CollectorError::Shape {
            collector: self.name,
            reason,
        }
    }
}

// ── Catalogue ──────────────────────────────────────────────────────

/// The Postgres collector catalogue, in execution order within each feature.
pub static POSTGRES_COLLECTORS: &[BuiltinCollector] = &[
    BuiltinCollector {
        name: "recovery",
        family: "recovery",
        help: "Recovery and WAL archiving state.",
        labels: &["type"],
        feature: Feature::Recovery,
        sql: "select pg_is_in_recovery()::int as in_recovery, \
              coalesce(extract(epoch from now() - pg_last_xact_replay_timestamp()), 0)::float8 as replay_lag_seconds, \
              a.archived_count::float8 as archived_count, \
              a.failed_count::float8 as archive_failed_count \
              from pg_stat_archiver a",
        shape: Shape::NamedColumns,
    },
    BuiltinCollector {
        name: "uptime",
        family: "uptime",
        help: "Server uptime in days.",
        labels: &[],
        feature: Feature::Default,
        sql: "select (extract(epoch from now() - pg_postmaster_start_time()) / 86400)::float8",
        shape: Shape::Single,
    },
    BuiltinCollector {
        name: "session",
        family: "session",
        help: "Sessions by backend type and state.",
        labels: &["type", "state"],
        feature: Feature::Default,
        sql: "select coalesce(backend_type, 'unknown'), coalesce(state, 'none'), count(*) \
              from pg_stat_activity group by 1, 2",
        shape: Shape::Labeled,
    },
    BuiltinCollector {
        name: "sysstat",
        family: "sysstat",
        help: "Cumulative database statistics.",
        labels: &["type"],
        feature: Feature::Default,
        sql: "select s.name, s.value from pg_stat_database d, lateral (values \
              ('xact_commit', d.xact_commit::float8), ('xact_rollback', d.xact_rollback::float8), \
              ('blks_read', d.blks_read::float8), ('blks_hit', d.blks_hit::float8), \
              ('tup_returned', d.tup_returned::float8), ('tup_fetched', d.tup_fetched::float8), \
              ('tup_inserted', d.tup_inserted::float8), ('tup_updated', d.tup_updated::float8), \
              ('tup_deleted', d.tup_deleted::float8), ('deadlocks', d.deadlocks::float8), \
              ('temp_bytes', d.temp_bytes::float8)) as s(name, value) \
              where d.datname = current_database()",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "waitclass",
        family: "waitclass",
        help: "Active sessions by wait event type.",
        labels: &["type"],
        feature: Feature::Default,
        sql: "select coalesce(wait_event_type, 'CPU'), count(*)::float8 \
              from pg_stat_activity where state = 'active' group by 1",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "sysmetric",
        family: "sysmetric",
        help: "Point-in-time server metrics.",
        labels: &["type"],
        feature: Feature::Default,
        sql: "select 'Database Size Bytes', pg_database_size(current_database())::float8 \
              union all select 'Max Connections', current_setting('max_connections')::float8 \
              union all select 'Connections', count(*)::float8 from pg_stat_activity",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "tablespace",
        family: "tablespace",
        help: "Tablespace size in bytes.",
        labels: &["type", "name", "contents", "autoextend"],
        feature: Feature::Default,
        sql: "select spcname, 'permanent', 'NO', pg_tablespace_size(oid)::float8, 0::float8 \
              from pg_tablespace",
        shape: Shape::TotalFree,
    },
    BuiltinCollector {
        name: "interconnect",
        family: "interconnect",
        help: "Replication lag per standby in bytes.",
        labels: &["type"],
        feature: Feature::Default,
        sql: "select coalesce(application_name, client_addr::text, 'unknown'), \
              case when pg_is_in_recovery() then 0 \
              else pg_wal_lsn_diff(pg_current_wal_lsn(), replay_lsn)::float8 end \
              from pg_stat_replication",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "redo",
        family: "redo",
        help: "WAL position in bytes.",
        labels: &[],
        feature: Feature::Default,
        sql: "select pg_wal_lsn_diff(case when pg_is_in_recovery() then pg_last_wal_receive_lsn() \
              else pg_current_wal_lsn() end, '0/0')::float8",
        shape: Shape::Single,
    },
    BuiltinCollector {
        name: "cache",
        family: "cachehitratio",
        help: "Buffer cache hit ratio.",
        labels: &["type"],
        feature: Feature::Default,
        sql: "select 'buffer cache hit ratio', \
              case when blks_hit + blks_read = 0 then 0 \
              else blks_hit::float8 / (blks_hit + blks_read) end \
              from pg_stat_database where datname = current_database()",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "services",
        family: "services",
        help: "Databases accepting connections.",
        labels: &["name"],
        feature: Feature::Default,
        sql: "select datname from pg_database where datallowconn and not datistemplate",
        shape: Shape::Presence,
    },
    BuiltinCollector {
        name: "parameter",
        family: "parameter",
        help: "Numeric server settings.",
        labels: &["name"],
        feature: Feature::Default,
        sql: "select name, setting::float8 from pg_settings where name in \
              ('max_connections', 'shared_buffers', 'work_mem', 'maintenance_work_mem', \
              'effective_cache_size', 'max_wal_size')",
        shape: Shape::KeyValue,
    },
    BuiltinCollector {
        name: "asmspace",
        family: "asmspace",
        help: "WAL directory usage in bytes.",
        labels: &["type", "name"],
        feature: Feature::Default,
        sql: "select 'pg_wal', coalesce(sum(size), 0)::float8, 0::float8 from pg_ls_waldir()",
        shape: Shape::TotalFree,
    },
    BuiltinCollector {
        name: "tablerows",
        family: "tablerows",
        help: "Live rows per table.",
        labels: &["owner", "table_name", "tablespace"],
        feature: Feature::TableRows,
        sql: "select s.schemaname, s.relname, coalesce(t.spcname, 'pg_default'), s.n_live_tup \
              from pg_stat_user_tables s join pg_class c on c.oid = s.relid \
              left join pg_tablespace t on t.oid = c.reltablespace",
        shape: Shape::Labeled,
    },
    BuiltinCollector {
        name: "tablebytes",
        family: "tablebytes",
        help: "Table size in bytes.",
        labels: &["owner", "table_name"],
        feature: Feature::TableBytes,
        sql: "select schemaname, relname, pg_table_size(relid) from pg_stat_user_tables",
        shape: Shape::Labeled,
    },
    BuiltinCollector {
        name: "indexbytes",
        family: "indexbytes",
        help: "Index size per table in bytes.",
        labels: &["owner", "table_name"],
        feature: Feature::IndexBytes,
        sql: "select schemaname, relname, pg_indexes_size(relid) from pg_stat_user_tables",
        shape: Shape::Labeled,
    },
    BuiltinCollector {
        name: "lobbytes",
        family: "lobbytes",
        help: "TOAST storage per table in bytes.",
        labels: &["owner", "table_name"],
        feature: Feature::LobBytes,
        sql: "select n.nspname, c.relname, pg_total_relation_size(c.reltoastrelid) \
              from pg_class c join pg_namespace n on n.oid = c.relnamespace \
              where c.reltoastrelid <> 0 and c.relkind = 'r' \
              and n.nspname not in ('pg_catalog', 'information_schema')",
        shape: Shape::Labeled,
    },
];

/// A catalogue with its family descriptors built once.
#[derive(Debug, Clone)]
pub struct Builtins {
    entries: Vec<(&'static BuiltinCollector, Arc<FamilyDesc>)>,
}

impl Builtins {
    pub fn new(catalogue: &'static [BuiltinCollector]) -> Self {
        Self {
            entries: catalogue
                .iter()
                .map(|c| (c, Arc::new(c.family_desc())))
                .collect(),
        }
    }

    pub fn postgres() -> Self {
        Self::new(POSTGRES_COLLECTORS)
    }

    /// Collectors gated on `feature`, in catalogue order.
    pub fn group(&self, feature: Feature) -> impl Iterator<Item = &(&'static BuiltinCollector, Arc<FamilyDesc>)> {
        self.entries.iter().filter(move |(c, _)| c.feature == feature)
    }

    /// Every collector name (the error categories they report under).
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(c, _)| c.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
