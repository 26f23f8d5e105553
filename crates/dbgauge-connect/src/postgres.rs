//! PostgreSQL driver built on sqlx.
//!
//! Queries go through the simple query protocol (`raw_sql`), so every value
//! arrives in text form. Cells are typed from the column's type name.

use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection as _, Executor, Row, TypeInfo};

use dbgauge_core::{Connection, Driver, DriverError, QueryResult, Value};

/// `(database, instance)` for a Postgres server. Prefers `cluster_name`,
/// then the server address, then `local` for unix-socket sessions.
const IDENTITY_SQL: &str = "select current_database()::text, \
     coalesce(nullif(current_setting('cluster_name'), ''), \
     host(inet_server_addr()) || ':' || inet_server_port()::text, 'local')";

/// Opens one dedicated `PgConnection` per descriptor; there is no pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Driver for PostgresDriver {
    async fn connect(&self, descriptor: &str) -> Result<Box<dyn Connection>, DriverError> {
        let conn = PgConnection::connect(descriptor)
            .await
            .map_err(|e| DriverError::Connect(e.to_string()))?;
        Ok(Box::new(PostgresConnection { conn }))
    }
}

struct PostgresConnection {
    conn: PgConnection,
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    async fn ping(&mut self) -> Result<(), DriverError> {
        self.conn
            .ping()
            .await
            .map_err(|e| DriverError::Ping(e.to_string()))
    }

    async fn identity(&mut self) -> Result<(String, String), DriverError> {
        let result = self.query(IDENTITY_SQL).await?;
        let row = result
            .rows
            .first()
            .ok_or_else(|| DriverError::Query("identity query returned no rows".to_string()))?;
        match (row.first(), row.get(1)) {
            (Some(Value::Text(db)), Some(Value::Text(inst))) => Ok((db.clone(), inst.clone())),
            _ => Err(DriverError::Decode("unexpected identity row".to_string())),
        }
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        // Executor on the concrete borrow keeps the future's lifetime first order.
        let conn: &mut PgConnection = &mut self.conn;
        let rows = conn
            .fetch_all(sqlx::raw_sql(sql))
            .await
            .map_err(|e| DriverError::Query(e.to_string()))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult { columns, rows })
    }

    async fn close(self: Box<Self>) {
        // Best effort; a broken socket is closed by drop anyway.
        let _ = self.conn.close().await;
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<Value>, DriverError> {
    row.columns()
        .iter()
        .map(|column| {
            let text: Option<String> = row
                .try_get_unchecked(column.ordinal())
                .map_err(|e| DriverError::Decode(e.to_string()))?;
            Ok(match text {
                None => Value::Null,
                Some(text) => typed_value(column.type_info().name(), text),
            })
        })
        .collect()
}

/// Map a text-format cell to a [`Value`] by its Postgres type name.
fn typed_value(type_name: &str, text: String) -> Value {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse()
            .map(Value::Int)
            .unwrap_or(Value::Other(text)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => match text.parse::<f64>() {
            Ok(v) => Value::Float(v),
            Err(_) => match text.as_str() {
                "Infinity" => Value::Float(f64::INFINITY),
                "-Infinity" => Value::Float(f64::NEG_INFINITY),
                _ => Value::Other(text),
            },
        },
        "BOOL" => match text.as_str() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::Other(text),
        },
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Value::Text(text),
        _ => Value::Other(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_and_floats() {
        assert_eq!(typed_value("INT8", "42".into()), Value::Int(42));
        assert_eq!(typed_value("NUMERIC", "5.25".into()), Value::Float(5.25));
        assert_eq!(typed_value("FLOAT8", "NaN".into()).as_f64().map(f64::is_nan), Some(true));
        assert_eq!(typed_value("FLOAT8", "Infinity".into()), Value::Float(f64::INFINITY));
    }

    #[test]
    fn text_and_others() {
        assert_eq!(typed_value("NAME", "pg_class".into()), Value::Text("pg_class".into()));
        assert_eq!(typed_value("BOOL", "t".into()), Value::Bool(true));
        assert_eq!(
            typed_value("TIMESTAMPTZ", "2024-01-01 00:00:00+00".into()),
            Value::Other("2024-01-01 00:00:00+00".into())
        );
        assert_eq!(typed_value("INT4", "oops".into()), Value::Other("oops".into()));
    }
}
