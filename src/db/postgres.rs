//! PostgreSQL backend over tokio-postgres.
//!
//! The wire client hides column origins and NUMERIC values behind its typed
//! API, so this driver does two extra things: it resolves origin
//! table/column names through pg_attribute, and it decodes the binary
//! NUMERIC format itself to keep decimals lossless as text.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::time::Duration;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, warn};

use super::connection::ConnectionConfig;
use super::driver::{ColumnMeta, Driver, DriverError, ResultSet, Value};
use super::schema::{Field, FkAction, ForeignKey, Index, IndexKind, IndexPart, Privileges, TableStatus};
use crate::sql::dialect::Dialect;
use crate::sql::quote::{quote_binary as binary_literal, quote_literal};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct PostgresDriver {
    client: Client,
    database: String,
    schema: String,
    backend_pid: u64,
    affected_rows: u64,
}

impl PostgresDriver {
    pub async fn connect(config: &ConnectionConfig) -> Result<PostgresDriver, DriverError> {
        let conn_string = format!(
            "host={} port={} dbname={} user={} password={} connect_timeout=10",
            quote_conn_value(&config.host),
            config.port,
            quote_conn_value(&config.database),
            quote_conn_value(&config.username),
            quote_conn_value(&config.password),
        );
        let (client, connection) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_postgres::connect(&conn_string, NoTls))
                .await
                .map_err(|_| DriverError::new("", "connection timed out after 15s"))?
                .map_err(DriverError::from)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(%err, "postgres connection task ended");
            }
        });

        let schema = config.schema.clone().unwrap_or_else(|| "public".to_string());
        let row = client
            .query_one("SELECT pg_backend_pid()", &[])
            .await
            .map_err(DriverError::from)?;
        let backend_pid: i32 = row.get(0);
        if config.schema.is_some() {
            let set_path = format!(
                "SET search_path TO {}",
                quote_literal(Dialect::Postgres, &schema)
            );
            client
                .execute(set_path.as_str(), &[])
                .await
                .map_err(DriverError::from)?;
        }
        debug!(host = %config.host, backend_pid, "postgres connected");
        Ok(PostgresDriver {
            client,
            database: config.database.clone(),
            schema,
            backend_pid: backend_pid as u64,
            affected_rows: 0,
        })
    }

    /// Fill `org_table`/`org_name` for columns the statement traces back to a
    /// real table. Best effort: a failure leaves the origins empty, which
    /// only disables link resolution for the affected columns.
    async fn resolve_origins(&self, statement: &Statement, columns: &mut [ColumnMeta]) {
        let oids: Vec<u32> = statement
            .columns()
            .iter()
            .filter_map(|col| col.table_oid())
            .collect();
        if oids.is_empty() {
            return;
        }
        let rows = match self
            .client
            .query(
                "SELECT a.attrelid, a.attnum, c.relname, a.attname \
                 FROM pg_catalog.pg_attribute a \
                 JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
                 WHERE a.attrelid = ANY($1)",
                &[&oids],
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                debug!(%err, "column origin lookup failed");
                return;
            }
        };
        for (i, col) in statement.columns().iter().enumerate() {
            let (oid, num) = match (col.table_oid(), col.column_id()) {
                (Some(oid), Some(num)) => (oid, num),
                _ => continue,
            };
            for row in &rows {
                let attrelid: u32 = row.get(0);
                let attnum: i16 = row.get(1);
                if attrelid == oid && attnum == num {
                    columns[i].org_table = row.get(2);
                    columns[i].org_name = row.get(3);
                }
            }
        }
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> DriverError {
        match err.as_db_error() {
            Some(db_err) => DriverError::new(db_err.code().code(), db_err.message()),
            None => DriverError::new("", err.to_string()),
        }
    }
}

/// Quote a value for a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// PostgreSQL's binary NUMERIC wire format: base-10000 digit groups around a
/// decimal point placed by `weight`. Decoded to canonical decimal text so
/// precision survives where f64 would not.
fn decode_numeric(raw: &[u8]) -> Option<String> {
    if raw.len() < 8 {
        return None;
    }
    let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let weight = i32::from(i16::from_be_bytes([raw[2], raw[3]]));
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;
    if raw.len() < 8 + ndigits * 2 {
        return None;
    }
    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        _ => return None,
    }
    let digits: Vec<u16> = (0..ndigits)
        .map(|i| u16::from_be_bytes([raw[8 + 2 * i], raw[9 + 2 * i]]))
        .collect();

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for i in 0..=(weight as usize) {
            let group = digits.get(i).copied().unwrap_or(0);
            if i == 0 {
                text.push_str(&group.to_string());
            } else {
                text.push_str(&format!("{:04}", group));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::new();
        let groups = (dscale + 3) / 4;
        for offset in 0..groups {
            let position = weight + 1 + offset as i32;
            let group = if position >= 0 {
                digits.get(position as usize).copied().unwrap_or(0)
            } else {
                0
            };
            frac.push_str(&format!("{:04}", group));
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }
    Some(text)
}

struct PgNumeric(Option<String>);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<PgNumeric, Box<dyn std::error::Error + Sync + Send>> {
        Ok(PgNumeric(decode_numeric(raw)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Value {
    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::Int(i64::from(value)))
            .unwrap_or(Value::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::Int(i64::from(value)))
            .unwrap_or(Value::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::Int(i64::from(value)))
            .unwrap_or(Value::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::UInt(u64::from(value)))
            .unwrap_or(Value::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::Float(f64::from(value)))
            .unwrap_or(Value::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)
            .ok()
            .flatten()
            .and_then(|value| value.0)
            .map(Value::Text)
            .unwrap_or(Value::Null),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR | Type::UNKNOWN => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(Value::Time)
            .unwrap_or(Value::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(|value| Value::DateTime(value.naive_utc()))
            .unwrap_or(Value::Null),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn quote(&self, value: &str) -> String {
        quote_literal(Dialect::Postgres, value)
    }

    fn quote_binary(&self, bytes: &[u8]) -> String {
        binary_literal(Dialect::Postgres, bytes)
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        debug!(%sql, "postgres query");
        // prepare first so column metadata exists even for zero-row results
        let statement = self.client.prepare(sql).await.map_err(DriverError::from)?;
        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(DriverError::from)?;
        let mut columns: Vec<ColumnMeta> = statement
            .columns()
            .iter()
            .map(|col| ColumnMeta {
                name: col.name().to_string(),
                org_table: String::new(),
                org_name: String::new(),
                binary: *col.type_() == Type::BYTEA,
            })
            .collect();
        self.resolve_origins(&statement, &mut columns).await;
        let converted = rows
            .iter()
            .map(|row| {
                statement
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| extract_value(row, i, col.type_()))
                    .collect()
            })
            .collect();
        Ok(ResultSet {
            columns,
            rows: converted,
        })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        debug!(%sql, "postgres execute");
        let affected = self
            .client
            .execute(sql, &[])
            .await
            .map_err(DriverError::from)?;
        self.affected_rows = affected;
        Ok(affected)
    }

    async fn select_database(&mut self, name: &str) -> Result<(), DriverError> {
        // a PostgreSQL session is bound to one database; switching means a
        // new connection with a different dbname
        if name == self.database {
            Ok(())
        } else {
            Err(DriverError::new(
                "",
                "switching databases requires a new connection",
            ))
        }
    }

    fn last_insert_id(&self) -> Option<u64> {
        // sequences are read with RETURNING instead of a session-global id
        None
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.client.batch_execute("BEGIN").await.map_err(DriverError::from)
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.client.batch_execute("COMMIT").await.map_err(DriverError::from)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.client.batch_execute("ROLLBACK").await.map_err(DriverError::from)
    }

    fn thread_id(&self) -> u64 {
        self.backend_pid
    }

    async fn kill(&mut self, thread_id: u64) -> Result<(), DriverError> {
        debug!(thread_id, "postgres cancel");
        self.client
            .query("SELECT pg_cancel_backend($1)", &[&(thread_id as i32)])
            .await
            .map_err(DriverError::from)?;
        Ok(())
    }

    async fn table_status(&mut self, table: &str) -> Result<TableStatus, DriverError> {
        let rows = self
            .client
            .query(
                "SELECT c.relname, c.reltuples::bigint AS rows \
                 FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2",
                &[&self.schema, &table.to_string()],
            )
            .await
            .map_err(DriverError::from)?;
        let row = rows
            .first()
            .ok_or_else(|| DriverError::new("", format!("unknown table {}", table)))?;
        let reltuples: i64 = row.get("rows");
        Ok(TableStatus {
            name: row.get("relname"),
            engine: String::new(),
            // -1 means "never analyzed" since PostgreSQL 14
            rows: (reltuples >= 0).then_some(reltuples as u64),
        })
    }

    async fn fields(&mut self, table: &str) -> Result<Vec<Field>, DriverError> {
        let rows = self
            .client
            .query(
                "SELECT a.attname AS name, \
                        t.typname AS type_tag, \
                        format_type(a.atttypid, a.atttypmod) AS full_type, \
                        a.attnotnull AS not_null, \
                        pg_get_expr(d.adbin, d.adrelid) AS default_value, \
                        (a.attidentity <> '' OR pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%') AS auto_increment, \
                        col_description(c.oid, a.attnum) AS comment, \
                        co.collname AS collation, \
                        COALESCE((SELECT i.indisprimary FROM pg_catalog.pg_index i \
                                  WHERE i.indrelid = c.oid AND a.attnum = ANY(i.indkey) \
                                  AND i.indisprimary), false) AS is_primary, \
                        has_column_privilege(c.oid, a.attnum, 'SELECT') AS priv_select, \
                        has_column_privilege(c.oid, a.attnum, 'INSERT') AS priv_insert, \
                        has_column_privilege(c.oid, a.attnum, 'UPDATE') AS priv_update \
                 FROM pg_catalog.pg_attribute a \
                 JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 JOIN pg_catalog.pg_type t ON t.oid = a.atttypid \
                 LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = c.oid AND d.adnum = a.attnum \
                 LEFT JOIN pg_catalog.pg_collation co ON co.oid = a.attcollation \
                 WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY a.attnum",
                &[&self.schema, &table.to_string()],
            )
            .await
            .map_err(DriverError::from)?;
        let fields = rows
            .iter()
            .map(|row| {
                let full_type: String = row.get("full_type");
                let not_null: bool = row.get("not_null");
                let comment: Option<String> = row.get("comment");
                let length = full_type
                    .split_once('(')
                    .and_then(|(_, rest)| rest.rsplit_once(')'))
                    .map(|(inner, _)| inner.to_string())
                    .unwrap_or_default();
                Field {
                    name: row.get("name"),
                    type_tag: row.get("type_tag"),
                    full_type,
                    length,
                    unsigned: false,
                    null: !not_null,
                    auto_increment: row.get("auto_increment"),
                    default: row.get("default_value"),
                    on_update: None,
                    collation: row.get("collation"),
                    comment: comment.unwrap_or_default(),
                    primary: row.get("is_primary"),
                    privileges: Privileges {
                        select: row.get("priv_select"),
                        insert: row.get("priv_insert"),
                        update: row.get("priv_update"),
                    },
                }
            })
            .collect();
        Ok(fields)
    }

    async fn indexes(&mut self, table: &str) -> Result<Vec<Index>, DriverError> {
        let rows = self
            .client
            .query(
                "SELECT i.relname AS index_name, \
                        ix.indisprimary AS is_primary, \
                        ix.indisunique AS is_unique, \
                        array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns \
                 FROM pg_catalog.pg_index ix \
                 JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid \
                 JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE n.nspname = $1 AND t.relname = $2 \
                 GROUP BY i.relname, ix.indisprimary, ix.indisunique \
                 ORDER BY ix.indisprimary DESC, ix.indisunique DESC, i.relname",
                &[&self.schema, &table.to_string()],
            )
            .await
            .map_err(DriverError::from)?;
        let indexes = rows
            .iter()
            .map(|row| {
                let is_primary: bool = row.get("is_primary");
                let is_unique: bool = row.get("is_unique");
                let columns: Vec<String> = row.get("columns");
                let kind = if is_primary {
                    IndexKind::Primary
                } else if is_unique {
                    IndexKind::Unique
                } else {
                    IndexKind::Plain
                };
                Index {
                    name: row.get("index_name"),
                    kind,
                    parts: columns.into_iter().map(IndexPart::column).collect(),
                }
            })
            .collect();
        Ok(indexes)
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DriverError> {
        let rows = self
            .client
            .query(
                "SELECT c.conname AS name, \
                        ns.nspname AS ref_schema, \
                        cl.relname AS ref_table, \
                        (SELECT array_agg(a.attname ORDER BY k.ord) \
                         FROM unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord) \
                         JOIN pg_catalog.pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum) AS source, \
                        (SELECT array_agg(a.attname ORDER BY k.ord) \
                         FROM unnest(c.confkey) WITH ORDINALITY AS k(attnum, ord) \
                         JOIN pg_catalog.pg_attribute a ON a.attrelid = c.confrelid AND a.attnum = k.attnum) AS target, \
                        c.confupdtype::text AS on_update, \
                        c.confdeltype::text AS on_delete \
                 FROM pg_catalog.pg_constraint c \
                 JOIN pg_catalog.pg_class src ON src.oid = c.conrelid \
                 JOIN pg_catalog.pg_namespace n ON n.oid = src.relnamespace \
                 JOIN pg_catalog.pg_class cl ON cl.oid = c.confrelid \
                 JOIN pg_catalog.pg_namespace ns ON ns.oid = cl.relnamespace \
                 WHERE c.contype = 'f' AND n.nspname = $1 AND src.relname = $2 \
                 ORDER BY c.conname",
                &[&self.schema, &table.to_string()],
            )
            .await
            .map_err(DriverError::from)?;
        let foreign_keys = rows
            .iter()
            .map(|row| {
                let ref_schema: String = row.get("ref_schema");
                let schema = (ref_schema != self.schema).then_some(ref_schema);
                ForeignKey {
                    name: row.get("name"),
                    database: None,
                    schema,
                    table: row.get("ref_table"),
                    source: row.get("source"),
                    target: row.get("target"),
                    on_delete: parse_action_code(row.get("on_delete")),
                    on_update: parse_action_code(row.get("on_update")),
                }
            })
            .collect();
        Ok(foreign_keys)
    }
}

/// pg_constraint stores referential actions as single characters.
fn parse_action_code(code: String) -> FkAction {
    match code.as_str() {
        "a" => FkAction::NoAction,
        "c" => FkAction::Cascade,
        "n" => FkAction::SetNull,
        "d" => FkAction::SetDefault,
        _ => FkAction::Restrict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ndigits.to_be_bytes());
        out.extend_from_slice(&weight.to_be_bytes());
        out.extend_from_slice(&sign.to_be_bytes());
        out.extend_from_slice(&dscale.to_be_bytes());
        for digit in digits {
            out.extend_from_slice(&digit.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_decode_numeric_integer() {
        let raw = numeric_bytes(1, 0, 0, 0, &[42]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("42"));
    }

    #[test]
    fn test_decode_numeric_decimal() {
        // 100.50 as numeric(10,2): groups [100][5000]
        let raw = numeric_bytes(2, 0, 0, 2, &[100, 5000]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("100.50"));
    }

    #[test]
    fn test_decode_numeric_negative_and_small() {
        let raw = numeric_bytes(1, 0, 0x4000, 0, &[7]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("-7"));
        // 0.05: first fractional group holds 0500
        let raw = numeric_bytes(1, -1, 0, 2, &[500]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("0.05"));
    }

    #[test]
    fn test_decode_numeric_large_groups() {
        // 12345678.9 -> groups [1234][5678][9000], weight 1
        let raw = numeric_bytes(3, 1, 0, 1, &[1234, 5678, 9000]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("12345678.9"));
    }

    #[test]
    fn test_decode_numeric_trailing_zero_scale() {
        // 3.00 keeps its declared scale
        let raw = numeric_bytes(1, 0, 0, 2, &[3]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("3.00"));
    }

    #[test]
    fn test_decode_numeric_nan_and_garbage() {
        let raw = numeric_bytes(0, 0, 0xC000, 0, &[]);
        assert_eq!(decode_numeric(&raw).as_deref(), Some("NaN"));
        assert_eq!(decode_numeric(&[1, 2, 3]), None);
    }

    #[test]
    fn test_quote_conn_value() {
        assert_eq!(quote_conn_value("plain"), "'plain'");
        assert_eq!(quote_conn_value("p'w\\d"), "'p\\'w\\\\d'");
    }

    #[test]
    fn test_parse_action_code() {
        assert_eq!(parse_action_code("c".into()), FkAction::Cascade);
        assert_eq!(parse_action_code("n".into()), FkAction::SetNull);
        assert_eq!(parse_action_code("r".into()), FkAction::Restrict);
        assert_eq!(parse_action_code("?".into()), FkAction::Restrict);
    }
}
