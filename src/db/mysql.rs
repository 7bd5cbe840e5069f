//! MySQL-family backend over mysql_async.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::connection::ConnectionConfig;
use super::driver::{ColumnMeta, Driver, DriverError, ResultSet, Value};
use super::schema::{
    Field, FkAction, ForeignKey, Index, IndexKind, IndexPart, Privileges, TableStatus,
};
use crate::sql::dialect::Dialect;
use crate::sql::quote::{escape_identifier, quote_binary as binary_literal, quote_literal};

static FIELD_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^( ]+)(?:\((.+)\))?( unsigned)?( zerofill)?$").unwrap());
// not anchored: MySQL 8 prefixes the clause with DEFAULT_GENERATED
static ON_UPDATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)on update (.+)").unwrap());

// character_set 63 marks true binary data; the flag alone is also set on
// numeric columns
const BINARY_CHARSET: u16 = 63;

pub struct MySqlDriver {
    conn: Conn,
    database: String,
    thread_id: u64,
    last_insert_id: Option<u64>,
    affected_rows: u64,
}

impl MySqlDriver {
    pub async fn connect(config: &ConnectionConfig) -> Result<MySqlDriver, DriverError> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .db_name((!config.database.is_empty()).then(|| config.database.clone()));
        let conn = Conn::new(Opts::from(opts)).await.map_err(DriverError::from)?;
        let thread_id = u64::from(conn.id());
        debug!(host = %config.host, thread_id, "mysql connected");
        Ok(MySqlDriver {
            conn,
            database: config.database.clone(),
            thread_id,
            last_insert_id: None,
            affected_rows: 0,
        })
    }
}

impl From<mysql_async::Error> for DriverError {
    fn from(err: mysql_async::Error) -> DriverError {
        match err {
            mysql_async::Error::Server(server) => {
                DriverError::new(server.code.to_string(), server.message)
            }
            other => DriverError::new("", other.to_string()),
        }
    }
}

fn column_meta(col: &mysql_async::Column) -> ColumnMeta {
    let binary = col.character_set() == BINARY_CHARSET
        && matches!(
            col.column_type(),
            ColumnType::MYSQL_TYPE_TINY_BLOB
                | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                | ColumnType::MYSQL_TYPE_LONG_BLOB
                | ColumnType::MYSQL_TYPE_BLOB
                | ColumnType::MYSQL_TYPE_STRING
                | ColumnType::MYSQL_TYPE_VAR_STRING
        );
    ColumnMeta {
        name: col.name_str().into_owned(),
        org_table: col.org_table_str().into_owned(),
        org_name: col.org_name_str().into_owned(),
        binary,
    }
}

fn from_mysql_value(value: mysql_async::Value, binary: bool) -> Value {
    use mysql_async::Value as Sql;
    match value {
        Sql::NULL => Value::Null,
        Sql::Int(value) => Value::Int(value),
        Sql::UInt(value) => Value::UInt(value),
        Sql::Float(value) => Value::Float(f64::from(value)),
        Sql::Double(value) => Value::Float(value),
        Sql::Date(year, month, day, 0, 0, 0, 0) => {
            match NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day)) {
                Some(date) => Value::Date(date),
                None => Value::Text(format!("{:04}-{:02}-{:02}", year, month, day)),
            }
        }
        Sql::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day));
            let time = NaiveTime::from_hms_micro_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                micros,
            );
            match (date, time) {
                (Some(date), Some(time)) => Value::DateTime(NaiveDateTime::new(date, time)),
                _ => Value::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )),
            }
        }
        Sql::Time(negative, days, hours, minutes, seconds, micros) => {
            // MySQL TIME spans up to 838 hours, outside NaiveTime's range
            let total_hours = days * 24 + u32::from(hours);
            let sign = if negative { "-" } else { "" };
            let frac = if micros > 0 {
                format!(".{:06}", micros)
            } else {
                String::new()
            };
            Value::Text(format!(
                "{}{:02}:{:02}:{:02}{}",
                sign, total_hours, minutes, seconds, frac
            ))
        }
        Sql::Bytes(bytes) => {
            if binary {
                Value::Bytes(bytes)
            } else {
                match String::from_utf8(bytes) {
                    Ok(text) => Value::Text(text),
                    Err(err) => Value::Bytes(err.into_bytes()),
                }
            }
        }
    }
}

fn cell_text(result: &ResultSet, row: usize, name: &str) -> String {
    match result.value(row, name) {
        Some(Value::Null) | None => String::new(),
        Some(value) => value.display(),
    }
}

fn cell_opt(result: &ResultSet, row: usize, name: &str) -> Option<String> {
    match result.value(row, name) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value.display()),
    }
}

/// Split `decimal(10,2) unsigned` into tag, length and signedness.
fn parse_column_type(full_type: &str) -> (String, String, bool) {
    match FIELD_TYPE.captures(full_type) {
        Some(caps) => (
            caps[1].to_string(),
            caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            caps.get(3).is_some() || caps.get(4).is_some(),
        ),
        None => (full_type.to_string(), String::new(), false),
    }
}

/// LIKE-pattern escaping for statements such as SHOW TABLE STATUS LIKE.
fn escape_wildcards(name: &str) -> String {
    name.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl Driver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn quote(&self, value: &str) -> String {
        quote_literal(Dialect::MySql, value)
    }

    fn quote_binary(&self, bytes: &[u8]) -> String {
        binary_literal(Dialect::MySql, bytes)
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        debug!(%sql, "mysql query");
        let mut result = self.conn.query_iter(sql).await.map_err(DriverError::from)?;
        let columns: Vec<ColumnMeta> = result
            .columns()
            .map(|cols| cols.iter().map(column_meta).collect())
            .unwrap_or_default();
        let raw: Vec<mysql_async::Row> =
            result.collect_and_drop().await.map_err(DriverError::from)?;
        let binary: Vec<bool> = columns.iter().map(|col| col.binary).collect();
        let rows = raw
            .into_iter()
            .map(|row| {
                row.unwrap()
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        from_mysql_value(value, binary.get(i).copied().unwrap_or(false))
                    })
                    .collect()
            })
            .collect();
        Ok(ResultSet { columns, rows })
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        debug!(%sql, "mysql execute");
        self.conn.query_drop(sql).await.map_err(DriverError::from)?;
        self.affected_rows = self.conn.affected_rows();
        self.last_insert_id = self.conn.last_insert_id();
        Ok(self.affected_rows)
    }

    async fn select_database(&mut self, name: &str) -> Result<(), DriverError> {
        self.conn
            .query_drop(format!("USE {}", escape_identifier(Dialect::MySql, name)))
            .await
            .map_err(DriverError::from)?;
        self.database = name.to_string();
        Ok(())
    }

    fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.conn
            .query_drop("START TRANSACTION")
            .await
            .map_err(DriverError::from)
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.conn.query_drop("COMMIT").await.map_err(DriverError::from)
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn.query_drop("ROLLBACK").await.map_err(DriverError::from)
    }

    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    async fn kill(&mut self, thread_id: u64) -> Result<(), DriverError> {
        debug!(thread_id, "mysql kill");
        self.conn
            .query_drop(format!("KILL {}", thread_id))
            .await
            .map_err(DriverError::from)
    }

    async fn table_status(&mut self, table: &str) -> Result<TableStatus, DriverError> {
        let sql = format!(
            "SHOW TABLE STATUS LIKE {}",
            quote_literal(Dialect::MySql, &escape_wildcards(table))
        );
        let result = self.query(&sql).await?;
        if result.is_empty() {
            return Err(DriverError::new("", format!("unknown table {}", table)));
        }
        Ok(TableStatus {
            name: cell_text(&result, 0, "Name"),
            engine: cell_text(&result, 0, "Engine"),
            rows: result.value(0, "Rows").and_then(Value::as_u64),
        })
    }

    async fn fields(&mut self, table: &str) -> Result<Vec<Field>, DriverError> {
        let sql = format!(
            "SHOW FULL COLUMNS FROM {}",
            escape_identifier(Dialect::MySql, table)
        );
        let result = self.query(&sql).await?;
        let mut fields = Vec::with_capacity(result.row_count());
        for i in 0..result.row_count() {
            let full_type = cell_text(&result, i, "Type");
            let (type_tag, length, unsigned) = parse_column_type(&full_type);
            let extra = cell_text(&result, i, "Extra");
            let privileges = cell_text(&result, i, "Privileges");
            fields.push(Field {
                name: cell_text(&result, i, "Field"),
                type_tag,
                full_type,
                length,
                unsigned,
                null: cell_text(&result, i, "Null") == "YES",
                auto_increment: extra == "auto_increment",
                default: cell_opt(&result, i, "Default"),
                on_update: ON_UPDATE.captures(&extra).map(|caps| caps[1].to_string()),
                collation: cell_opt(&result, i, "Collation"),
                comment: cell_text(&result, i, "Comment"),
                primary: cell_text(&result, i, "Key") == "PRI",
                privileges: Privileges {
                    select: privileges.contains("select"),
                    insert: privileges.contains("insert"),
                    update: privileges.contains("update"),
                },
            });
        }
        Ok(fields)
    }

    async fn indexes(&mut self, table: &str) -> Result<Vec<Index>, DriverError> {
        let sql = format!("SHOW INDEX FROM {}", escape_identifier(Dialect::MySql, table));
        let result = self.query(&sql).await?;
        let mut indexes: Vec<Index> = Vec::new();
        for i in 0..result.row_count() {
            let name = cell_text(&result, i, "Key_name");
            let index_type = cell_text(&result, i, "Index_type");
            let non_unique = cell_text(&result, i, "Non_unique") != "0";
            let kind = if name == "PRIMARY" {
                IndexKind::Primary
            } else if index_type == "FULLTEXT" {
                IndexKind::Fulltext
            } else if index_type == "SPATIAL" {
                IndexKind::Spatial
            } else if non_unique {
                IndexKind::Plain
            } else {
                IndexKind::Unique
            };
            let part = IndexPart {
                column: cell_text(&result, i, "Column_name"),
                length: cell_text(&result, i, "Sub_part").parse().ok(),
                desc: cell_text(&result, i, "Collation") == "D",
            };
            match indexes.iter_mut().find(|index| index.name == name) {
                Some(index) => index.parts.push(part),
                None => indexes.push(Index {
                    name,
                    kind,
                    parts: vec![part],
                }),
            }
        }
        Ok(indexes)
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKey>, DriverError> {
        let sql = format!(
            "SELECT k.CONSTRAINT_NAME, k.COLUMN_NAME, k.REFERENCED_TABLE_SCHEMA, \
             k.REFERENCED_TABLE_NAME, k.REFERENCED_COLUMN_NAME, r.UPDATE_RULE, r.DELETE_RULE \
             FROM information_schema.KEY_COLUMN_USAGE k \
             JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
             ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
             WHERE k.TABLE_SCHEMA = DATABASE() AND k.TABLE_NAME = {} \
             AND k.REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
            quote_literal(Dialect::MySql, table)
        );
        let result = self.query(&sql).await?;
        let mut foreign_keys: Vec<ForeignKey> = Vec::new();
        for i in 0..result.row_count() {
            let name = cell_text(&result, i, "CONSTRAINT_NAME");
            let source = cell_text(&result, i, "COLUMN_NAME");
            let target = cell_text(&result, i, "REFERENCED_COLUMN_NAME");
            match foreign_keys.iter_mut().find(|fk| fk.name == name) {
                Some(fk) => {
                    fk.source.push(source);
                    fk.target.push(target);
                }
                None => {
                    let ref_schema = cell_text(&result, i, "REFERENCED_TABLE_SCHEMA");
                    let database = (!ref_schema.is_empty() && ref_schema != self.database)
                        .then_some(ref_schema);
                    foreign_keys.push(ForeignKey {
                        name,
                        database,
                        schema: None,
                        table: cell_text(&result, i, "REFERENCED_TABLE_NAME"),
                        source: vec![source],
                        target: vec![target],
                        on_delete: FkAction::parse(&cell_text(&result, i, "DELETE_RULE")),
                        on_update: FkAction::parse(&cell_text(&result, i, "UPDATE_RULE")),
                    });
                }
            }
        }
        Ok(foreign_keys)
    }
}
