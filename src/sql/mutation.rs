//! INSERT/UPDATE/DELETE assembly.
//!
//! Posted field values plus an optional input function become SQL
//! expressions, with type-specific encodings (ENUM ordinals, SET bitmasks,
//! hex blobs, validated JSON) applied before quoting. The multi-row upsert
//! splits into packet-sized statements and always runs inside one
//! transaction.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::dialect::{Dialect, QueryContext};
use super::filter::where_clause;
use super::quote::{escape_identifier, quote_binary, quote_literal};
use crate::db::driver::Driver;
use crate::db::schema::Field;
use crate::error::EngineError;

static INTERVAL_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+|'[0-9.: -]+') [A-Z_]+$").unwrap());

/// Outcome of processing one posted field.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedValue {
    /// SQL expression to assign.
    Expr(String),
    /// SQL NULL.
    Null,
    /// Leave the stored value untouched; the assignment is omitted.
    Keep,
}

/// Posted value for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInput {
    Text(String),
    /// Raw uploaded bytes for blob-family columns.
    Upload(Vec<u8>),
    /// Selected members of a SET column.
    Selected(Vec<String>),
}

impl FieldInput {
    fn text(&self) -> Option<&str> {
        match self {
            FieldInput::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Turn one posted field into an SQL expression.
///
/// ENUM values travel as 1-based ordinals ("-1" keeps the stored value, ""
/// assigns NULL), SET values as bitmasks, blobs as hex literals, JSON only
/// after it parses. The `function` is the edit-form input function; unknown
/// functions fall back to plain quoting.
pub fn process_input(
    ctx: &QueryContext,
    field: &Field,
    input: &FieldInput,
    function: &str,
) -> ProcessedValue {
    if function == "NULL" {
        return ProcessedValue::Null;
    }

    if field.type_tag == "enum" {
        let value = match input.text() {
            Some(value) => value,
            None => return ProcessedValue::Keep,
        };
        return match value {
            "-1" => ProcessedValue::Keep,
            "" => ProcessedValue::Null,
            _ => match value.parse::<u32>() {
                Ok(ordinal) => ProcessedValue::Expr(ordinal.to_string()),
                Err(_) => {
                    debug!(field = %field.name, value, "enum ordinal not numeric, keeping stored value");
                    ProcessedValue::Keep
                }
            },
        };
    }

    if field.auto_increment && input.text().map(str::is_empty).unwrap_or(false) {
        return ProcessedValue::Keep;
    }

    if function == "orig" {
        // re-assigning the column to itself defeats ON UPDATE CURRENT_TIMESTAMP
        return if field.on_update_is_current_timestamp() {
            ProcessedValue::Expr(escape_identifier(ctx.dialect, &field.name))
        } else {
            ProcessedValue::Keep
        };
    }

    if field.type_tag == "set" {
        return ProcessedValue::Expr(set_bitmask(field, input).to_string());
    }

    if field.is_blob() {
        return match input {
            FieldInput::Upload(bytes) => {
                ProcessedValue::Expr(quote_binary(ctx.dialect, bytes))
            }
            _ => ProcessedValue::Keep,
        };
    }

    let value = input.text().unwrap_or("");

    if function == "json" || field.is_json() {
        return match serde_json::from_str::<serde_json::Value>(value) {
            Ok(_) => ProcessedValue::Expr(quote_literal(ctx.dialect, value)),
            Err(err) => {
                warn!(field = %field.name, %err, "rejecting invalid JSON");
                ProcessedValue::Keep
            }
        };
    }

    ProcessedValue::Expr(apply_function(ctx, field, value, function))
}

/// OR of the selected SET members' bit positions; a numeric selection is
/// taken as a ready bit value.
fn set_bitmask(field: &Field, input: &FieldInput) -> u64 {
    let selected: Vec<String> = match input {
        FieldInput::Selected(items) => items.clone(),
        FieldInput::Text(value) if !value.is_empty() => {
            value.split(',').map(|item| item.trim().to_string()).collect()
        }
        _ => Vec::new(),
    };
    let members = field.enum_values();
    let mut mask = 0u64;
    for item in &selected {
        if let Ok(bits) = item.parse::<u64>() {
            mask |= bits;
        } else if let Some(position) = members.iter().position(|member| member == item) {
            mask |= 1 << position;
        }
    }
    mask
}

/// Input-function rewriting for ordinary columns; falls through to literal
/// quoting. The function vocabulary mirrors the edit form: value-less
/// generators, column arithmetic, interval arithmetic, and digest functions.
fn apply_function(ctx: &QueryContext, field: &Field, value: &str, function: &str) -> String {
    let dialect = ctx.dialect;
    let quoted = quote_literal(dialect, value);
    match function {
        "" => quoted,
        // verbatim escape hatch, same capability gate as the SQL operator
        "SQL" => value.to_string(),
        "now" | "uuid" => format!("{}()", function),
        "current_date" | "current_timestamp" => function.to_string(),
        "+" | "-" | "||" => {
            format!("{} {} {}", escape_identifier(dialect, &field.name), function, quoted)
        }
        "+ interval" | "- interval" => {
            // the operand grammar is checked, not quoted: `2 DAY` or '1:30' HOUR_MINUTE
            let operand = if INTERVAL_VALUE.is_match(value) {
                value.to_string()
            } else {
                quoted
            };
            format!("{} {} {}", escape_identifier(dialect, &field.name), function, operand)
        }
        "addtime" | "subtime" | "concat" => format!(
            "{}({}, {})",
            function,
            escape_identifier(dialect, &field.name),
            quoted
        ),
        "md5" | "sha1" | "password" | "encrypt" => format!("{}({})", function, quoted),
        other => {
            debug!(function = other, field = %field.name, "unknown input function ignored");
            quoted
        }
    }
}

/// INSERT for one row; `Keep` fields are omitted. A row with nothing left
/// inserts all defaults.
pub fn build_insert(
    ctx: &QueryContext,
    table: &str,
    row: &[(String, ProcessedValue)],
) -> String {
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    for (name, value) in row {
        let expr = match value {
            ProcessedValue::Expr(expr) => expr.clone(),
            ProcessedValue::Null => "NULL".to_string(),
            ProcessedValue::Keep => continue,
        };
        cols.push(escape_identifier(ctx.dialect, name));
        vals.push(expr);
    }
    if cols.is_empty() {
        return match ctx.dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", ctx.table_ref(table)),
            Dialect::Postgres => format!("INSERT INTO {} DEFAULT VALUES", ctx.table_ref(table)),
        };
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        ctx.table_ref(table),
        cols.join(", "),
        vals.join(", ")
    )
}

/// UPDATE constrained by pre-built row-identity fragments. `None` when every
/// field said `Keep`, so callers skip the statement instead of running an
/// empty SET.
pub fn build_update(
    ctx: &QueryContext,
    table: &str,
    row: &[(String, ProcessedValue)],
    where_fragments: &[String],
) -> Option<String> {
    let mut sets = Vec::new();
    for (name, value) in row {
        let expr = match value {
            ProcessedValue::Expr(expr) => expr.clone(),
            ProcessedValue::Null => "NULL".to_string(),
            ProcessedValue::Keep => continue,
        };
        sets.push(format!("{} = {}", escape_identifier(ctx.dialect, name), expr));
    }
    if sets.is_empty() {
        return None;
    }
    Some(format!(
        "UPDATE {} SET {}{}",
        ctx.table_ref(table),
        sets.join(", "),
        where_clause(where_fragments)
    ))
}

pub fn build_delete(ctx: &QueryContext, table: &str, where_fragments: &[String]) -> String {
    format!(
        "DELETE FROM {}{}",
        ctx.table_ref(table),
        where_clause(where_fragments)
    )
}

/// Split a multi-row upsert into statements that stay under `max_packet`
/// bytes. A row is never split across statements; a chunk flushes before the
/// row that would overflow it, so any statement can exceed the cap only when
/// a single row alone does.
pub fn build_insert_update(
    ctx: &QueryContext,
    table: &str,
    columns: &[String],
    rows: &[Vec<String>],
    primary: &[String],
    max_packet: usize,
) -> Vec<String> {
    let dialect = ctx.dialect;
    let cols: Vec<String> = columns
        .iter()
        .map(|col| escape_identifier(dialect, col))
        .collect();
    let prefix = format!("INSERT INTO {} ({}) VALUES\n", ctx.table_ref(table), cols.join(", "));
    let suffix = match dialect {
        Dialect::MySql => {
            let updates: Vec<String> = cols
                .iter()
                .map(|col| format!("{} = VALUES({})", col, col))
                .collect();
            format!("\nON DUPLICATE KEY UPDATE {}", updates.join(", "))
        }
        Dialect::Postgres => {
            let conflict: Vec<String> = primary
                .iter()
                .map(|col| escape_identifier(dialect, col))
                .collect();
            let updates: Vec<String> = cols
                .iter()
                .map(|col| format!("{} = EXCLUDED.{}", col, col))
                .collect();
            format!(
                "\nON CONFLICT ({}) DO UPDATE SET {}",
                conflict.join(", "),
                updates.join(", ")
            )
        }
    };

    let mut statements = Vec::new();
    let mut values: Vec<String> = Vec::new();
    let mut length = 0usize;
    for row in rows {
        let value = format!("({})", row.join(", "));
        if !values.is_empty()
            && prefix.len() + length + value.len() + suffix.len() > max_packet
        {
            statements.push(format!("{}{}{}", prefix, values.join(",\n"), suffix));
            values.clear();
            length = 0;
        }
        length += value.len() + 2; // ",\n" separator
        values.push(value);
    }
    if !values.is_empty() {
        statements.push(format!("{}{}{}", prefix, values.join(",\n"), suffix));
    }
    statements
}

/// Run the chunked upsert inside one transaction. Any failing chunk rolls the
/// whole batch back; partial success is not an outcome.
pub async fn insert_update(
    driver: &mut dyn Driver,
    ctx: &QueryContext,
    table: &str,
    columns: &[String],
    rows: &[Vec<String>],
    primary: &[String],
    max_packet: usize,
) -> Result<u64, EngineError> {
    let statements = build_insert_update(ctx, table, columns, rows, primary, max_packet);
    driver.begin().await.map_err(EngineError::transaction)?;
    let mut affected = 0;
    for sql in &statements {
        debug!(bytes = sql.len(), "upsert chunk");
        match driver.execute(sql).await {
            Ok(count) => affected += count,
            Err(source) => {
                warn!(code = %source.code, "upsert chunk failed, rolling back batch");
                if let Err(rollback_err) = driver.rollback().await {
                    warn!(code = %rollback_err.code, "rollback failed");
                }
                return Err(EngineError::Query {
                    sql: sql.clone(),
                    source,
                });
            }
        }
    }
    driver.commit().await.map_err(EngineError::transaction)?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dialect: Dialect) -> QueryContext {
        QueryContext::new(dialect)
    }

    fn field(name: &str, type_tag: &str) -> Field {
        Field {
            name: name.into(),
            type_tag: type_tag.into(),
            ..Default::default()
        }
    }

    fn text(value: &str) -> FieldInput {
        FieldInput::Text(value.into())
    }

    // --- process_input ---

    #[test]
    fn test_plain_value_quoted() {
        let out = process_input(&ctx(Dialect::MySql), &field("name", "varchar"), &text("it's"), "");
        assert_eq!(out, ProcessedValue::Expr(r"'it\'s'".into()));
    }

    #[test]
    fn test_null_function() {
        let out = process_input(&ctx(Dialect::MySql), &field("name", "varchar"), &text("x"), "NULL");
        assert_eq!(out, ProcessedValue::Null);
    }

    #[test]
    fn test_enum_ordinals() {
        let f = field("size", "enum");
        let c = ctx(Dialect::MySql);
        assert_eq!(process_input(&c, &f, &text("-1"), ""), ProcessedValue::Keep);
        assert_eq!(process_input(&c, &f, &text(""), ""), ProcessedValue::Null);
        assert_eq!(process_input(&c, &f, &text("2"), ""), ProcessedValue::Expr("2".into()));
        assert_eq!(process_input(&c, &f, &text("huge"), ""), ProcessedValue::Keep);
    }

    #[test]
    fn test_auto_increment_empty_keeps() {
        let mut f = field("id", "int");
        f.auto_increment = true;
        let out = process_input(&ctx(Dialect::MySql), &f, &text(""), "");
        assert_eq!(out, ProcessedValue::Keep);
    }

    #[test]
    fn test_orig_function_on_update_timestamp() {
        let mut f = field("updated_at", "timestamp");
        f.on_update = Some("CURRENT_TIMESTAMP".into());
        let out = process_input(&ctx(Dialect::MySql), &f, &text("anything"), "orig");
        assert_eq!(out, ProcessedValue::Expr("`updated_at`".into()));

        f.on_update = None;
        let out = process_input(&ctx(Dialect::MySql), &f, &text("anything"), "orig");
        assert_eq!(out, ProcessedValue::Keep);
    }

    #[test]
    fn test_set_bitmask_from_members() {
        let mut f = field("tags", "set");
        f.length = "'red','green','blue'".into();
        let out = process_input(
            &ctx(Dialect::MySql),
            &f,
            &FieldInput::Selected(vec!["red".into(), "blue".into()]),
            "",
        );
        assert_eq!(out, ProcessedValue::Expr("5".into()));
    }

    #[test]
    fn test_set_numeric_selection_used_verbatim() {
        let mut f = field("tags", "set");
        f.length = "'red','green'".into();
        let out = process_input(&ctx(Dialect::MySql), &f, &FieldInput::Selected(vec!["3".into()]), "");
        assert_eq!(out, ProcessedValue::Expr("3".into()));
    }

    #[test]
    fn test_blob_takes_upload_only() {
        let f = field("avatar", "blob");
        let c = ctx(Dialect::MySql);
        let out = process_input(&c, &f, &FieldInput::Upload(vec![0xde, 0xad]), "");
        assert_eq!(out, ProcessedValue::Expr("X'DEAD'".into()));
        assert_eq!(process_input(&c, &f, &text("x"), ""), ProcessedValue::Keep);
    }

    #[test]
    fn test_json_validation() {
        let f = field("payload", "json");
        let c = ctx(Dialect::MySql);
        let out = process_input(&c, &f, &text(r#"{"a":1}"#), "");
        assert_eq!(out, ProcessedValue::Expr(r#"'{"a":1}'"#.into()));
        assert_eq!(process_input(&c, &f, &text("{oops"), ""), ProcessedValue::Keep);
    }

    #[test]
    fn test_value_less_functions() {
        let f = field("created", "datetime");
        let c = ctx(Dialect::MySql);
        assert_eq!(
            process_input(&c, &f, &text("2024-01-01"), "now"),
            ProcessedValue::Expr("now()".into())
        );
        assert_eq!(
            process_input(&c, &f, &text(""), "current_timestamp"),
            ProcessedValue::Expr("current_timestamp".into())
        );
    }

    #[test]
    fn test_column_arithmetic() {
        let f = field("qty", "int");
        let out = process_input(&ctx(Dialect::MySql), &f, &text("5"), "+");
        assert_eq!(out, ProcessedValue::Expr("`qty` + '5'".into()));
    }

    #[test]
    fn test_interval_operand_grammar() {
        let f = field("expires", "datetime");
        let c = ctx(Dialect::MySql);
        assert_eq!(
            process_input(&c, &f, &text("2 DAY"), "+ interval"),
            ProcessedValue::Expr("`expires` + interval 2 DAY".into())
        );
        assert_eq!(
            process_input(&c, &f, &text("'1:30' HOUR_MINUTE"), "- interval"),
            ProcessedValue::Expr("`expires` - interval '1:30' HOUR_MINUTE".into())
        );
        // malformed operand degrades to a quoted literal
        assert_eq!(
            process_input(&c, &f, &text("2 DAY; DROP"), "+ interval"),
            ProcessedValue::Expr(r"`expires` + interval '2 DAY; DROP'".into())
        );
    }

    #[test]
    fn test_digest_functions_wrap_value() {
        let f = field("pw", "varchar");
        let out = process_input(&ctx(Dialect::MySql), &f, &text("secret"), "md5");
        assert_eq!(out, ProcessedValue::Expr("md5('secret')".into()));
    }

    #[test]
    fn test_unknown_function_quotes_value() {
        let f = field("name", "varchar");
        let out = process_input(&ctx(Dialect::MySql), &f, &text("x"), "sleep");
        assert_eq!(out, ProcessedValue::Expr("'x'".into()));
    }

    // --- statement builders ---

    #[test]
    fn test_build_insert_skips_keep() {
        let row = vec![
            ("id".to_string(), ProcessedValue::Keep),
            ("name".to_string(), ProcessedValue::Expr("'jo'".into())),
            ("note".to_string(), ProcessedValue::Null),
        ];
        let sql = build_insert(&ctx(Dialect::MySql), "users", &row);
        assert_eq!(sql, "INSERT INTO `users` (`name`, `note`) VALUES ('jo', NULL)");
    }

    #[test]
    fn test_build_insert_all_defaults() {
        let row = vec![("id".to_string(), ProcessedValue::Keep)];
        assert_eq!(
            build_insert(&ctx(Dialect::MySql), "users", &row),
            "INSERT INTO `users` () VALUES ()"
        );
        assert_eq!(
            build_insert(&ctx(Dialect::Postgres), "users", &row),
            "INSERT INTO \"users\" DEFAULT VALUES"
        );
    }

    #[test]
    fn test_build_update_none_when_nothing_changes() {
        let row = vec![("id".to_string(), ProcessedValue::Keep)];
        assert_eq!(
            build_update(&ctx(Dialect::MySql), "users", &row, &["`id` = '1'".into()]),
            None
        );
    }

    #[test]
    fn test_build_update_with_identity() {
        let row = vec![("name".to_string(), ProcessedValue::Expr("'jo'".into()))];
        let sql = build_update(&ctx(Dialect::MySql), "users", &row, &["`id` = '1'".into()]);
        assert_eq!(
            sql.as_deref(),
            Some("UPDATE `users` SET `name` = 'jo' WHERE `id` = '1'")
        );
    }

    #[test]
    fn test_build_delete() {
        let sql = build_delete(&ctx(Dialect::MySql), "users", &["`id` = '1'".into()]);
        assert_eq!(sql, "DELETE FROM `users` WHERE `id` = '1'");
    }

    // --- upsert chunking ---

    fn upsert_rows(count: usize, width: usize) -> Vec<Vec<String>> {
        (0..count)
            .map(|i| vec![format!("'{}'", i), format!("'{}'", "x".repeat(width))])
            .collect()
    }

    #[test]
    fn test_upsert_single_statement_when_under_cap() {
        let c = ctx(Dialect::MySql);
        let cols = vec!["id".to_string(), "payload".to_string()];
        let out = build_insert_update(&c, "t", &cols, &upsert_rows(3, 10), &["id".into()], 1_000_000);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("INSERT INTO `t` (`id`, `payload`) VALUES\n"));
        assert!(out[0].ends_with("ON DUPLICATE KEY UPDATE `id` = VALUES(`id`), `payload` = VALUES(`payload`)"));
        assert_eq!(out[0].matches("('").count(), 3);
    }

    #[test]
    fn test_upsert_chunks_never_exceed_cap_or_split_rows() {
        let c = ctx(Dialect::MySql);
        let cols = vec!["id".to_string(), "payload".to_string()];
        let rows = upsert_rows(40, 100);
        let cap = 1000;
        let out = build_insert_update(&c, "t", &cols, &rows, &["id".into()], cap);
        assert!(out.len() > 1);
        let mut total_rows = 0;
        for statement in &out {
            assert!(statement.len() <= cap, "statement of {} bytes over cap", statement.len());
            total_rows += statement.matches("('").count();
        }
        assert_eq!(total_rows, rows.len());
    }

    #[test]
    fn test_upsert_oversized_single_row_still_emitted() {
        let c = ctx(Dialect::MySql);
        let cols = vec!["id".to_string(), "payload".to_string()];
        let out = build_insert_update(&c, "t", &cols, &upsert_rows(1, 5000), &["id".into()], 100);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_upsert_postgres_on_conflict() {
        let c = ctx(Dialect::Postgres);
        let cols = vec!["id".to_string(), "name".to_string()];
        let rows = vec![vec!["'1'".to_string(), "'jo'".to_string()]];
        let out = build_insert_update(&c, "t", &cols, &rows, &["id".into()], 1_000_000);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("ON CONFLICT (\"id\") DO UPDATE SET \"id\" = EXCLUDED.\"id\", \"name\" = EXCLUDED.\"name\""));
    }
}
