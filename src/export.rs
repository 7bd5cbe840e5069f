//! Result-set serializers: CSV, TSV, JSON, and re-importable SQL.
//!
//! These work from an already-fetched [`ResultSet`]; producing the SELECT
//! that feeds them is the query builders' job.

use crate::db::driver::{ResultSet, Value};
use crate::sql::dialect::QueryContext;
use crate::sql::quote::{escape_identifier, quote_binary, quote_literal};

pub fn to_csv(result: &ResultSet) -> String {
    let mut output = String::new();

    let headers: Vec<String> = result
        .columns
        .iter()
        .map(|col| csv_escape(&col.name))
        .collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| csv_escape(&cell_to_text(cell)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

pub fn to_tsv(result: &ResultSet) -> String {
    let mut output = String::new();

    let headers: Vec<&str> = result
        .columns
        .iter()
        .map(|col| col.name.as_str())
        .collect();
    output.push_str(&headers.join("\t"));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell_to_text(cell).replace('\t', " "))
            .collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
    }

    output
}

pub fn to_json(result: &ResultSet) -> String {
    let mut rows_json: Vec<serde_json::Value> = Vec::new();

    for row in &result.rows {
        let mut obj = serde_json::Map::new();
        for (i, cell) in row.iter().enumerate() {
            let col_name = result
                .columns
                .get(i)
                .map(|col| col.name.clone())
                .unwrap_or_else(|| format!("column_{}", i));
            obj.insert(col_name, cell_to_json(cell));
        }
        rows_json.push(serde_json::Value::Object(obj));
    }

    serde_json::to_string_pretty(&rows_json).unwrap_or_else(|_| "[]".to_string())
}

/// Re-importable INSERT statements in the context's dialect.
pub fn to_sql_insert(ctx: &QueryContext, result: &ResultSet, table: &str) -> String {
    if result.rows.is_empty() || result.columns.is_empty() {
        return String::new();
    }

    let mut output = String::new();
    let col_names: Vec<String> = result
        .columns
        .iter()
        .map(|col| escape_identifier(ctx.dialect, &col.name))
        .collect();

    for row in &result.rows {
        output.push_str(&format!(
            "INSERT INTO {} ({}) VALUES\n",
            ctx.table_ref(table),
            col_names.join(", ")
        ));
        let values: Vec<String> = row.iter().map(|cell| cell_to_sql(ctx, cell)).collect();
        output.push_str(&format!("  ({});\n", values.join(", ")));
    }

    output
}

fn cell_to_text(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        other => other.display(),
    }
}

fn cell_to_json(cell: &Value) -> serde_json::Value {
    match cell {
        Value::Null => serde_json::Value::Null,
        Value::Int(value) => serde_json::json!(*value),
        Value::UInt(value) => serde_json::json!(*value),
        Value::Float(value) => serde_json::json!(*value),
        Value::Json(value) => value.clone(),
        other => serde_json::Value::String(other.display()),
    }
}

fn cell_to_sql(ctx: &QueryContext, cell: &Value) -> String {
    match cell {
        Value::Null => "NULL".to_string(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Bytes(bytes) => quote_binary(ctx.dialect, bytes),
        other => quote_literal(ctx.dialect, &other.display()),
    }
}

fn csv_escape(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') || text.contains('\r') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}
