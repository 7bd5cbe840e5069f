//! WHERE fragment builder.
//!
//! Filters arrive as untyped column/operator/value triples and leave as SQL
//! fragments with every identifier and literal escaped. Malformed or
//! dialect-unsupported entries are dropped with a debug log instead of
//! failing the request.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::dialect::{Dialect, QueryContext};
use super::quote::{escape_column_key, escape_identifier, parse_quoted_list, quote_literal};
use super::spec::{Filter, FullTextFilter, Operator};
use crate::db::schema::{Field, Index, IndexKind};

static LOOKS_LIKE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+-\d+").unwrap());

/// Build AND-combined WHERE fragments from filters, NULL columns and
/// full-text conditions. Each returned string is a self-contained boolean
/// expression; join with `" AND "`.
pub fn build_where(
    ctx: &QueryContext,
    filters: &[Filter],
    null_cols: &[String],
    fulltext: &[FullTextFilter],
    fields: &[Field],
    indexes: &[Index],
) -> Vec<String> {
    let dialect = ctx.dialect;
    let mut fragments = Vec::new();

    for filter in filters {
        if filter.col.is_empty() && filter.val.is_empty() {
            continue;
        }
        if !filter.op.supported_by(dialect) {
            debug!(op = filter.op.token(), "operator not available in this dialect, dropping filter");
            continue;
        }
        if filter.op == Operator::Sql && filter.col.is_empty() {
            // verbatim condition without a column
            fragments.push(filter.val.clone());
            continue;
        }

        let field = field_by_name(fields, &filter.col);
        let (prefix, cond) = condition_parts(dialect, filter);

        if filter.col.is_empty() {
            // search anywhere: one fragment per type-compatible column
            let mut alternatives = Vec::new();
            for candidate in fields {
                if !value_fits_field(candidate, &filter.val, filter.op) {
                    continue;
                }
                let col_sql = escape_identifier(dialect, &candidate.name);
                let converted = convert_search(ctx, &col_sql, &filter.val, Some(candidate));
                alternatives.push(format!("{}{}{}", prefix, converted, cond));
            }
            if alternatives.is_empty() {
                // no column can hold the value, so nothing matches
                fragments.push("1 = 0".to_string());
            } else {
                fragments.push(format!("({})", alternatives.join(" OR ")));
            }
            continue;
        }

        let col_sql = escape_column_key(dialect, &filter.col);
        let converted = convert_search(ctx, &col_sql, &filter.val, field);

        if filter.op == Operator::Eq {
            if let Some(field) = field {
                if field.is_numeric() && is_decimal_literal(&filter.val) {
                    // exact decimal comparison loses trailing zeros; LIKE on
                    // the unconverted text form keeps "3.0" distinct from "3"
                    fragments.push(format!(
                        "{} LIKE {}",
                        converted,
                        quote_literal(dialect, &filter.val)
                    ));
                    continue;
                }
            }
        }

        fragments.push(format!("{}{}{}", prefix, converted, cond));

        if filter.op == Operator::Eq && dialect.default_collation_ci() {
            if let Some(field) = field {
                if field.is_char() && needs_case_sensitive_match(&filter.val) {
                    fragments.push(format!(
                        "{} = {} COLLATE {}_bin",
                        col_sql,
                        quote_literal(dialect, &filter.val),
                        dialect.charset()
                    ));
                }
            }
        }
    }

    for col in null_cols {
        fragments.push(format!("{} IS NULL", escape_column_key(dialect, col)));
    }

    for ft in fulltext {
        if ft.query.is_empty() {
            continue;
        }
        if !dialect.supports_fulltext() {
            debug!("full-text filters ignored by this dialect");
            continue;
        }
        let index = match indexes.get(ft.index) {
            Some(index) if index.kind == IndexKind::Fulltext => index,
            _ => continue,
        };
        let cols = index
            .parts
            .iter()
            .map(|part| escape_identifier(dialect, &part.column))
            .collect::<Vec<_>>()
            .join(", ");
        fragments.push(format!(
            "MATCH ({}) AGAINST ({}{})",
            cols,
            quote_literal(dialect, &ft.query),
            if ft.boolean_mode { " IN BOOLEAN MODE" } else { "" }
        ));
    }

    fragments
}

/// Render fragments as a `" WHERE ..."` clause, empty when there is nothing
/// to constrain.
pub fn where_clause(fragments: &[String]) -> String {
    if fragments.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", fragments.join(" AND "))
    }
}

fn field_by_name<'a>(fields: &'a [Field], name: &str) -> Option<&'a Field> {
    fields.iter().find(|field| field.name == name)
}

/// The operator-dependent pieces around the (possibly converted) column:
/// FIND_IN_SET wraps the column in a call, everything else appends.
fn condition_parts(dialect: Dialect, filter: &Filter) -> (String, String) {
    let op = filter.op;
    if op == Operator::FindInSet {
        return (
            format!("FIND_IN_SET({}, ", quote_literal(dialect, &filter.val)),
            ")".to_string(),
        );
    }
    let cond = if op == Operator::Sql {
        format!(" {}", filter.val)
    } else if op.is_null_test() {
        format!(" {}", op.as_sql(dialect))
    } else if op.takes_list() {
        let items = parse_quoted_list(&filter.val);
        let list = if items.is_empty() {
            // IN () is a syntax error; IN (NULL) matches nothing
            "(NULL)".to_string()
        } else {
            format!("({})", items.join(", "))
        };
        format!(" {} {}", op.as_sql(dialect), list)
    } else if matches!(op, Operator::LikeContains | Operator::ILikeContains) {
        format!(
            " {} {}",
            op.as_sql(dialect),
            quote_literal(dialect, &format!("%{}%", filter.val))
        )
    } else {
        format!(" {} {}", op.as_sql(dialect), quote_literal(dialect, &filter.val))
    };
    (String::new(), cond)
}

/// Search-anywhere type compatibility: a value only searches columns whose
/// type could hold it.
fn value_fits_field(field: &Field, val: &str, op: Operator) -> bool {
    let numeric_ok =
        looks_numeric(val, op.takes_list()) || !(field.is_numeric() || field.is_bit());
    let charset_ok = !has_non_ascii(val) || field.is_char();
    let date_ok = !field.is_datetime() || LOOKS_LIKE_DATE.is_match(val);
    numeric_ok && charset_ok && date_ok
}

/// MySQL compares a non-ASCII literal against a non-UTF-8 column through an
/// explicit charset conversion; every other case passes the column through.
fn convert_search(ctx: &QueryContext, col_sql: &str, val: &str, field: Option<&Field>) -> String {
    if ctx.dialect == Dialect::MySql {
        if let Some(field) = field {
            let non_utf8 = field
                .collation
                .as_deref()
                .map(|collation| !collation.starts_with("utf8"))
                .unwrap_or(false);
            if field.is_char() && non_utf8 && has_non_ascii(val) {
                return format!("CONVERT({} USING {})", col_sql, ctx.dialect.charset());
            }
        }
    }
    col_sql.to_string()
}

fn looks_numeric(val: &str, allow_comma: bool) -> bool {
    !val.is_empty()
        && val.bytes().all(|b| {
            b.is_ascii_digit() || b == b'-' || b == b'.' || (allow_comma && b == b',')
        })
}

fn has_non_ascii(val: &str) -> bool {
    val.bytes().any(|b| b >= 0x80)
}

/// True when the value contains anything beyond digits and punctuation, i.e.
/// letters in any script, so case-insensitive equality could over-match.
fn needs_case_sensitive_match(val: &str) -> bool {
    val.bytes().any(|b| !(b' '..=b'@').contains(&b))
}

fn is_decimal_literal(val: &str) -> bool {
    val.contains('.') && val.parse::<f64>().is_ok()
}
