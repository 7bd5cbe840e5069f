//! Navigation links between browse views.
//!
//! Three resolvers feed a renderer: `unique_key` finds how to address one
//! row for editing, `foreign_key_link` turns a cell into a jump to the
//! referenced table, and `count_link` turns a grouped COUNT cell into a
//! drill-down. All of them produce [`Link`], whose filters are the same
//! `{col, op, val}` triples the WHERE builder consumes, so every link
//! round-trips back into a browse request unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::driver::Value;
use crate::db::schema::{ForeignKey, Index, IndexKind};
use crate::sql::dialect::{Dialect, QueryContext};
use crate::sql::spec::Filter;

/// A fully described jump target. `database`/`schema` are present only when
/// following the link switches context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    /// Columns matched with IS NULL instead of equality.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub null_cols: Vec<String>,
}

/// The smallest set of column values that addresses exactly this row:
/// the first PRIMARY, then the first UNIQUE index whose columns are all
/// present and non-NULL. An index with any NULL column is skipped whole,
/// since unique indexes admit duplicate NULLs.
pub fn unique_key(row: &[(String, Value)], indexes: &[Index]) -> Option<Vec<(String, Value)>> {
    let primaries = indexes.iter().filter(|index| index.kind == IndexKind::Primary);
    let uniques = indexes.iter().filter(|index| index.kind == IndexKind::Unique);
    'index: for index in primaries.chain(uniques) {
        let mut key = Vec::with_capacity(index.parts.len());
        for part in &index.parts {
            match row.iter().find(|(name, _)| name == &part.column) {
                Some((name, value)) if !value.is_null() => {
                    key.push((name.clone(), value.clone()));
                }
                _ => continue 'index,
            }
        }
        if !key.is_empty() {
            return Some(key);
        }
    }
    None
}

/// Resolve the link a cell in `column` points to. A column participating in
/// several foreign keys only links through the one it terminates (its last
/// source column); otherwise the target would be ambiguous.
pub fn foreign_key_link(
    column: &str,
    row: &[(String, Value)],
    foreign_keys: &[ForeignKey],
) -> Option<Link> {
    let involving: Vec<&ForeignKey> = foreign_keys
        .iter()
        .filter(|fk| fk.source.iter().any(|source| source == column))
        .collect();
    let fk = involving
        .iter()
        .find(|fk| involving.len() == 1 || fk.source.last().map(String::as_str) == Some(column))?;

    let mut filters = Vec::new();
    let mut null_cols = Vec::new();
    for (source, target) in fk.source.iter().zip(&fk.target) {
        let value = row
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, value)| value)?;
        if value.is_null() {
            null_cols.push(target.clone());
        } else {
            filters.push(Filter::eq(target, value.display()));
        }
    }
    Some(Link {
        database: fk.database.clone(),
        schema: fk.schema.clone(),
        table: fk.table.clone(),
        filters,
        null_cols,
    })
}

static AGGREGATE_COLUMN_MYSQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(COUNT\((\*|(DISTINCT )?`(?:[^`]|``)+`)\)|(AVG|GROUP_CONCAT|MAX|MIN|SUM)\(`(?:[^`]|``)+`\))$"#)
        .unwrap()
});

static AGGREGATE_COLUMN_PG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(COUNT\((\*|(DISTINCT )?"(?:[^"]|"")+")\)|(AVG|GROUP_CONCAT|MAX|MIN|SUM)\("(?:[^"]|"")+"\))$"#)
        .unwrap()
});

/// Column values identifying this row in a follow-up request. Prefers a
/// real unique key; a grouped result has none, so there the identity is
/// every output column that is not an aggregate expression.
pub fn row_identity(
    ctx: &QueryContext,
    row: &[(String, Value)],
    indexes: &[Index],
) -> Vec<(String, Value)> {
    if let Some(key) = unique_key(row, indexes) {
        return key;
    }
    let re = match ctx.dialect {
        Dialect::MySql => &AGGREGATE_COLUMN_MYSQL,
        Dialect::Postgres => &AGGREGATE_COLUMN_PG,
    };
    row.iter()
        .filter(|(name, _)| !re.is_match(name))
        .cloned()
        .collect()
}

/// Drill-down link for a grouped COUNT cell: the same table, the active
/// filters, narrowed to this row's group. Filters on an identity column are
/// replaced by the group's own equality so the two cannot contradict.
pub fn count_link(table: &str, active: &[Filter], identity: &[(String, Value)]) -> Link {
    let mut filters: Vec<Filter> = active
        .iter()
        .filter(|filter| !identity.iter().any(|(name, _)| name == &filter.col))
        .cloned()
        .collect();
    let mut null_cols = Vec::new();
    for (name, value) in identity {
        if value.is_null() {
            null_cols.push(name.clone());
        } else {
            filters.push(Filter::eq(name, value.display()));
        }
    }
    Link {
        database: None,
        schema: None,
        table: table.to_string(),
        filters,
        null_cols,
    }
}

/// Whether an output column is the plain group count.
pub fn is_count_column(name: &str) -> bool {
    name == "COUNT(*)"
}
