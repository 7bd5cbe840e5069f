use serde::{Deserialize, Serialize};

use super::quote::escape_identifier;

/// SQL dialect tag. Selects the identifier quote character, literal escaping
/// rules, collation behavior and the count/cancellation features a backend
/// offers. Dialect-specific behavior lives here as explicit strategy values
/// instead of being scattered over the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    /// Identifier quote character: backtick on MySQL, double quote on PostgreSQL.
    pub fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        }
    }

    /// Whether the default collation compares case-insensitively. MySQL's
    /// utf8mb4 default does, so equality filters there get a secondary
    /// case-sensitive fragment.
    pub fn default_collation_ci(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Connection character set, used for CONVERT() wrapping and as the
    /// prefix of the binary collation suffix.
    pub fn charset(self) -> &'static str {
        match self {
            Dialect::MySql => "utf8mb4",
            Dialect::Postgres => "UTF8",
        }
    }

    /// `COUNT(DISTINCT a, b)` over several columns is a MySQL extension.
    pub fn supports_multi_column_distinct(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// `MATCH ... AGAINST` full-text fragments.
    pub fn supports_fulltext(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Whether a second connection can cancel a running statement
    /// (`KILL` on MySQL, `pg_cancel_backend` on PostgreSQL).
    pub fn supports_kill(self) -> bool {
        true
    }

    /// Scalar functions offered for output columns.
    pub fn scalar_functions(self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => &[
                "char_length",
                "date",
                "from_unixtime",
                "lower",
                "round",
                "floor",
                "ceil",
                "sec_to_time",
                "time_to_sec",
                "upper",
            ],
            Dialect::Postgres => &[
                "char_length",
                "lower",
                "round",
                "to_hex",
                "to_timestamp",
                "upper",
            ],
        }
    }

    /// Aggregate functions. A selected column wrapped in one of these stays
    /// out of the GROUP BY column set.
    pub fn grouping_functions(self) -> &'static [&'static str] {
        match self {
            Dialect::MySql => &[
                "avg",
                "count",
                "count distinct",
                "group_concat",
                "max",
                "min",
                "sum",
            ],
            Dialect::Postgres => &["avg", "count", "count distinct", "max", "min", "sum"],
        }
    }
}

/// Per-request context threaded through every builder call: the active
/// dialect plus the database/schema the request is scoped to. Replaces any
/// notion of process-wide connection state.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub dialect: Dialect,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl QueryContext {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            database: None,
            schema: None,
        }
    }

    /// Escaped table reference, schema-qualified when a schema is set.
    pub fn table_ref(&self, table: &str) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                escape_identifier(self.dialect, schema),
                escape_identifier(self.dialect, table)
            ),
            None => escape_identifier(self.dialect, table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_chars() {
        assert_eq!(Dialect::MySql.quote_char(), '`');
        assert_eq!(Dialect::Postgres.quote_char(), '"');
    }

    #[test]
    fn test_collation_defaults() {
        assert!(Dialect::MySql.default_collation_ci());
        assert!(!Dialect::Postgres.default_collation_ci());
    }

    #[test]
    fn test_fulltext_support() {
        assert!(Dialect::MySql.supports_fulltext());
        assert!(!Dialect::Postgres.supports_fulltext());
    }

    #[test]
    fn test_table_ref_plain() {
        let ctx = QueryContext::new(Dialect::MySql);
        assert_eq!(ctx.table_ref("orders"), "`orders`");
    }

    #[test]
    fn test_table_ref_with_schema() {
        let mut ctx = QueryContext::new(Dialect::Postgres);
        ctx.schema = Some("public".into());
        assert_eq!(ctx.table_ref("orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_grouping_functions_include_count() {
        assert!(Dialect::MySql.grouping_functions().contains(&"count"));
        assert!(Dialect::Postgres.grouping_functions().contains(&"count"));
    }
}
