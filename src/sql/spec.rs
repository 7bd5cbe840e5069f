//! Browse request description: immutable value objects built once from
//! external input and consumed by the builders. Malformed entries are dropped
//! at construction time, never turned into errors, so stale links keep
//! working after a schema change.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::dialect::Dialect;

/// Comparison operators accepted in a [`Filter`]. The list is closed: an
/// operator token arriving from outside either matches an entry here or the
/// whole filter is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    Like,
    /// `LIKE %%`: the value is wrapped in `%` wildcards before quoting.
    LikeContains,
    /// Case-insensitive LIKE, PostgreSQL only.
    ILike,
    ILikeContains,
    Regexp,
    In,
    FindInSet,
    IsNull,
    NotLike,
    NotRegexp,
    NotIn,
    IsNotNull,
    /// Value is injected verbatim. Privileged escape hatch; the execution
    /// surface exposing it must gate it behind an explicit capability.
    Sql,
}

impl Operator {
    /// Parse the external operator token. Unknown tokens yield `None`.
    pub fn parse(token: &str) -> Option<Operator> {
        Some(match token {
            "=" => Operator::Eq,
            "<" => Operator::Lt,
            ">" => Operator::Gt,
            "<=" => Operator::Le,
            ">=" => Operator::Ge,
            "!=" | "<>" => Operator::Ne,
            "LIKE" => Operator::Like,
            "LIKE %%" => Operator::LikeContains,
            "ILIKE" => Operator::ILike,
            "ILIKE %%" => Operator::ILikeContains,
            "REGEXP" => Operator::Regexp,
            "IN" => Operator::In,
            "FIND_IN_SET" => Operator::FindInSet,
            "IS NULL" => Operator::IsNull,
            "NOT LIKE" => Operator::NotLike,
            "NOT REGEXP" => Operator::NotRegexp,
            "NOT IN" => Operator::NotIn,
            "IS NOT NULL" => Operator::IsNotNull,
            "SQL" => Operator::Sql,
            _ => return None,
        })
    }

    /// Canonical token, the inverse of [`Operator::parse`].
    pub fn token(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
            Operator::Like => "LIKE",
            Operator::LikeContains => "LIKE %%",
            Operator::ILike => "ILIKE",
            Operator::ILikeContains => "ILIKE %%",
            Operator::Regexp => "REGEXP",
            Operator::In => "IN",
            Operator::FindInSet => "FIND_IN_SET",
            Operator::IsNull => "IS NULL",
            Operator::NotLike => "NOT LIKE",
            Operator::NotRegexp => "NOT REGEXP",
            Operator::NotIn => "NOT IN",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Sql => "SQL",
        }
    }

    /// SQL spelling. Regex matching is spelled `~`/`!~` on PostgreSQL.
    pub fn as_sql(self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (Operator::Regexp, Dialect::Postgres) => "~",
            (Operator::NotRegexp, Dialect::Postgres) => "!~",
            (Operator::LikeContains, _) => "LIKE",
            (Operator::ILikeContains, _) => "ILIKE",
            _ => self.token(),
        }
    }

    pub fn supported_by(self, dialect: Dialect) -> bool {
        match self {
            Operator::ILike | Operator::ILikeContains => matches!(dialect, Dialect::Postgres),
            Operator::FindInSet => matches!(dialect, Dialect::MySql),
            _ => true,
        }
    }

    /// IN and NOT IN take a parenthesized list instead of a single literal.
    pub fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_null_test(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// LIKE-family operators wrap or match patterns rather than raw values.
    pub fn is_like(self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::LikeContains
                | Operator::ILike
                | Operator::ILikeContains
                | Operator::NotLike
        )
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.token())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Operator::parse(&token)
            .ok_or_else(|| D::Error::custom(format!("unknown operator {:?}", token)))
    }
}

/// One column/operator/value condition. An empty column means "search every
/// compatible column". Filters in a batch are AND-combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub col: String,
    pub op: Operator,
    pub val: String,
}

impl Filter {
    /// Build a filter from external input. `None` when the operator token is
    /// unknown or when both column and value are empty (nothing to match).
    pub fn new(col: impl Into<String>, op: &str, val: impl Into<String>) -> Option<Filter> {
        let col = col.into();
        let val = val.into();
        let op = Operator::parse(op)?;
        if col.is_empty() && val.is_empty() {
            return None;
        }
        Some(Filter { col, op, val })
    }

    /// Equality filter, the shape navigation links round-trip through.
    pub fn eq(col: impl Into<String>, val: impl Into<String>) -> Filter {
        Filter {
            col: col.into(),
            op: Operator::Eq,
            val: val.into(),
        }
    }
}

/// One requested output column, optionally wrapped in a function. An empty
/// `col` stands for `*` and is only accepted together with `count`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnSpec {
    pub col: String,
    pub fun: String,
    pub alias: Option<String>,
}

impl ColumnSpec {
    pub fn plain(col: impl Into<String>) -> ColumnSpec {
        ColumnSpec {
            col: col.into(),
            ..Default::default()
        }
    }

    pub fn wrapped(fun: impl Into<String>, col: impl Into<String>) -> ColumnSpec {
        ColumnSpec {
            col: col.into(),
            fun: fun.into(),
            alias: None,
        }
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub col: String,
    pub desc: bool,
}

impl OrderSpec {
    pub fn asc(col: impl Into<String>) -> OrderSpec {
        OrderSpec {
            col: col.into(),
            desc: false,
        }
    }

    pub fn desc(col: impl Into<String>) -> OrderSpec {
        OrderSpec {
            col: col.into(),
            desc: true,
        }
    }
}

/// Page window. `limit == None` fetches everything; `page` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PageSpec {
    pub limit: Option<u64>,
    pub page: u64,
}

impl PageSpec {
    pub fn new(limit: u64, page: u64) -> PageSpec {
        PageSpec {
            limit: Some(limit),
            page,
        }
    }

    pub fn unlimited() -> PageSpec {
        PageSpec::default()
    }
}

/// Full-text condition keyed by the position of a FULLTEXT index in the
/// table's index list.
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextFilter {
    pub index: usize,
    pub query: String,
    pub boolean_mode: bool,
}

/// Everything one browse request specifies. Built once from external input,
/// immutable while the statement is assembled.
#[derive(Debug, Clone, Default)]
pub struct BrowseSpec {
    pub filters: Vec<Filter>,
    /// Columns constrained to `IS NULL`, kept apart from `filters` so links
    /// can address rows whose key contains NULL.
    pub null_cols: Vec<String>,
    pub fulltext: Vec<FullTextFilter>,
    pub columns: Vec<ColumnSpec>,
    pub orders: Vec<OrderSpec>,
    pub page: PageSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parse_round_trip() {
        for token in [
            "=", "<", ">", "<=", ">=", "!=", "LIKE", "LIKE %%", "ILIKE", "ILIKE %%", "REGEXP",
            "IN", "FIND_IN_SET", "IS NULL", "NOT LIKE", "NOT REGEXP", "NOT IN", "IS NOT NULL",
            "SQL",
        ] {
            let op = Operator::parse(token).unwrap();
            assert_eq!(op.token(), token);
        }
    }

    #[test]
    fn test_operator_parse_rejects_unknown() {
        assert_eq!(Operator::parse("BETWEEN"), None);
        assert_eq!(Operator::parse("like"), None);
        assert_eq!(Operator::parse(""), None);
    }

    #[test]
    fn test_operator_ne_alias() {
        assert_eq!(Operator::parse("<>"), Some(Operator::Ne));
    }

    #[test]
    fn test_operator_dialect_support() {
        assert!(Operator::FindInSet.supported_by(Dialect::MySql));
        assert!(!Operator::FindInSet.supported_by(Dialect::Postgres));
        assert!(Operator::ILike.supported_by(Dialect::Postgres));
        assert!(!Operator::ILike.supported_by(Dialect::MySql));
    }

    #[test]
    fn test_regexp_spelling_per_dialect() {
        assert_eq!(Operator::Regexp.as_sql(Dialect::MySql), "REGEXP");
        assert_eq!(Operator::Regexp.as_sql(Dialect::Postgres), "~");
        assert_eq!(Operator::NotRegexp.as_sql(Dialect::Postgres), "!~");
    }

    #[test]
    fn test_filter_new_drops_unknown_operator() {
        assert!(Filter::new("id", "BETWEEN", "1").is_none());
        assert!(Filter::new("id", "=", "1").is_some());
    }

    #[test]
    fn test_filter_new_drops_fully_empty() {
        assert!(Filter::new("", "=", "").is_none());
        // empty column with a value is the search-anywhere form
        assert!(Filter::new("", "=", "x").is_some());
    }

    #[test]
    fn test_filter_serde_round_trip() {
        let filter = Filter::new("name", "LIKE %%", "jo").unwrap();
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"col":"name","op":"LIKE %%","val":"jo"}"#);
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_filter_serde_rejects_unknown_operator() {
        let err = serde_json::from_str::<Filter>(r#"{"col":"a","op":"NOPE","val":""}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_page_spec() {
        assert_eq!(PageSpec::new(50, 2).limit, Some(50));
        assert_eq!(PageSpec::unlimited().limit, None);
    }
}
