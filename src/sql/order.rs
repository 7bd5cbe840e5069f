//! ORDER BY and LIMIT/OFFSET rendering.

use once_cell::sync::Lazy;
use regex::Regex;

use super::dialect::{Dialect, QueryContext};
use super::quote::escape_identifier;
use super::spec::{OrderSpec, PageSpec};

// A sort token passes as a raw expression only when it is exactly an
// aggregate or single-argument function over one quoted identifier (or
// COUNT(*)). Everything else is escaped as a plain identifier.
static ORDER_EXPR_MYSQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((COUNT\(DISTINCT |[A-Z0-9_]+\()(`(?:[^`]|``)+`|\*)\)|COUNT\(\*\))$").unwrap()
});
static ORDER_EXPR_PG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^((COUNT\(DISTINCT |[A-Z0-9_]+\()("(?:[^"]|"")+"|\*)\)|COUNT\(\*\))$"#).unwrap()
});

/// Build ORDER BY expressions. The sort parameter is external input, so
/// whatever fails the expression whitelist is treated as a column name and
/// escaped whole.
pub fn build_order(ctx: &QueryContext, orders: &[OrderSpec]) -> Vec<String> {
    let re = match ctx.dialect {
        Dialect::MySql => &ORDER_EXPR_MYSQL,
        Dialect::Postgres => &ORDER_EXPR_PG,
    };
    orders
        .iter()
        .filter(|order| !order.col.is_empty())
        .map(|order| {
            let expr = if re.is_match(&order.col) {
                order.col.clone()
            } else {
                escape_identifier(ctx.dialect, &order.col)
            };
            if order.desc {
                format!("{} DESC", expr)
            } else {
                expr
            }
        })
        .collect()
}

/// `" LIMIT n"` / `" LIMIT n OFFSET m"`; empty when the page is unlimited.
/// The offset is always `page * limit`, so a shrinking table simply yields a
/// short or empty last page.
pub fn limit_clause(page: &PageSpec) -> String {
    match page.limit {
        Some(limit) => {
            let offset = limit.saturating_mul(page.page);
            if offset > 0 {
                format!(" LIMIT {} OFFSET {}", limit, offset)
            } else {
                format!(" LIMIT {}", limit)
            }
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dialect: Dialect) -> QueryContext {
        QueryContext::new(dialect)
    }

    #[test]
    fn test_plain_column_escaped() {
        let out = build_order(&ctx(Dialect::MySql), &[OrderSpec::desc("id")]);
        assert_eq!(out, vec!["`id` DESC"]);
    }

    #[test]
    fn test_ascending_has_no_suffix() {
        let out = build_order(&ctx(Dialect::MySql), &[OrderSpec::asc("name")]);
        assert_eq!(out, vec!["`name`"]);
    }

    #[test]
    fn test_aggregate_expression_allowed() {
        for expr in ["COUNT(*)", "COUNT(DISTINCT `customer`)", "SUM(`qty`)", "ROUND(`price`)"] {
            let out = build_order(&ctx(Dialect::MySql), &[OrderSpec::desc(expr)]);
            assert_eq!(out, vec![format!("{expr} DESC")], "{expr} should pass");
        }
    }

    #[test]
    fn test_postgres_expression_allowed() {
        let out = build_order(&ctx(Dialect::Postgres), &[OrderSpec::asc("SUM(\"qty\")")]);
        assert_eq!(out, vec!["SUM(\"qty\")"]);
    }

    #[test]
    fn test_injection_attempt_is_escaped_whole() {
        let out = build_order(&ctx(Dialect::MySql), &[OrderSpec::asc("id; DROP TABLE x")]);
        assert_eq!(out, vec!["`id; DROP TABLE x`"]);
    }

    #[test]
    fn test_function_over_raw_sql_rejected() {
        // quoted-identifier argument is required, so smuggling inside the
        // parentheses fails the whitelist
        let out = build_order(&ctx(Dialect::MySql), &[OrderSpec::asc("SUM(1); --")]);
        assert_eq!(out, vec!["`SUM(1); --`"]);
        let out = build_order(
            &ctx(Dialect::MySql),
            &[OrderSpec::asc("SUM(`a` + SLEEP(1))")],
        );
        assert_eq!(out, vec!["`SUM(``a`` + SLEEP(1))`"]);
    }

    #[test]
    fn test_empty_column_skipped() {
        assert!(build_order(&ctx(Dialect::MySql), &[OrderSpec::asc("")]).is_empty());
    }

    #[test]
    fn test_limit_clause_first_page() {
        assert_eq!(limit_clause(&PageSpec::new(50, 0)), " LIMIT 50");
    }

    #[test]
    fn test_limit_clause_with_offset() {
        assert_eq!(limit_clause(&PageSpec::new(20, 3)), " LIMIT 20 OFFSET 60");
    }

    #[test]
    fn test_limit_clause_unlimited() {
        assert_eq!(limit_clause(&PageSpec::unlimited()), "");
    }
}
