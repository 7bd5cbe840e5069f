//! Output column planning: which requested columns are accepted, how they
//! render, and which of them form the GROUP BY set. Also builds the row-count
//! statement the pagination footer runs.

use tracing::debug;

use super::dialect::QueryContext;
use super::filter::where_clause;
use super::quote::escape_identifier;
use super::spec::ColumnSpec;

/// The accepted output columns: rendered select expressions, the grouping
/// subset, and whether the statement aggregates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnPlan {
    pub select: Vec<String>,
    pub group: Vec<String>,
    pub is_group: bool,
}

impl ColumnPlan {
    /// The implicit `SELECT *` plan used when no columns were requested.
    pub fn all() -> ColumnPlan {
        ColumnPlan::default()
    }
}

/// Validate the requested columns against the dialect's function lists and
/// render them. A column is accepted when its function is `count`, or when
/// the column is named and the function is empty, scalar or aggregating;
/// everything else is dropped.
pub fn build_columns(ctx: &QueryContext, specs: &[ColumnSpec]) -> ColumnPlan {
    let dialect = ctx.dialect;
    let mut select = Vec::new();
    let mut group = Vec::new();
    for spec in specs {
        let fun = spec.fun.as_str();
        let is_grouping = dialect.grouping_functions().contains(&fun);
        let is_scalar = dialect.scalar_functions().contains(&fun);
        let accepted =
            fun == "count" || (!spec.col.is_empty() && (fun.is_empty() || is_scalar || is_grouping));
        if !accepted {
            debug!(fun, col = %spec.col, "output column rejected");
            continue;
        }
        let col_sql = if spec.col.is_empty() {
            "*".to_string()
        } else {
            escape_identifier(dialect, &spec.col)
        };
        let expr = apply_sql_function(fun, &col_sql);
        if !is_grouping {
            group.push(expr.clone());
        }
        match &spec.alias {
            Some(alias) => select.push(format!(
                "{} AS {}",
                expr,
                escape_identifier(dialect, alias)
            )),
            None => select.push(expr),
        }
    }
    // aggregates alone never force GROUP BY; only a mix of grouped and
    // aggregated columns does
    let is_group = !group.is_empty() && group.len() < select.len();
    ColumnPlan {
        select,
        group,
        is_group,
    }
}

/// Render `fun(col)`; `count distinct` becomes `COUNT(DISTINCT col)`, other
/// functions are upper-cased verbatim.
pub fn apply_sql_function(fun: &str, col: &str) -> String {
    if fun.is_empty() {
        col.to_string()
    } else if fun == "count distinct" {
        format!("COUNT(DISTINCT {})", col)
    } else {
        format!("{}({})", fun.to_uppercase(), col)
    }
}

/// Row-count statement for the current filters. Grouped plans count distinct
/// group keys, through a subselect when the dialect cannot spell
/// `COUNT(DISTINCT a, b)` over several columns.
pub fn build_count_query(
    ctx: &QueryContext,
    table: &str,
    where_fragments: &[String],
    plan: &ColumnPlan,
) -> String {
    let from = format!(" FROM {}{}", ctx.table_ref(table), where_clause(where_fragments));
    if plan.is_group {
        if ctx.dialect.supports_multi_column_distinct() || plan.group.len() == 1 {
            return format!("SELECT COUNT(DISTINCT {}){}", plan.group.join(", "), from);
        }
        return format!(
            "SELECT COUNT(*) FROM (SELECT 1{} GROUP BY {}) x",
            from,
            plan.group.join(", ")
        );
    }
    format!("SELECT COUNT(*){}", from)
}
