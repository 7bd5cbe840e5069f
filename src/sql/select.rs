//! Final SELECT assembly. Everything arriving here is already escaped; this
//! module only owns clause ordering. The returned string is also the export
//! hand-off: dump tooling re-runs it without the page window.

use super::columns::ColumnPlan;
use super::dialect::QueryContext;
use super::filter::where_clause;
use super::order::limit_clause;
use super::spec::PageSpec;

/// Assemble the browse SELECT from pre-built fragments.
pub fn build_select_sql(
    ctx: &QueryContext,
    table: &str,
    plan: &ColumnPlan,
    where_fragments: &[String],
    orders: &[String],
    page: &PageSpec,
) -> String {
    let mut sql = String::from("SELECT ");
    if plan.select.is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&plan.select.join(", "));
    }
    sql.push_str(" FROM ");
    sql.push_str(&ctx.table_ref(table));
    sql.push_str(&where_clause(where_fragments));
    if plan.is_group && !plan.group.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&plan.group.join(", "));
    }
    if !orders.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&orders.join(", "));
    }
    sql.push_str(&limit_clause(page));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::columns::build_columns;
    use crate::sql::dialect::Dialect;
    use crate::sql::filter::build_where;
    use crate::sql::order::build_order;
    use crate::sql::spec::{ColumnSpec, Filter, OrderSpec};
    use crate::db::schema::Field;

    #[test]
    fn test_full_statement_assembly() {
        let ctx = QueryContext::new(Dialect::MySql);
        let fields = [Field {
            name: "total".into(),
            type_tag: "decimal".into(),
            ..Default::default()
        }];
        let filters = [Filter::new("total", ">=", "100.50").unwrap()];
        let where_fragments = build_where(&ctx, &filters, &[], &[], &fields, &[]);
        let orders = build_order(&ctx, &[OrderSpec::desc("id")]);
        let sql = build_select_sql(
            &ctx,
            "orders",
            &ColumnPlan::all(),
            &where_fragments,
            &orders,
            &PageSpec::new(20, 0),
        );
        assert_eq!(
            sql,
            "SELECT * FROM `orders` WHERE `total` >= '100.50' ORDER BY `id` DESC LIMIT 20"
        );
    }

    #[test]
    fn test_grouped_statement_includes_group_by() {
        let ctx = QueryContext::new(Dialect::MySql);
        let plan = build_columns(
            &ctx,
            &[ColumnSpec::plain("customer"), ColumnSpec::wrapped("count", "")],
        );
        let orders = build_order(&ctx, &[OrderSpec::desc("COUNT(*)")]);
        let sql = build_select_sql(&ctx, "orders", &plan, &[], &orders, &PageSpec::new(50, 1));
        assert_eq!(
            sql,
            "SELECT `customer`, COUNT(*) FROM `orders` GROUP BY `customer` \
             ORDER BY COUNT(*) DESC LIMIT 50 OFFSET 50"
        );
    }

    #[test]
    fn test_schema_qualified_table() {
        let mut ctx = QueryContext::new(Dialect::Postgres);
        ctx.schema = Some("shop".into());
        let sql = build_select_sql(
            &ctx,
            "orders",
            &ColumnPlan::all(),
            &[],
            &[],
            &PageSpec::unlimited(),
        );
        assert_eq!(sql, "SELECT * FROM \"shop\".\"orders\"");
    }

    #[test]
    fn test_aggregates_without_group_emit_no_group_by() {
        let ctx = QueryContext::new(Dialect::MySql);
        let plan = build_columns(&ctx, &[ColumnSpec::wrapped("count", "")]);
        let sql = build_select_sql(&ctx, "t", &plan, &[], &[], &PageSpec::unlimited());
        assert_eq!(sql, "SELECT COUNT(*) FROM `t`");
    }
}
