//! One browse request end to end: introspect, build, execute, count.
//!
//! The row-count strategy is the interesting part. An exact count is only
//! computed when it is expected to be cheap; otherwise the engine's own
//! estimate is shown with an inexact marker. Exact counts that might still
//! be slow run through the cancellation probe so they can never hang a
//! request past the configured deadline.

use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::db::connection::{self, ConnectionConfig};
use crate::db::driver::{Driver, ResultSet, Value};
use crate::db::probe::run_probe;
use crate::db::schema::{Field, ForeignKey, Index, TableStatus};
use crate::error::EngineError;
use crate::sql::columns::{build_columns, build_count_query};
use crate::sql::dialect::{Dialect, QueryContext};
use crate::sql::filter::build_where;
use crate::sql::order::build_order;
use crate::sql::select::build_select_sql;
use crate::sql::spec::BrowseSpec;

/// Total row count for the pagination footer. Inexact counts render with a
/// `~` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCount {
    pub total: u64,
    pub exact: bool,
}

impl RowCount {
    /// Highest zero-based page number for the given page size. An inexact
    /// count is good enough for jumping to the last page.
    pub fn last_page(&self, limit: u64) -> u64 {
        if limit == 0 {
            0
        } else {
            self.total.saturating_sub(1) / limit
        }
    }
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exact {
            write!(f, "{}", self.total)
        } else {
            write!(f, "~{}", self.total)
        }
    }
}

/// Everything a rendering layer needs about one executed browse request.
pub struct BrowseResult {
    pub sql: String,
    pub result: ResultSet,
    pub count: RowCount,
    pub fields: Vec<Field>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    pub status: TableStatus,
    pub is_group: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum CountPlan {
    /// Derivable from the fetched page alone, no extra query.
    Local(u64),
    /// Run an exact count query; fall back to the estimate if it is killed.
    Exact { fallback: Option<u64> },
    /// The table is too large for a synchronous exact count.
    Approximate(u64),
}

fn plan_count(
    page: u64,
    limit: Option<u64>,
    fetched: u64,
    estimate: Option<u64>,
    is_group: bool,
    floor: u64,
) -> CountPlan {
    let limit = match limit {
        Some(limit) if limit > 0 => limit,
        _ => return CountPlan::Local(fetched),
    };
    // a short page means the end of the table was reached, except when a
    // deep page came back empty and tells us nothing
    if fetched < limit && (fetched > 0 || page == 0) {
        return CountPlan::Local(page.saturating_mul(limit) + fetched);
    }
    // table statistics cannot estimate grouped result cardinality
    let estimate = if is_group { None } else { estimate };
    let threshold = floor.max(page.saturating_add(1).saturating_mul(limit).saturating_mul(2));
    match estimate {
        Some(rows) if rows >= threshold => CountPlan::Approximate(rows),
        _ => CountPlan::Exact { fallback: estimate },
    }
}

/// Engine-reported row estimate, when one is trustworthy. Statistics only
/// describe the whole table, so any WHERE disqualifies them. On MySQL only
/// InnoDB counts are estimates; other engines report exact counts that a
/// plain COUNT(*) reproduces instantly anyway.
fn engine_estimate(dialect: Dialect, status: &TableStatus, has_where: bool) -> Option<u64> {
    if has_where {
        return None;
    }
    match dialect {
        Dialect::MySql => {
            if status.engine == "InnoDB" {
                status.rows
            } else {
                None
            }
        }
        Dialect::Postgres => status.rows,
    }
}

/// Assemble and run the browse SELECT, then settle the row count.
pub async fn select(
    driver: &mut dyn Driver,
    profile: &ConnectionConfig,
    engine: &EngineConfig,
    ctx: &QueryContext,
    table: &str,
    spec: &BrowseSpec,
) -> Result<BrowseResult, EngineError> {
    let status = driver
        .table_status(table)
        .await
        .map_err(EngineError::introspection)?;
    let fields = driver
        .fields(table)
        .await
        .map_err(EngineError::introspection)?;
    let indexes = driver
        .indexes(table)
        .await
        .map_err(EngineError::introspection)?;
    let foreign_keys = driver
        .foreign_keys(table)
        .await
        .map_err(EngineError::introspection)?;

    let where_fragments = build_where(
        ctx,
        &spec.filters,
        &spec.null_cols,
        &spec.fulltext,
        &fields,
        &indexes,
    );
    let plan = build_columns(ctx, &spec.columns);
    let order_exprs = build_order(ctx, &spec.orders);
    let sql = build_select_sql(ctx, table, &plan, &where_fragments, &order_exprs, &spec.page);

    let started = Instant::now();
    let result = driver.query(&sql).await.map_err(|source| EngineError::Query {
        sql: sql.clone(),
        source,
    })?;
    info!(
        rows = result.row_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        %sql,
        "page query"
    );

    let fetched = result.row_count() as u64;
    let estimate = engine_estimate(ctx.dialect, &status, !where_fragments.is_empty());
    let count = match plan_count(
        spec.page.page,
        spec.page.limit,
        fetched,
        estimate,
        plan.is_group,
        engine.exact_count_floor,
    ) {
        CountPlan::Local(total) => RowCount { total, exact: true },
        CountPlan::Approximate(total) => RowCount {
            total,
            exact: false,
        },
        CountPlan::Exact { fallback } => {
            let count_sql = build_count_query(ctx, table, &where_fragments, &plan);
            let secondary = if ctx.dialect.supports_kill() {
                match connection::connect(profile).await {
                    Ok(conn) => Some(conn),
                    Err(err) => {
                        debug!(%err, "no watcher connection, count probe runs unbounded");
                        None
                    }
                }
            } else {
                None
            };
            let probed = run_probe(driver, secondary, engine.probe_timeout(), &count_sql).await;
            match probed
                .as_ref()
                .and_then(|counted| counted.single_value())
                .and_then(Value::as_u64)
            {
                Some(total) => RowCount { total, exact: true },
                None => RowCount {
                    total: fallback.unwrap_or(0),
                    exact: false,
                },
            }
        }
    };

    Ok(BrowseResult {
        sql,
        result,
        count,
        fields,
        indexes,
        foreign_keys,
        status,
        is_group: plan.is_group,
    })
}

/// Alternating-row marker for rendering. One instance per result pass,
/// reset at the start of each result, never shared.
#[derive(Debug, Default)]
pub struct RowStripe {
    odd: bool,
}

impl RowStripe {
    pub fn next(&mut self) -> bool {
        let odd = self.odd;
        self.odd = !self.odd;
        odd
    }

    pub fn reset(&mut self) {
        self.odd = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn innodb(rows: Option<u64>) -> TableStatus {
        TableStatus {
            name: String::from("t"),
            engine: String::from("InnoDB"),
            rows,
        }
    }

    // ---------------- count planning ----------------

    #[test]
    fn test_unlimited_browse_counts_locally() {
        assert_eq!(
            plan_count(0, None, 37, Some(1_000_000), false, 10_000),
            CountPlan::Local(37)
        );
    }

    #[test]
    fn test_short_page_counts_locally_without_query() {
        assert_eq!(
            plan_count(0, Some(50), 12, Some(1_000_000), false, 10_000),
            CountPlan::Local(12)
        );
        assert_eq!(
            plan_count(3, Some(50), 7, Some(1_000_000), false, 10_000),
            CountPlan::Local(157)
        );
    }

    #[test]
    fn test_empty_deep_page_does_not_count_locally() {
        // page 4 came back empty: the table ended somewhere before, but we
        // do not know where
        assert_eq!(
            plan_count(4, Some(50), 0, None, false, 10_000),
            CountPlan::Exact { fallback: None }
        );
    }

    #[test]
    fn test_small_estimate_triggers_exact_count() {
        assert_eq!(
            plan_count(0, Some(50), 50, Some(9_999), false, 10_000),
            CountPlan::Exact {
                fallback: Some(9_999)
            }
        );
    }

    #[test]
    fn test_large_estimate_stays_approximate() {
        assert_eq!(
            plan_count(0, Some(50), 50, Some(5_000_000), false, 10_000),
            CountPlan::Approximate(5_000_000)
        );
        // the threshold is inclusive
        assert_eq!(
            plan_count(0, Some(50), 50, Some(10_000), false, 10_000),
            CountPlan::Approximate(10_000)
        );
    }

    #[test]
    fn test_deep_pages_raise_the_exactness_threshold() {
        // page 199, limit 50: threshold = max(10000, 2*200*50) = 20000
        assert_eq!(
            plan_count(199, Some(50), 50, Some(15_000), false, 10_000),
            CountPlan::Exact {
                fallback: Some(15_000)
            }
        );
        assert_eq!(
            plan_count(199, Some(50), 50, Some(20_000), false, 10_000),
            CountPlan::Approximate(20_000)
        );
    }

    #[test]
    fn test_grouped_results_ignore_table_estimates() {
        // table stats say 5M rows, but grouping changes cardinality
        assert_eq!(
            plan_count(0, Some(50), 50, Some(5_000_000), true, 10_000),
            CountPlan::Exact { fallback: None }
        );
    }

    // ---------------- engine estimates ----------------

    #[test]
    fn test_estimate_rejected_when_filtered() {
        assert_eq!(
            engine_estimate(Dialect::MySql, &innodb(Some(100)), true),
            None
        );
    }

    #[test]
    fn test_mysql_estimate_only_for_innodb() {
        assert_eq!(
            engine_estimate(Dialect::MySql, &innodb(Some(100)), false),
            Some(100)
        );
        let myisam = TableStatus {
            name: String::from("t"),
            engine: String::from("MyISAM"),
            rows: Some(100),
        };
        assert_eq!(engine_estimate(Dialect::MySql, &myisam, false), None);
    }

    #[test]
    fn test_postgres_estimate_uses_reltuples() {
        let status = TableStatus {
            name: String::from("t"),
            engine: String::new(),
            rows: Some(4200),
        };
        assert_eq!(
            engine_estimate(Dialect::Postgres, &status, false),
            Some(4200)
        );
        // never-analyzed tables report no estimate at all
        let unanalyzed = TableStatus {
            name: String::from("t"),
            engine: String::new(),
            rows: None,
        };
        assert_eq!(engine_estimate(Dialect::Postgres, &unanalyzed, false), None);
    }

    // ---------------- display ----------------

    #[test]
    fn test_row_count_display() {
        let exact = RowCount {
            total: 1234,
            exact: true,
        };
        let rough = RowCount {
            total: 5_000_000,
            exact: false,
        };
        assert_eq!(exact.to_string(), "1234");
        assert_eq!(rough.to_string(), "~5000000");
    }

    #[test]
    fn test_last_page() {
        let count = RowCount {
            total: 100,
            exact: true,
        };
        assert_eq!(count.last_page(20), 4);
        let count = RowCount {
            total: 101,
            exact: true,
        };
        assert_eq!(count.last_page(20), 5);
        let count = RowCount {
            total: 0,
            exact: true,
        };
        assert_eq!(count.last_page(20), 0);
        assert_eq!(count.last_page(0), 0);
    }

    #[test]
    fn test_row_stripe_alternates_and_resets() {
        let mut stripe = RowStripe::default();
        assert!(!stripe.next());
        assert!(stripe.next());
        assert!(!stripe.next());
        stripe.reset();
        assert!(!stripe.next());
    }
}
