//! Dialect-aware SQL text construction.
//!
//! Everything here builds strings; nothing executes. External input flows
//! through one pipeline:
//!
//! ```text
//! Filter/ColumnSpec/OrderSpec/PageSpec
//!     -> filter::build_where      (WHERE fragments)
//!     -> columns::build_columns   (SELECT list + GROUP BY set)
//!     -> order::build_order       (ORDER BY expressions)
//!     -> select::build_select_sql (assembled statement)
//! ```
//!
//! with `quote` underneath all of it. Mutations take the parallel path
//! through `mutation::process_input` into the INSERT/UPDATE builders.

pub mod columns;
pub mod dialect;
pub mod filter;
pub mod mutation;
pub mod order;
pub mod quote;
pub mod select;
pub mod spec;

pub use dialect::{Dialect, QueryContext};
pub use spec::{BrowseSpec, ColumnSpec, Filter, FullTextFilter, Operator, OrderSpec, PageSpec};
