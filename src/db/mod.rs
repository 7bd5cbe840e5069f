pub mod connection;
pub mod driver;
pub mod mysql;
pub mod postgres;
pub mod probe;
pub mod schema;

pub use connection::{connect, Backend, ConnectionConfig, Profiles};
pub use driver::{ColumnMeta, Driver, DriverError, ResultSet, Value};
pub use schema::{Field, ForeignKey, Index, IndexKind, TableStatus};
