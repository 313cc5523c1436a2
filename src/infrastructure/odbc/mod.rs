//! SQL Server connectivity over ODBC.
//!
//! Connection string handling is always available; the connector itself needs
//! the `odbc` feature (and unixODBC plus a SQL Server driver on the host).

#[cfg(feature = "odbc")]
mod connector;
mod dsn;

#[cfg(feature = "odbc")]
pub use connector::{OdbcConnector, OdbcSession};
pub use dsn::{build_connection_string, is_transient_odbc_state, mask_connection_string};
