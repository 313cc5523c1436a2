//! PostgreSQL connectivity.
//!
//! Provides the connector used by the PostgreSQL session pool.

mod connector;

pub use connector::{is_transient_sqlstate, mask_url, PostgresConnector};
