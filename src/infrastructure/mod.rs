//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics helpers
//! - `odbc`: SQL Server connector over ODBC
//! - `postgres`: PostgreSQL connector
//! - `resilience`: Retry backoff and circuit breaker

pub mod config;
pub mod error;
pub mod metrics;
pub mod odbc;
pub mod postgres;
pub mod resilience;
