//! # Waybill Diesel
//!
//! Async Diesel integration for PostgreSQL: deadpool-backed pools, a
//! transaction helper with explicit isolation levels, and read/write routed
//! pools built from the deployment's CQRS mode.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use waybill_cqrs::Role;
//! use waybill_diesel::{DataSourceConfig, connect_routed};
//!
//! let config = DataSourceConfig::from_env()?;
//! let pools = connect_routed(&config).await?;
//!
//! let mut conn = pools.resolve(Role::Read).get().await?;
//! ```

#![warn(clippy::all)]

mod config;
mod error;
mod pool;
#[cfg(all(feature = "postgres", feature = "deadpool"))]
mod routed;
pub mod schema;

pub use config::*;
pub use error::*;
pub use pool::*;
#[cfg(all(feature = "postgres", feature = "deadpool"))]
pub use routed::*;
pub use schema::{qualified_table, quote_schema};

// Re-export diesel types for convenience
pub use diesel;
pub use diesel_async;

#[cfg(feature = "deadpool")]
pub use diesel_async::pooled_connection::deadpool;
