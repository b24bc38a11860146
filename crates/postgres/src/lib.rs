//! # Postgres
//!
//! PostgreSQL persistence for the parking detection engine: connection
//! management, schema migrations and the store implementations.

/// Connection pool and migrations
pub mod database;
/// Store implementations over a connection pool
pub mod stores;

pub use stores::PgParkingStore;
