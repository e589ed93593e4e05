//! Transaction-scoped persistence for the Strongroom engine.
//!
//! The core abstraction is the [`context::DbContext`]: a request-scoped
//! handle carrying the pool and, inside [`context::with_tx`], the
//! ambient transaction every repository call transparently joins.
//! Repositories are traits with Postgres and MySQL backends; the
//! dialect difference (identifier rendering, placeholder syntax, lock
//! clauses) stays inside this crate and is invisible above it.

pub mod config;
pub mod context;
mod error;
mod executor;
pub mod health;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod page;
pub mod repository;

pub use config::{connect_mysql, connect_postgres, DatabaseConfig};
pub use health::HealthStatus;
pub use context::{with_tx, DbContext, MySqlContext, PgContext};
pub use migrate::{run_mysql_migrations, run_postgres_migrations};
pub use models::{AuditLog, Client, Dek, Kek, OutboxEvent, OutboxStatus, Secret, Token};
pub use page::Page;
