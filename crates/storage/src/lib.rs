//! Storage layer for the Harbor indexer.
//!
//! This crate provides the PostgreSQL implementation of the
//! `Repository` port defined in `harbor-core`. It handles connection
//! pooling, the engine-owned schema migrations, tracked module
//! migrations, and all engine CRUD operations.
//!
//! Module-owned tables do not live here: each domain module declares
//! its own migrations and runs them through
//! [`Database::run_module_migrations`] from its `PrepareTables` hook.

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepository};
