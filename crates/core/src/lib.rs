//! Core domain layer for the Harbor indexer.
//!
//! This crate contains the domain models, port traits (interfaces),
//! and ingestion services for the object-storage-chain indexer. It
//! follows hexagonal architecture principles - this is the innermost
//! layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      harbor (binary)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │    harbor-chain         │         harbor-modules            │
//! │   (node RPC + codec)    │      (domain projections)         │
//! ├─────────────────────────┴───────────────────────────────────┤
//! │                      harbor-storage                         │
//! │                      (PostgreSQL)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      harbor-core  ← YOU ARE HERE            │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Block, Transaction, Validator, ...)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Ingestion engine (queue, producers, workers,
//!   pipelines, scheduler, supervisor)
//! - [`config`] - Configuration schema and loading
//! - [`error`] - Layered error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! Ports define interfaces that external adapters must implement:
//!
//! - [`ports::ChainSource`] - Fetch blocks/results/txs/validators and
//!   subscribe to new blocks
//! - [`ports::Repository`] - Persist the engine-owned projection
//! - [`ports::Module`] - Consume per-block/tx/message/event hooks
//!
//! ## Ingestion lifecycle
//!
//! 1. Discovery producers enqueue heights (backfill + tip)
//! 2. Workers drain the bounded height queue
//! 3. The per-height pipeline fetches from the chain source, persists
//!    the canonical rows, and fans out to module hooks
//! 4. Module failures are logged and swallowed; engine persistence
//!    failures send the height back for retry

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(test)]
pub mod testing;
