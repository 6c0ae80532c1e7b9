//! # Paper Ledger Database Crate
//!
//! This crate is the ledger's storage layer: users, coins, holdings and the
//! append-only trade log.
//!
//! ## Architectural Principles
//!
//! - **One contract, two engines:** [`LedgerStore`] and [`LedgerTransaction`]
//!   describe everything the trading engine needs from storage. `DbRepository`
//!   implements them on PostgreSQL; `InMemoryLedgerStore` implements them in
//!   process for tests and local runs.
//! - **Transactions all the way down:** every trade write goes through a
//!   `LedgerTransaction`, which publishes nothing until it commits. The
//!   PostgreSQL implementation takes `FOR UPDATE` row locks on the user and
//!   holding it reads and bounds lock waits with `lock_timeout`.
//! - **Asynchronous & Pooled:** All operations are asynchronous, and it uses a
//!   connection pool (`PgPool`) for concurrent database access.
//!
//! ## Public API
//!
//! - `connect`: The async function to establish the database connection pool.
//! - `run_migrations`: A utility to apply database migrations, ensuring the schema is up-to-date.
//! - `DbRepository`, `InMemoryLedgerStore`: the two store implementations.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{MIGRATOR, connect, run_migrations};
pub use error::DbError;
pub use memory::InMemoryLedgerStore;
pub use repository::DbRepository;
pub use store::{LedgerStore, LedgerTransaction, PortfolioSnapshot};
