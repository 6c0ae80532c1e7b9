//! # Paper Ledger Executor Crate
//!
//! This crate turns buy and sell orders into ledger writes. It owns the
//! holding accounting rules and the concurrency discipline around them.
//!
//! ## Architectural Principles
//!
//! - **Pure accounting:** [`accountant::apply`] computes the position a trade
//!   leaves behind without touching storage. The executor persists whatever
//!   it returns, so the averaging and liquidation rules live in one place.
//! - **One transaction per trade:** [`TradeExecutor::execute`] performs every
//!   read and write of a trade inside a single [`database::LedgerTransaction`].
//!   Any failure before or during commit rolls the whole trade back.
//! - **Per-user serialization:** trades of the same user queue on a
//!   [`UserLocks`] entry for the full read-modify-write, so two trades can never
//!   both spend the same cash. Trades of different users do not wait on each other.
//!
//! ## Public API
//!
//! - `TradeExecutor`, `TradeOrder`: the execution entry point and its input.
//! - `UserLocks`, `UserGuard`: the per-user serialization registry.
//! - `TradeError`, `AccountingError`: the failure kinds of this crate.

pub mod accountant;
pub mod error;
pub mod locks;
pub mod trade_executor;

pub use error::{AccountingError, TradeError};
pub use locks::{UserGuard, UserLocks};
pub use trade_executor::{TradeExecutor, TradeOrder};
