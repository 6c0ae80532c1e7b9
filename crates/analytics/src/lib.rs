//! # Paper Ledger Analytics
//!
//! This crate values accounts: cash plus every position at its coin's
//! current price.
//!
//! ## Architectural Principles
//!
//! - **Read-only:** The `PortfolioValuator` never writes and never waits on
//!   the trade executor. It reads a user's cash and holdings from one store
//!   snapshot, so a valuation never mixes state from before and after a trade.
//! - **Stateless Calculation:** `value_snapshot` is a pure function from a
//!   snapshot to a `PortfolioValuation`. This makes it highly reliable and
//!   easy to test.
//!
//! ## Public API
//!
//! - `PortfolioValuator`: valuation, paginated holdings and account stats.
//! - `PortfolioValuation`, `HoldingView`, `HoldingsPage`, `PortfolioStats`: the output structs.
//! - `ValuationError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod error;
pub mod report;
pub mod valuator;

// Re-export the key components to create a clean, public-facing API.
pub use error::ValuationError;
pub use report::{HoldingView, HoldingsPage, PortfolioStats, PortfolioValuation};
pub use valuator::{PortfolioValuator, value_snapshot};
