//! The storage contract the trading engine is written against.
//!
//! [`LedgerStore`] is the shared handle; [`LedgerTransaction`] is one atomic
//! unit of work opened from it. Nothing written through a transaction is
//! visible to anyone else until [`LedgerTransaction::commit`] succeeds, and a
//! transaction that is rolled back or simply dropped leaves no trace.

use crate::error::DbError;
use async_trait::async_trait;
use core_types::{
    Coin, CoinOrdering, CoinPriceUpdate, Holding, HoldingWithCoin, MarketSummary, NewCoin,
    NewTrade, NewUser, Page, PageRequest, Position, Trade, TradeWithCoin, User, WatchlistItem,
};
use rust_decimal::Decimal;

/// A consistent, point-in-time view of one user's account.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub user: User,
    /// Every holding of the user, joined with its coin. All have `quantity > 0`.
    pub holdings: Vec<HoldingWithCoin>,
    pub total_trades: u64,
    pub watchlist_count: u64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a read-write transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DbError>;

    /// Reads the user, their holdings and their trade count inside a single
    /// snapshot so that cash and positions reflect the same moment.
    /// Returns `None` when the user does not exist.
    async fn portfolio_snapshot(&self, user_id: i64)
    -> Result<Option<PortfolioSnapshot>, DbError>;

    async fn create_user(&self, user: &NewUser) -> Result<User, DbError>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DbError>;

    async fn create_coin(&self, coin: &NewCoin) -> Result<Coin, DbError>;

    async fn get_coin(&self, coin_id: i64) -> Result<Option<Coin>, DbError>;

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>, DbError>;

    /// Coins in the requested order. Ties are broken by id, ascending.
    async fn list_coins(
        &self,
        page: PageRequest,
        ordering: CoinOrdering,
    ) -> Result<Page<Coin>, DbError>;

    async fn market_summary(&self) -> Result<MarketSummary, DbError>;

    /// Overwrites price and market data of the coins named in `updates`.
    /// Symbols that match no coin are skipped. Returns how many coins changed.
    async fn apply_price_updates(&self, updates: &[CoinPriceUpdate]) -> Result<usize, DbError>;

    /// The user's trades, newest first.
    async fn list_trades(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<TradeWithCoin>, DbError>;

    /// The user's watched coins, oldest entry first.
    async fn list_watchlist(&self, user_id: i64) -> Result<Vec<WatchlistItem>, DbError>;

    /// Fails with `NotFound` when the user or the coin does not exist and with
    /// `Conflict` when the coin is already watched.
    async fn add_to_watchlist(&self, user_id: i64, coin_id: i64)
    -> Result<WatchlistItem, DbError>;

    /// Removes one entry, but only if it belongs to `user_id`; otherwise `NotFound`.
    async fn remove_from_watchlist(&self, user_id: i64, entry_id: i64) -> Result<(), DbError>;
}

/// One atomic unit of ledger writes.
///
/// The `lock_*` reads also claim the row for the rest of the transaction so
/// that no concurrent writer can change it between the read and the commit.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn lock_user(&mut self, user_id: i64) -> Result<Option<User>, DbError>;

    async fn get_coin(&mut self, coin_id: i64) -> Result<Option<Coin>, DbError>;

    async fn lock_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
    ) -> Result<Option<Holding>, DbError>;

    async fn update_balance(&mut self, user_id: i64, balance: Decimal) -> Result<(), DbError>;

    /// Creates the (user, coin) holding or overwrites its quantity and average price.
    async fn upsert_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
        position: &Position,
    ) -> Result<(), DbError>;

    async fn delete_holding(&mut self, user_id: i64, coin_id: i64) -> Result<(), DbError>;

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
