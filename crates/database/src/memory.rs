//! An in-process ledger store with the same transactional contract as the
//! PostgreSQL repository: writes are staged in the transaction and published
//! all at once on commit, under a single write guard.
//!
//! It backs the test suites and the `--in-memory` server mode. Row locks are
//! not modelled; writers of the same user are expected to be serialized by
//! the caller, which the trade executor does.

use crate::error::DbError;
use crate::store::{LedgerStore, LedgerTransaction, PortfolioSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    Coin, CoinOrdering, CoinPriceUpdate, CoinSort, Holding, HoldingWithCoin, MarketSummary,
    NewCoin, NewTrade, NewUser, Page, PageRequest, Position, SortOrder, Trade, TradeWithCoin, User,
    WatchlistEntry, WatchlistItem,
};
use rust_decimal::Decimal;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct LedgerState {
    users: BTreeMap<i64, User>,
    coins: BTreeMap<i64, Coin>,
    holdings: BTreeMap<(i64, i64), Holding>,
    trades: Vec<Trade>,
    watchlist: BTreeMap<i64, WatchlistEntry>,
    next_user_id: i64,
    next_coin_id: i64,
    next_holding_id: i64,
    next_watchlist_id: i64,
}

impl LedgerState {
    fn trade_with_coin(&self, trade: &Trade) -> Result<TradeWithCoin, DbError> {
        let coin = self.coins.get(&trade.coin_id).cloned().ok_or_else(|| {
            DbError::Corrupt(format!("trade {} references unknown coin {}", trade.id, trade.coin_id))
        })?;
        Ok(TradeWithCoin {
            trade: trade.clone(),
            coin,
        })
    }

    fn watchlist_item(&self, entry: &WatchlistEntry) -> Result<WatchlistItem, DbError> {
        let coin = self.coins.get(&entry.coin_id).cloned().ok_or_else(|| {
            DbError::Corrupt(format!(
                "watchlist entry {} references unknown coin {}",
                entry.id, entry.coin_id
            ))
        })?;
        Ok(WatchlistItem {
            entry: entry.clone(),
            coin,
        })
    }
}

fn compare_coins(a: &Coin, b: &Coin, ordering: CoinOrdering) -> CmpOrdering {
    let by_column = match ordering.sort {
        CoinSort::MarketCap => a.market_cap.cmp(&b.market_cap),
        CoinSort::CurrentPrice => a.current_price.cmp(&b.current_price),
        CoinSort::Volume24h => a.volume_24h.cmp(&b.volume_24h),
        CoinSort::Symbol => a.symbol.cmp(&b.symbol),
    };
    let by_column = match ordering.order {
        SortOrder::Asc => by_column,
        SortOrder::Desc => by_column.reverse(),
    };
    by_column.then(a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    next_trade_id: Arc<AtomicI64>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next transaction commit fail with `DbError::Aborted`, for
    /// exercising rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Every holding row currently committed, in (user, coin) order.
    pub async fn holdings(&self) -> Vec<Holding> {
        self.state.read().await.holdings.values().cloned().collect()
    }

    /// Every trade row currently committed, oldest first.
    pub async fn trades(&self) -> Vec<Trade> {
        self.state.read().await.trades.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DbError> {
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            next_trade_id: Arc::clone(&self.next_trade_id),
            fail_next_commit: Arc::clone(&self.fail_next_commit),
            balances: HashMap::new(),
            holdings: HashMap::new(),
            trades: Vec::new(),
        }))
    }

    async fn portfolio_snapshot(
        &self,
        user_id: i64,
    ) -> Result<Option<PortfolioSnapshot>, DbError> {
        let state = self.state.read().await;
        let Some(user) = state.users.get(&user_id).cloned() else {
            return Ok(None);
        };

        let holdings = state
            .holdings
            .range((user_id, i64::MIN)..=(user_id, i64::MAX))
            .map(|(_, holding)| {
                let coin = state.coins.get(&holding.coin_id).cloned().ok_or_else(|| {
                    DbError::Corrupt(format!(
                        "holding {} references unknown coin {}",
                        holding.id, holding.coin_id
                    ))
                })?;
                Ok(HoldingWithCoin {
                    holding: holding.clone(),
                    coin,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        let total_trades = state.trades.iter().filter(|t| t.user_id == user_id).count() as u64;
        let watchlist_count = state
            .watchlist
            .values()
            .filter(|e| e.user_id == user_id)
            .count() as u64;

        Ok(Some(PortfolioSnapshot {
            user,
            holdings,
            total_trades,
            watchlist_count,
        }))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DbError> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(DbError::Conflict("username or email".to_string()));
        }
        if user.balance.is_sign_negative() {
            return Err(DbError::Aborted(format!(
                "initial balance {} is negative",
                user.balance
            )));
        }

        state.next_user_id += 1;
        let now = Utc::now();
        let created = User {
            id: state.next_user_id,
            username: user.username.clone(),
            email: user.email.clone(),
            balance: user.balance,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DbError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn create_coin(&self, coin: &NewCoin) -> Result<Coin, DbError> {
        let mut state = self.state.write().await;
        if state.coins.values().any(|c| c.symbol == coin.symbol) {
            return Err(DbError::Conflict("symbol".to_string()));
        }

        state.next_coin_id += 1;
        let now = Utc::now();
        let created = Coin {
            id: state.next_coin_id,
            symbol: coin.symbol.clone(),
            name: coin.name.clone(),
            current_price: coin.current_price,
            market_cap: 0,
            volume_24h: 0,
            price_change_24h: Decimal::ZERO,
            price_change_percentage_24h: Decimal::ZERO,
            last_updated: Some(now),
            created_at: now,
        };
        state.coins.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_coin(&self, coin_id: i64) -> Result<Option<Coin>, DbError> {
        Ok(self.state.read().await.coins.get(&coin_id).cloned())
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>, DbError> {
        Ok(self
            .state
            .read()
            .await
            .coins
            .values()
            .find(|c| c.symbol == symbol)
            .cloned())
    }

    async fn list_coins(
        &self,
        page: PageRequest,
        ordering: CoinOrdering,
    ) -> Result<Page<Coin>, DbError> {
        let mut coins: Vec<Coin> = self.state.read().await.coins.values().cloned().collect();
        coins.sort_by(|a, b| compare_coins(a, b, ordering));
        Ok(Page::from_full(coins, page))
    }

    async fn market_summary(&self) -> Result<MarketSummary, DbError> {
        let state = self.state.read().await;
        Ok(MarketSummary {
            total_market_cap: state.coins.values().map(|c| Decimal::from(c.market_cap)).sum(),
            total_volume: state.coins.values().map(|c| Decimal::from(c.volume_24h)).sum(),
            active_coins: state.coins.len() as u64,
        })
    }

    async fn apply_price_updates(&self, updates: &[CoinPriceUpdate]) -> Result<usize, DbError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut updated = 0;

        for update in updates {
            if let Some(coin) = state.coins.values_mut().find(|c| c.symbol == update.symbol) {
                coin.current_price = update.current_price;
                coin.market_cap = update.market_cap;
                coin.volume_24h = update.volume_24h;
                coin.price_change_24h = update.price_change_24h;
                coin.price_change_percentage_24h = update.price_change_percentage_24h;
                coin.last_updated = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_trades(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<TradeWithCoin>, DbError> {
        let state = self.state.read().await;
        let trades = state
            .trades
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .map(|t| state.trade_with_coin(t))
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(Page::from_full(trades, page))
    }

    async fn list_watchlist(&self, user_id: i64) -> Result<Vec<WatchlistItem>, DbError> {
        let state = self.state.read().await;
        state
            .watchlist
            .values()
            .filter(|e| e.user_id == user_id)
            .map(|e| state.watchlist_item(e))
            .collect()
    }

    async fn add_to_watchlist(
        &self,
        user_id: i64,
        coin_id: i64,
    ) -> Result<WatchlistItem, DbError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) || !state.coins.contains_key(&coin_id) {
            return Err(DbError::NotFound);
        }
        if state
            .watchlist
            .values()
            .any(|e| e.user_id == user_id && e.coin_id == coin_id)
        {
            return Err(DbError::Conflict("watched coin".to_string()));
        }

        state.next_watchlist_id += 1;
        let entry = WatchlistEntry {
            id: state.next_watchlist_id,
            user_id,
            coin_id,
            created_at: Utc::now(),
        };
        state.watchlist.insert(entry.id, entry.clone());
        state.watchlist_item(&entry)
    }

    async fn remove_from_watchlist(&self, user_id: i64, entry_id: i64) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        match state.watchlist.get(&entry_id) {
            Some(entry) if entry.user_id == user_id => {
                state.watchlist.remove(&entry_id);
                Ok(())
            }
            _ => Err(DbError::NotFound),
        }
    }
}

/// Staged writes of one transaction. `None` in `holdings` marks a deletion.
struct InMemoryTransaction {
    state: Arc<RwLock<LedgerState>>,
    next_trade_id: Arc<AtomicI64>,
    fail_next_commit: Arc<AtomicBool>,
    balances: HashMap<i64, Decimal>,
    holdings: HashMap<(i64, i64), Option<Position>>,
    trades: Vec<Trade>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_user(&mut self, user_id: i64) -> Result<Option<User>, DbError> {
        let state = self.state.read().await;
        Ok(state.users.get(&user_id).map(|user| {
            let mut user = user.clone();
            if let Some(balance) = self.balances.get(&user_id) {
                user.balance = *balance;
            }
            user
        }))
    }

    async fn get_coin(&mut self, coin_id: i64) -> Result<Option<Coin>, DbError> {
        Ok(self.state.read().await.coins.get(&coin_id).cloned())
    }

    async fn lock_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
    ) -> Result<Option<Holding>, DbError> {
        let state = self.state.read().await;
        let committed = state.holdings.get(&(user_id, coin_id));

        let holding = match self.holdings.get(&(user_id, coin_id)) {
            None => committed.cloned(),
            Some(None) => None,
            Some(Some(position)) => {
                let now = Utc::now();
                Some(Holding {
                    id: committed.map(|h| h.id).unwrap_or_default(),
                    user_id,
                    coin_id,
                    quantity: position.quantity,
                    average_price: position.average_price,
                    created_at: committed.map(|h| h.created_at).unwrap_or(now),
                    updated_at: now,
                })
            }
        };
        Ok(holding)
    }

    async fn update_balance(&mut self, user_id: i64, balance: Decimal) -> Result<(), DbError> {
        if !self.state.read().await.users.contains_key(&user_id) {
            return Err(DbError::NotFound);
        }
        if balance.is_sign_negative() {
            return Err(DbError::Aborted(format!(
                "balance of user {} would become {}",
                user_id, balance
            )));
        }
        self.balances.insert(user_id, balance);
        Ok(())
    }

    async fn upsert_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
        position: &Position,
    ) -> Result<(), DbError> {
        if position.quantity <= Decimal::ZERO {
            return Err(DbError::Aborted(format!(
                "holding of user {} in coin {} would have quantity {}",
                user_id, coin_id, position.quantity
            )));
        }
        self.holdings.insert((user_id, coin_id), Some(*position));
        Ok(())
    }

    async fn delete_holding(&mut self, user_id: i64, coin_id: i64) -> Result<(), DbError> {
        if self.lock_holding(user_id, coin_id).await?.is_none() {
            return Err(DbError::NotFound);
        }
        self.holdings.insert((user_id, coin_id), None);
        Ok(())
    }

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, DbError> {
        let id = self.next_trade_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Trade {
            id,
            user_id: trade.user_id,
            coin_id: trade.coin_id,
            side: trade.side,
            quantity: trade.quantity,
            price: trade.price,
            total_amount: trade.total_amount,
            created_at: Utc::now(),
        };
        self.trades.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(DbError::Aborted("injected commit failure".to_string()));
        }

        let this = *self;
        let mut state = this.state.write().await;
        let now = Utc::now();

        // Validate before touching anything so a failed commit publishes nothing.
        if this.balances.keys().any(|id| !state.users.contains_key(id)) {
            return Err(DbError::NotFound);
        }

        for (user_id, balance) in this.balances {
            if let Some(user) = state.users.get_mut(&user_id) {
                user.balance = balance;
                user.updated_at = now;
            }
        }

        for ((user_id, coin_id), position) in this.holdings {
            match position {
                Some(position) => {
                    if let Some(holding) = state.holdings.get_mut(&(user_id, coin_id)) {
                        holding.quantity = position.quantity;
                        holding.average_price = position.average_price;
                        holding.updated_at = now;
                    } else {
                        state.next_holding_id += 1;
                        let holding = Holding {
                            id: state.next_holding_id,
                            user_id,
                            coin_id,
                            quantity: position.quantity,
                            average_price: position.average_price,
                            created_at: now,
                            updated_at: now,
                        };
                        state.holdings.insert((user_id, coin_id), holding);
                    }
                }
                None => {
                    state.holdings.remove(&(user_id, coin_id));
                }
            }
        }

        state.trades.extend(this.trades);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
