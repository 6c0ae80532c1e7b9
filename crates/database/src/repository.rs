use crate::DbError;
use crate::store::{LedgerStore, LedgerTransaction, PortfolioSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    Coin, CoinOrdering, CoinPriceUpdate, CoinSort, Holding, HoldingWithCoin, MarketSummary,
    NewCoin, NewTrade, NewUser, Page, PageRequest, Position, SortOrder, Trade, TradeSide,
    TradeWithCoin, User, WatchlistEntry, WatchlistItem,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{FromRow, Row, Transaction};

const USER_COLUMNS: &str = "id, username, email, balance, created_at, updated_at";
const COIN_COLUMNS: &str = "id, symbol, name, current_price, market_cap, volume_24h, \
     price_change_24h, price_change_percentage_24h, last_updated, created_at";
const HOLDING_COLUMNS: &str =
    "id, user_id, coin_id, quantity, average_price, created_at, updated_at";
const TRADE_COLUMNS: &str =
    "id, user_id, coin_id, side, quantity, price, total_amount, created_at";

/// Columns of a joined `coins c` row, aliased so they cannot collide with the
/// columns of the table they are joined to.
const JOINED_COIN_COLUMNS: &str = "c.id AS c_id, c.symbol AS c_symbol, c.name AS c_name, \
     c.current_price AS c_current_price, c.market_cap AS c_market_cap, \
     c.volume_24h AS c_volume_24h, c.price_change_24h AS c_price_change_24h, \
     c.price_change_percentage_24h AS c_price_change_percentage_24h, \
     c.last_updated AS c_last_updated, c.created_at AS c_created_at";

/// The `DbRepository` is the PostgreSQL implementation of the ledger store.
/// It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

/// Database-specific trade struct that matches the trades table schema.
/// `side` is stored as text and validated on the way out.
#[derive(Debug, Clone, FromRow)]
struct DbTrade {
    id: i64,
    user_id: i64,
    coin_id: i64,
    side: String,
    quantity: Decimal,
    price: Decimal,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbTrade> for Trade {
    type Error = DbError;

    fn try_from(row: DbTrade) -> Result<Self, Self::Error> {
        let side: TradeSide = row
            .side
            .parse()
            .map_err(|e| DbError::Corrupt(format!("trade {}: {}", row.id, e)))?;
        Ok(Trade {
            id: row.id,
            user_id: row.user_id,
            coin_id: row.coin_id,
            side,
            quantity: row.quantity,
            price: row.price,
            total_amount: row.total_amount,
            created_at: row.created_at,
        })
    }
}

fn joined_coin(row: &PgRow) -> Result<Coin, sqlx::Error> {
    Ok(Coin {
        id: row.try_get("c_id")?,
        symbol: row.try_get("c_symbol")?,
        name: row.try_get("c_name")?,
        current_price: row.try_get("c_current_price")?,
        market_cap: row.try_get("c_market_cap")?,
        volume_24h: row.try_get("c_volume_24h")?,
        price_change_24h: row.try_get("c_price_change_24h")?,
        price_change_percentage_24h: row.try_get("c_price_change_percentage_24h")?,
        last_updated: row.try_get("c_last_updated")?,
        created_at: row.try_get("c_created_at")?,
    })
}

/// The `ORDER BY` clause for a coin listing. Only these fixed fragments ever
/// reach the query text.
fn coin_order_clause(ordering: CoinOrdering) -> &'static str {
    match (ordering.sort, ordering.order) {
        (CoinSort::MarketCap, SortOrder::Asc) => "market_cap ASC, id ASC",
        (CoinSort::MarketCap, SortOrder::Desc) => "market_cap DESC, id ASC",
        (CoinSort::CurrentPrice, SortOrder::Asc) => "current_price ASC, id ASC",
        (CoinSort::CurrentPrice, SortOrder::Desc) => "current_price DESC, id ASC",
        (CoinSort::Volume24h, SortOrder::Asc) => "volume_24h ASC, id ASC",
        (CoinSort::Volume24h, SortOrder::Desc) => "volume_24h DESC, id ASC",
        (CoinSort::Symbol, SortOrder::Asc) => "symbol ASC, id ASC",
        (CoinSort::Symbol, SortOrder::Desc) => "symbol DESC, id ASC",
    }
}

fn watchlist_item(row: &PgRow) -> Result<WatchlistItem, sqlx::Error> {
    Ok(WatchlistItem {
        entry: WatchlistEntry::from_row(row)?,
        coin: joined_coin(row)?,
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: 5_000,
            statement_timeout_ms: 10_000,
        }
    }

    /// Bounds how long a trade transaction may wait on a row lock or run a
    /// single statement before PostgreSQL aborts it.
    pub fn with_transaction_timeouts(
        mut self,
        lock_timeout_ms: u64,
        statement_timeout_ms: u64,
    ) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self.statement_timeout_ms = statement_timeout_ms;
        self
    }
}

#[async_trait]
impl LedgerStore for DbRepository {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DbError> {
        let mut tx = self.pool.begin().await?;

        // `SET LOCAL` does not take bind parameters; both values are integers.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn portfolio_snapshot(
        &self,
        user_id: i64,
    ) -> Result<Option<PortfolioSnapshot>, DbError> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            tx.rollback().await?;
            return Ok(None);
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT h.id, h.user_id, h.coin_id, h.quantity, h.average_price, h.created_at, h.updated_at,
                   {JOINED_COIN_COLUMNS}
            FROM holdings AS h
            JOIN coins AS c ON c.id = h.coin_id
            WHERE h.user_id = $1 AND h.quantity > 0
            ORDER BY h.quantity * c.current_price DESC, h.id ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let holdings = rows
            .iter()
            .map(|row| {
                Ok(HoldingWithCoin {
                    holding: Holding::from_row(row)?,
                    coin: joined_coin(row)?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let total_trades: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        let watchlist_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM watchlists WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Some(PortfolioSnapshot {
            user,
            holdings,
            total_trades: u64::try_from(total_trades).unwrap_or_default(),
            watchlist_count: u64::try_from(watchlist_count).unwrap_or_default(),
        }))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DbError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, balance, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "username or email"))?;

        tracing::debug!(user_id = created.id, "Registered user.");
        Ok(created)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_coin(&self, coin: &NewCoin) -> Result<Coin, DbError> {
        let created = sqlx::query_as::<_, Coin>(&format!(
            r#"
            INSERT INTO coins (symbol, name, current_price, last_updated, created_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {COIN_COLUMNS}
            "#
        ))
        .bind(&coin.symbol)
        .bind(&coin.name)
        .bind(coin.current_price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "symbol"))?;
        Ok(created)
    }

    async fn get_coin(&self, coin_id: i64) -> Result<Option<Coin>, DbError> {
        let coin = sqlx::query_as::<_, Coin>(&format!(
            "SELECT {COIN_COLUMNS} FROM coins WHERE id = $1"
        ))
        .bind(coin_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coin)
    }

    async fn get_coin_by_symbol(&self, symbol: &str) -> Result<Option<Coin>, DbError> {
        let coin = sqlx::query_as::<_, Coin>(&format!(
            "SELECT {COIN_COLUMNS} FROM coins WHERE symbol = $1"
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coin)
    }

    async fn list_coins(
        &self,
        page: PageRequest,
        ordering: CoinOrdering,
    ) -> Result<Page<Coin>, DbError> {
        let page = page.normalized();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coins")
            .fetch_one(&self.pool)
            .await?;

        let coins = sqlx::query_as::<_, Coin>(&format!(
            "SELECT {COIN_COLUMNS} FROM coins ORDER BY {} LIMIT $1 OFFSET $2",
            coin_order_clause(ordering)
        ))
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(coins, page, u64::try_from(total).unwrap_or_default()))
    }

    async fn market_summary(&self) -> Result<MarketSummary, DbError> {
        let (total_market_cap, total_volume, active_coins): (Decimal, Decimal, i64) =
            sqlx::query_as(
                r#"
                SELECT COALESCE(SUM(market_cap), 0), COALESCE(SUM(volume_24h), 0), COUNT(*)
                FROM coins
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(MarketSummary {
            total_market_cap,
            total_volume,
            active_coins: u64::try_from(active_coins).unwrap_or_default(),
        })
    }

    async fn apply_price_updates(&self, updates: &[CoinPriceUpdate]) -> Result<usize, DbError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;

        for update in updates {
            updated += sqlx::query(
                r#"
                UPDATE coins
                SET current_price = $1, market_cap = $2, volume_24h = $3,
                    price_change_24h = $4, price_change_percentage_24h = $5, last_updated = NOW()
                WHERE symbol = $6
                "#,
            )
            .bind(update.current_price)
            .bind(update.market_cap)
            .bind(update.volume_24h)
            .bind(update.price_change_24h)
            .bind(update.price_change_percentage_24h)
            .bind(&update.symbol)
            .execute(&mut *tx) // Note: must use the transaction object `tx` here
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(usize::try_from(updated).unwrap_or(usize::MAX))
    }

    async fn list_trades(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<TradeWithCoin>, DbError> {
        let page = page.normalized();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trades WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT t.id, t.user_id, t.coin_id, t.side, t.quantity, t.price, t.total_amount, t.created_at,
                   {JOINED_COIN_COLUMNS}
            FROM trades AS t
            JOIN coins AS c ON c.id = t.coin_id
            WHERE t.user_id = $1
            ORDER BY t.created_at DESC, t.id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(i64::from(page.limit))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await?;

        let trades = rows
            .iter()
            .map(|row| {
                let trade = Trade::try_from(DbTrade::from_row(row)?)?;
                Ok(TradeWithCoin {
                    trade,
                    coin: joined_coin(row)?,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(Page::new(trades, page, u64::try_from(total).unwrap_or_default()))
    }

    async fn list_watchlist(&self, user_id: i64) -> Result<Vec<WatchlistItem>, DbError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT w.id, w.user_id, w.coin_id, w.created_at, {JOINED_COIN_COLUMNS}
            FROM watchlists AS w
            JOIN coins AS c ON c.id = w.coin_id
            WHERE w.user_id = $1
            ORDER BY w.id ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(watchlist_item)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(items)
    }

    async fn add_to_watchlist(
        &self,
        user_id: i64,
        coin_id: i64,
    ) -> Result<WatchlistItem, DbError> {
        // Selecting from both parents turns an unknown user or coin into zero rows.
        let row = sqlx::query(&format!(
            r#"
            WITH inserted AS (
                INSERT INTO watchlists (user_id, coin_id, created_at)
                SELECT u.id, c.id, NOW()
                FROM users AS u, coins AS c
                WHERE u.id = $1 AND c.id = $2
                RETURNING id, user_id, coin_id, created_at
            )
            SELECT w.id, w.user_id, w.coin_id, w.created_at, {JOINED_COIN_COLUMNS}
            FROM inserted AS w
            JOIN coins AS c ON c.id = w.coin_id
            "#
        ))
        .bind(user_id)
        .bind(coin_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, "watched coin"))?;

        let row = row.ok_or(DbError::NotFound)?;
        Ok(watchlist_item(&row)?)
    }

    async fn remove_from_watchlist(&self, user_id: i64, entry_id: i64) -> Result<(), DbError> {
        let rows_affected = sqlx::query("DELETE FROM watchlists WHERE id = $1 AND user_id = $2")
            .bind(entry_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

/// A trade transaction on a pooled connection. Dropping it without calling
/// `commit` rolls it back.
struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_user(&mut self, user_id: i64) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn get_coin(&mut self, coin_id: i64) -> Result<Option<Coin>, DbError> {
        let coin = sqlx::query_as::<_, Coin>(&format!(
            "SELECT {COIN_COLUMNS} FROM coins WHERE id = $1"
        ))
        .bind(coin_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(coin)
    }

    async fn lock_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
    ) -> Result<Option<Holding>, DbError> {
        let holding = sqlx::query_as::<_, Holding>(&format!(
            "SELECT {HOLDING_COLUMNS} FROM holdings WHERE user_id = $1 AND coin_id = $2 FOR UPDATE"
        ))
        .bind(user_id)
        .bind(coin_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(holding)
    }

    async fn update_balance(&mut self, user_id: i64, balance: Decimal) -> Result<(), DbError> {
        let rows_affected =
            sqlx::query("UPDATE users SET balance = $1, updated_at = NOW() WHERE id = $2")
                .bind(balance)
                .bind(user_id)
                .execute(&mut *self.tx)
                .await?
                .rows_affected();

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn upsert_holding(
        &mut self,
        user_id: i64,
        coin_id: i64,
        position: &Position,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO holdings (user_id, coin_id, quantity, average_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, coin_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                average_price = EXCLUDED.average_price,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(coin_id)
        .bind(position.quantity)
        .bind(position.average_price)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_holding(&mut self, user_id: i64, coin_id: i64) -> Result<(), DbError> {
        let rows_affected = sqlx::query("DELETE FROM holdings WHERE user_id = $1 AND coin_id = $2")
            .bind(user_id)
            .bind(coin_id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, DbError> {
        let row = sqlx::query_as::<_, DbTrade>(&format!(
            r#"
            INSERT INTO trades (user_id, coin_id, side, quantity, price, total_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {TRADE_COLUMNS}
            "#
        ))
        .bind(trade.user_id)
        .bind(trade.coin_id)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.total_amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Trade::try_from(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
