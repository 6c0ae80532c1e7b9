use crate::enums::TradeSide;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered account holding a virtual cash balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Available cash. Never negative in any committed state.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields needed to register a new user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub balance: Decimal,
}

/// A tradable coin together with the latest market data pushed by the price feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Coin {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub current_price: Decimal,
    pub market_cap: i64,
    pub volume_24h: i64,
    pub price_change_24h: Decimal,
    pub price_change_percentage_24h: Decimal,
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCoin {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub current_price: Decimal,
}

/// One entry of a price feed batch. Coins are addressed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPriceUpdate {
    pub symbol: String,
    pub current_price: Decimal,
    #[serde(default)]
    pub market_cap: i64,
    #[serde(default)]
    pub volume_24h: i64,
    #[serde(default)]
    pub price_change_24h: Decimal,
    #[serde(default)]
    pub price_change_percentage_24h: Decimal,
}

impl CoinPriceUpdate {
    /// Prices are accepted as pushed, except that they can never be negative.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                field: "symbol",
                reason: "must not be empty".to_string(),
            });
        }
        if self.current_price.is_sign_negative() {
            return Err(CoreError::InvalidInput {
                field: "current_price",
                reason: format!("{} for {} is negative", self.current_price, self.symbol),
            });
        }
        Ok(())
    }
}

/// The accounting state of a single position: how many units and at what cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: Decimal,
    pub average_price: Decimal,
}

impl Position {
    pub fn new(quantity: Decimal, average_price: Decimal) -> Self {
        Self {
            quantity,
            average_price,
        }
    }

    /// What was paid for the units currently held.
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.average_price
    }
}

/// A persisted position of one user in one coin. Only exists while `quantity > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Holding {
    pub id: i64,
    pub user_id: i64,
    pub coin_id: i64,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    pub fn position(&self) -> Position {
        Position::new(self.quantity, self.average_price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingWithCoin {
    pub holding: Holding,
    pub coin: Coin,
}

/// An executed buy or sell. Append-only: never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    pub coin_id: i64,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A trade that has been priced but not yet written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub user_id: i64,
    pub coin_id: i64,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
}

impl NewTrade {
    /// Builds the record, computing `total_amount = quantity * price`.
    pub fn new(
        user_id: i64,
        coin_id: i64,
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Self, CoreError> {
        let total_amount = quantity.checked_mul(price).ok_or_else(|| {
            CoreError::OutOfRange(format!(
                "total amount of {} x {} is out of range",
                quantity, price
            ))
        })?;
        if total_amount.is_zero() && !quantity.is_zero() && !price.is_zero() {
            return Err(CoreError::OutOfRange(format!(
                "total amount of {} x {} rounds to zero",
                quantity, price
            )));
        }

        Ok(Self {
            user_id,
            coin_id,
            side,
            quantity,
            price,
            total_amount,
        })
    }
}

/// A trade joined with the coin it was executed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeWithCoin {
    #[serde(flatten)]
    pub trade: Trade,
    pub coin: Coin,
}

/// A coin the user follows without holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WatchlistEntry {
    pub id: i64,
    pub user_id: i64,
    pub coin_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    #[serde(flatten)]
    pub entry: WatchlistEntry,
    pub coin: Coin,
}

/// Totals over every listed coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub total_market_cap: Decimal,
    pub total_volume: Decimal,
    pub active_coins: u64,
}
