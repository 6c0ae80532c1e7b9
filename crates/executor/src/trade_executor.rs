use crate::accountant::{self, exact_add, exact_sub};
use crate::error::TradeError;
use crate::locks::UserLocks;
use core_types::{Coin, NewTrade, Trade, TradeSide, TradeWithCoin};
use database::{LedgerStore, LedgerTransaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A request to buy or sell `quantity` units of a coin at `price` per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub user_id: i64,
    pub coin_id: i64,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Decimal places a `Decimal` can carry; products needing more are rounded.
const MAX_TOTAL_SCALE: u32 = 28;

impl TradeOrder {
    pub fn validate(&self) -> Result<(), TradeError> {
        if self.quantity <= Decimal::ZERO {
            return Err(TradeError::InvalidOrder(format!(
                "quantity must be greater than zero, got {}",
                self.quantity
            )));
        }
        if self.price <= Decimal::ZERO {
            return Err(TradeError::InvalidOrder(format!(
                "price must be greater than zero, got {}",
                self.price
            )));
        }
        // Beyond 28 decimal places `quantity * price` is rounded, down to zero for dust.
        if self.quantity.scale() + self.price.scale() > MAX_TOTAL_SCALE {
            return Err(TradeError::InvalidOrder(format!(
                "{} at {} needs more than {} decimal places",
                self.quantity, self.price, MAX_TOTAL_SCALE
            )));
        }
        Ok(())
    }
}

/// Executes trades against the ledger, one atomic transaction per order.
///
/// Orders of the same user are serialized through [`UserLocks`] for the whole
/// read-modify-write, so balances and holdings are never computed from a
/// value another trade is about to overwrite. Orders of different users run
/// concurrently.
#[derive(Clone)]
pub struct TradeExecutor {
    store: Arc<dyn LedgerStore>,
    locks: UserLocks,
}

impl TradeExecutor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: UserLocks::new(),
        }
    }

    /// Executes one order and returns the recorded trade with its coin.
    ///
    /// Either every write of the trade is committed or none is. Validation,
    /// not-found and insufficient-funds failures are detected before any write;
    /// a storage failure anywhere, commit included, yields
    /// [`TradeError::ExecutionFailed`] and leaves the ledger untouched.
    pub async fn execute(&self, order: TradeOrder) -> Result<TradeWithCoin, TradeError> {
        order.validate()?;

        let _scope = self.locks.acquire(order.user_id).await;
        let mut tx = self.store.begin().await.map_err(|e| {
            tracing::error!(error = %e, user_id = order.user_id, "Failed to open trade transaction.");
            TradeError::from(e)
        })?;

        let applied = Self::apply(tx.as_mut(), &order).await;
        let (trade, coin) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback after failed trade reported an error.");
                }
                log_rejection(&order, &err);
                return Err(err);
            }
        };

        if let Err(e) = tx.commit().await {
            tracing::error!(
                error = %e,
                user_id = order.user_id,
                coin_id = order.coin_id,
                "Trade commit failed; nothing was applied."
            );
            return Err(e.into());
        }

        tracing::info!(
            trade_id = trade.id,
            user_id = trade.user_id,
            coin = %coin.symbol,
            side = %trade.side,
            quantity = %trade.quantity,
            price = %trade.price,
            total_amount = %trade.total_amount,
            "Trade executed."
        );

        Ok(TradeWithCoin { trade, coin })
    }

    /// Steps 3 through 9 of a trade: every read and write, none of them visible yet.
    async fn apply(
        tx: &mut dyn LedgerTransaction,
        order: &TradeOrder,
    ) -> Result<(Trade, Coin), TradeError> {
        let user = tx
            .lock_user(order.user_id)
            .await?
            .ok_or(TradeError::UserNotFound(order.user_id))?;
        let coin = tx
            .get_coin(order.coin_id)
            .await?
            .ok_or(TradeError::CoinNotFound(order.coin_id))?;
        let holding = tx.lock_holding(order.user_id, order.coin_id).await?;

        let new_trade = NewTrade::new(
            order.user_id,
            order.coin_id,
            order.side,
            order.quantity,
            order.price,
        )?;
        let total_amount = new_trade.total_amount;
        if total_amount <= Decimal::ZERO {
            return Err(TradeError::InvalidOrder(format!(
                "total amount of {} x {} is {}",
                order.quantity, order.price, total_amount
            )));
        }

        let balance = match order.side {
            TradeSide::Buy => {
                if user.balance < total_amount {
                    return Err(TradeError::InsufficientBalance {
                        required: total_amount,
                        available: user.balance,
                    });
                }
                exact_sub(user.balance, total_amount)
            }
            TradeSide::Sell => exact_add(user.balance, total_amount),
        }
        .ok_or_else(|| {
            TradeError::InvalidOrder(format!(
                "settling {} against balance {} cannot be represented exactly",
                total_amount, user.balance
            ))
        })?;

        let position = accountant::apply(
            holding.as_ref().map(|h| h.position()),
            order.side,
            order.quantity,
            order.price,
        )?;

        tracing::debug!(
            user_id = order.user_id,
            coin_id = order.coin_id,
            old_balance = %user.balance,
            new_balance = %balance,
            position = ?position,
            "Applying trade."
        );

        tx.update_balance(order.user_id, balance).await?;
        match position {
            Some(position) => {
                tx.upsert_holding(order.user_id, order.coin_id, &position)
                    .await?
            }
            None => tx.delete_holding(order.user_id, order.coin_id).await?,
        }
        let trade = tx.insert_trade(&new_trade).await?;

        Ok((trade, coin))
    }
}

fn log_rejection(order: &TradeOrder, err: &TradeError) {
    if err.is_retryable() {
        tracing::error!(error = %err, user_id = order.user_id, coin_id = order.coin_id, "Trade failed.");
    } else {
        tracing::warn!(error = %err, user_id = order.user_id, coin_id = order.coin_id, "Trade rejected.");
    }
}
