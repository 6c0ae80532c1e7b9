use chrono::{DateTime, Utc};
use core_types::{Coin, Holding, Page};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One holding valued at its coin's current price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingView {
    pub holding: Holding,
    pub coin: Coin,
    /// `quantity * current_price`, or zero while the coin has no price.
    pub market_value: Decimal,
    /// `quantity * average_price`.
    pub cost_basis: Decimal,
    pub unrealized_pnl: Option<Decimal>, // None while the coin is unpriced
}

/// The full valuation of an account at one instant.
///
/// This struct is the output of `PortfolioValuator::valuate` and the body of
/// the portfolio endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValuation {
    /// Ordered by market value, highest first.
    pub holdings: Vec<HoldingView>,
    pub portfolio_value: Decimal,
    pub balance: Decimal,
    pub total_value: Decimal,
    pub valued_at: DateTime<Utc>,
}

impl PortfolioValuation {
    /// A valuation with no positions: all value is cash.
    pub fn cash_only(balance: Decimal) -> Self {
        Self {
            holdings: Vec::new(),
            portfolio_value: Decimal::ZERO,
            balance,
            total_value: balance,
            valued_at: Utc::now(),
        }
    }
}

/// One page of valued holdings, plus the value of all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsPage {
    #[serde(flatten)]
    pub page: Page<HoldingView>,
    pub portfolio_value: Decimal,
}

/// Account-level totals for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub balance: Decimal,
    pub portfolio_value: Decimal,
    pub total_value: Decimal,
    pub total_trades: u64,
    pub total_holdings: usize,
    pub watchlist_count: u64,
}
