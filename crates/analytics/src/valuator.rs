use crate::error::ValuationError;
use crate::report::{HoldingView, HoldingsPage, PortfolioStats, PortfolioValuation};
use core_types::{HoldingWithCoin, Page, PageRequest};
use database::{LedgerStore, PortfolioSnapshot};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Values accounts at current coin prices.
///
/// Read-only: it never joins the trade executor's per-user queue. Consistency
/// comes from the store, which serves each call from a single snapshot.
#[derive(Clone)]
pub struct PortfolioValuator {
    store: Arc<dyn LedgerStore>,
}

impl PortfolioValuator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Cash, positions and their combined value for one user.
    pub async fn valuate(&self, user_id: i64) -> Result<PortfolioValuation, ValuationError> {
        let snapshot = self.snapshot(user_id).await?;
        let valuation = value_snapshot(&snapshot);

        tracing::debug!(
            user_id,
            holdings = valuation.holdings.len(),
            portfolio_value = %valuation.portfolio_value,
            total_value = %valuation.total_value,
            "Portfolio valued."
        );
        Ok(valuation)
    }

    /// One page of the user's valued holdings. `portfolio_value` covers all of them.
    pub async fn holdings(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<HoldingsPage, ValuationError> {
        let valuation = self.valuate(user_id).await?;
        Ok(HoldingsPage {
            page: Page::from_full(valuation.holdings, page),
            portfolio_value: valuation.portfolio_value,
        })
    }

    pub async fn stats(&self, user_id: i64) -> Result<PortfolioStats, ValuationError> {
        let snapshot = self.snapshot(user_id).await?;
        let valuation = value_snapshot(&snapshot);

        Ok(PortfolioStats {
            balance: valuation.balance,
            portfolio_value: valuation.portfolio_value,
            total_value: valuation.total_value,
            total_trades: snapshot.total_trades,
            total_holdings: valuation.holdings.len(),
            watchlist_count: snapshot.watchlist_count,
        })
    }

    async fn snapshot(&self, user_id: i64) -> Result<PortfolioSnapshot, ValuationError> {
        self.store
            .portfolio_snapshot(user_id)
            .await?
            .ok_or(ValuationError::UserNotFound(user_id))
    }
}

/// Values a snapshot without any I/O.
///
/// Holdings of unpriced coins (`current_price <= 0`) are listed with a market
/// value of zero and no unrealized P&L.
pub fn value_snapshot(snapshot: &PortfolioSnapshot) -> PortfolioValuation {
    let mut valuation = PortfolioValuation::cash_only(snapshot.user.balance);

    valuation.holdings = snapshot
        .holdings
        .iter()
        .filter(|entry| entry.holding.quantity > Decimal::ZERO)
        .map(view)
        .collect();
    valuation
        .holdings
        .sort_by(|a, b| b.market_value.cmp(&a.market_value).then(a.coin.symbol.cmp(&b.coin.symbol)));

    valuation.portfolio_value = valuation.holdings.iter().map(|h| h.market_value).sum();
    valuation.total_value = valuation.balance + valuation.portfolio_value;
    valuation
}

fn view(entry: &HoldingWithCoin) -> HoldingView {
    let HoldingWithCoin { holding, coin } = entry;
    let cost_basis = holding.position().cost_basis();

    let (market_value, unrealized_pnl) = if coin.current_price > Decimal::ZERO {
        let market_value = holding.quantity * coin.current_price;
        (market_value, Some(market_value - cost_basis))
    } else {
        (Decimal::ZERO, None)
    };

    HoldingView {
        holding: holding.clone(),
        coin: coin.clone(),
        market_value,
        cost_basis,
        unrealized_pnl,
    }
}
