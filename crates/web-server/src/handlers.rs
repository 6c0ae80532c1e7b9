use crate::{AppState, error::AppError, identity::CurrentUser};
use analytics::{HoldingsPage, PortfolioStats, PortfolioValuation};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use core_types::{
    Coin, CoinOrdering, CoinPriceUpdate, MarketSummary, NewCoin, NewUser, Page, PageRequest,
    TradeSide, TradeWithCoin, User, WatchlistItem,
};
use executor::{TradeError, TradeOrder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
}

/// # POST /api/users
/// Registers a user with the configured starting balance.
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let request = body(payload)?;
    let username = request.username.trim();
    let email = request.email.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username must not be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest(format!("{email:?} is not an email address")));
    }

    let user = state
        .store
        .create_user(&NewUser {
            username: username.to_string(),
            email: email.to_string(),
            balance: state.initial_balance,
        })
        .await?;

    tracing::info!(user_id = user.id, username = %user.username, "User registered.");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn existing_user(state: &AppState, user_id: i64) -> Result<User, AppError> {
    state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
}

/// # GET /api/user/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<User>, AppError> {
    Ok(Json(existing_user(&state, user_id).await?))
}

/// # GET /api/user/balance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Value>, AppError> {
    let user = existing_user(&state, user_id).await?;
    Ok(Json(json!({ "balance": user.balance })))
}

/// # GET /api/user/portfolio
pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<PortfolioValuation>, AppError> {
    Ok(Json(state.valuator.valuate(user_id).await?))
}

/// # GET /api/user/holdings
pub async fn get_holdings(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(page): Query<PageRequest>,
) -> Result<Json<HoldingsPage>, AppError> {
    Ok(Json(state.valuator.holdings(user_id, page).await?))
}

/// # GET /api/user/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<PortfolioStats>, AppError> {
    Ok(Json(state.valuator.stats(user_id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TradeRequest {
    pub coin_id: i64,
    /// `"buy"` or `"sell"`, parsed after the body so a bad side is an invalid order.
    pub side: String,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// # POST /api/trades
/// Executes a trade for the caller at the price given in the request.
pub async fn execute_trade(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<TradeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TradeWithCoin>), AppError> {
    let request = body(payload)?;
    let side: TradeSide = request.side.parse().map_err(TradeError::from)?;
    let order = TradeOrder {
        user_id,
        coin_id: request.coin_id,
        side,
        quantity: request.quantity,
        price: request.price,
    };

    let executed = state.executor.execute(order).await?;
    Ok((StatusCode::CREATED, Json(executed)))
}

/// # GET /api/trades
/// The caller's trade history, newest first.
pub async fn list_trades(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<TradeWithCoin>>, AppError> {
    let trades = state.store.list_trades(user_id, page.normalized()).await?;
    Ok(Json(trades))
}

/// # GET /api/coins
/// `sort` is one of `market_cap`, `current_price`, `volume_24h` or `symbol`;
/// `order` is `asc` or `desc`. Defaults to market cap, descending.
pub async fn list_coins(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageRequest>,
    ordering: Result<Query<CoinOrdering>, QueryRejection>,
) -> Result<Json<Page<Coin>>, AppError> {
    let Query(ordering) = ordering.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.store.list_coins(page.normalized(), ordering).await?))
}

/// # GET /api/coins/market/data
pub async fn market_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MarketSummary>, AppError> {
    Ok(Json(state.store.market_summary().await?))
}

/// # GET /api/coins/:id
pub async fn get_coin(
    State(state): State<Arc<AppState>>,
    Path(coin_id): Path<i64>,
) -> Result<Json<Coin>, AppError> {
    let coin = state
        .store
        .get_coin(coin_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("coin {coin_id}")))?;
    Ok(Json(coin))
}

/// # GET /api/coins/symbol/:symbol
pub async fn get_coin_by_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Coin>, AppError> {
    let symbol = symbol.to_uppercase();
    let coin = state
        .store
        .get_coin_by_symbol(&symbol)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("coin {symbol}")))?;
    Ok(Json(coin))
}

/// # POST /api/coins
/// Lists a new tradable coin. Symbols are stored upper-case.
pub async fn create_coin(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewCoin>, JsonRejection>,
) -> Result<(StatusCode, Json<Coin>), AppError> {
    let mut coin = body(payload)?;
    coin.symbol = coin.symbol.trim().to_uppercase();
    if coin.symbol.is_empty() || coin.name.trim().is_empty() {
        return Err(AppError::BadRequest("symbol and name are required".to_string()));
    }
    if coin.current_price.is_sign_negative() {
        return Err(AppError::BadRequest(format!(
            "current_price {} is negative",
            coin.current_price
        )));
    }

    let created = state.store.create_coin(&coin).await?;
    tracing::info!(coin_id = created.id, symbol = %created.symbol, "Coin listed.");
    Ok((StatusCode::CREATED, Json(created)))
}

/// # POST /api/coins/prices
/// Price-feed ingestion. The whole batch is rejected if any entry is invalid.
pub async fn apply_prices(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<CoinPriceUpdate>>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let mut updates = body(payload)?;
    for update in &mut updates {
        update.symbol = update.symbol.trim().to_uppercase();
        update.validate()?;
    }

    let updated = state.store.apply_price_updates(&updates).await?;
    let skipped = updates.len().saturating_sub(updated);
    tracing::info!(updated, skipped, "Price updates applied.");
    Ok(Json(json!({ "updated": updated, "skipped": skipped })))
}

/// # GET /api/watchlist
pub async fn get_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<WatchlistItem>>, AppError> {
    existing_user(&state, user_id).await?;
    Ok(Json(state.store.list_watchlist(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub coin_id: i64,
}

/// # POST /api/watchlist
pub async fn add_to_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    payload: Result<Json<WatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WatchlistItem>), AppError> {
    let request = body(payload)?;
    existing_user(&state, user_id).await?;
    if state.store.get_coin(request.coin_id).await?.is_none() {
        return Err(AppError::NotFound(format!("coin {}", request.coin_id)));
    }

    let item = state.store.add_to_watchlist(user_id, request.coin_id).await?;
    tracing::info!(user_id, coin = %item.coin.symbol, "Coin added to watchlist.");
    Ok((StatusCode::CREATED, Json(item)))
}

/// # DELETE /api/watchlist/:id
/// Entries of other users are reported as not found.
pub async fn remove_from_watchlist(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(entry_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.store.remove_from_watchlist(user_id, entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
