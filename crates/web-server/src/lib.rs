use analytics::PortfolioValuator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use configuration::{DatabaseSettings, Settings};
use database::{DbRepository, LedgerStore};
use executor::TradeExecutor;
use rust_decimal::Decimal;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod handlers;
pub mod identity;

/// The shared application state that all handlers can access.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub executor: TradeExecutor,
    pub valuator: PortfolioValuator,
    /// Cash credited to every newly registered user.
    pub initial_balance: Decimal,
}

impl AppState {
    /// Wires the executor and valuator onto one shared store.
    pub fn new(store: Arc<dyn LedgerStore>, initial_balance: Decimal) -> Self {
        Self {
            executor: TradeExecutor::new(Arc::clone(&store)),
            valuator: PortfolioValuator::new(Arc::clone(&store)),
            store,
            initial_balance,
        }
    }
}

/// Every API route, without the transport layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/users", post(handlers::register_user))
        .route("/api/user/profile", get(handlers::get_profile))
        .route("/api/user/balance", get(handlers::get_balance))
        .route("/api/user/portfolio", get(handlers::get_portfolio))
        .route("/api/user/holdings", get(handlers::get_holdings))
        .route("/api/user/stats", get(handlers::get_stats))
        .route(
            "/api/trades",
            post(handlers::execute_trade).get(handlers::list_trades),
        )
        .route(
            "/api/coins",
            get(handlers::list_coins).post(handlers::create_coin),
        )
        .route("/api/coins/prices", post(handlers::apply_prices))
        .route("/api/coins/market/data", get(handlers::market_data))
        .route("/api/coins/symbol/:symbol", get(handlers::get_coin_by_symbol))
        .route("/api/coins/:id", get(handlers::get_coin))
        .route(
            "/api/watchlist",
            get(handlers::get_watchlist).post(handlers::add_to_watchlist),
        )
        .route("/api/watchlist/:id", delete(handlers::remove_from_watchlist))
        .with_state(Arc::new(state))
}

/// Connects to PostgreSQL, applies pending migrations and returns the store.
pub async fn postgres_store(settings: &DatabaseSettings) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let pool = database::connect(settings).await?;
    database::run_migrations(&pool).await?;
    let repo = DbRepository::new(pool)
        .with_transaction_timeouts(settings.lock_timeout_ms, settings.statement_timeout_ms);
    Ok(Arc::new(repo))
}

/// The main function to configure and run the web server.
///
/// Serves until Ctrl-C. In-flight requests are allowed to finish, so no trade
/// is cut off between its writes and its commit.
pub async fn run_server(settings: &Settings, store: Arc<dyn LedgerStore>) -> anyhow::Result<()> {
    let addr = settings.server.socket_addr();
    let state = AppState::new(store, settings.trading.initial_balance);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any());

    let app = router(state)
        .layer(cors)
        // This middleware will automatically log information about every incoming request.
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(settings.server.body_limit_bytes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Web server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for the shutdown signal.");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received.");
}
