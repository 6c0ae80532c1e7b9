use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use configuration::{ConfigArgs, Settings, load_config, logging};
use core_types::{CoinPriceUpdate, TradeSide};
use database::{InMemoryLedgerStore, LedgerStore};
use executor::{TradeExecutor, TradeOrder};
use analytics::{PortfolioValuation, PortfolioValuator};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

/// The main entry point for the paper-trading ledger.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if there is one.
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();
    let settings = load_config(&cli.config.config)
        .with_context(|| format!("loading {}", cli.config.config.display()))?;
    let _log_guard = logging::init(&settings.logging)?;

    // Execute the appropriate command
    match cli.command {
        Commands::Serve(args) => handle_serve(args, &settings).await,
        Commands::Migrate => handle_migrate(&settings).await,
        Commands::Trade(args) => handle_trade(args, &settings).await,
        Commands::Portfolio(args) => handle_portfolio(args, &settings).await,
        Commands::Prices(args) => handle_prices(args, &settings).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// A simulated-trading ledger: virtual cash, coin holdings and an append-only trade log.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Apply pending database migrations and exit.
    Migrate,
    /// Execute a single trade for a user.
    Trade(TradeArgs),
    /// Print a user's valued portfolio.
    Portfolio(PortfolioArgs),
    /// Apply a JSON file of price updates to the coin table.
    Prices(PricesArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Keep all state in process memory instead of PostgreSQL. Nothing survives a restart.
    #[arg(long)]
    in_memory: bool,
}

#[derive(Parser)]
struct TradeArgs {
    /// The id of the trading user.
    #[arg(long)]
    user: i64,

    /// The coin symbol (e.g., "BTC").
    #[arg(long)]
    coin: String,

    /// "buy" or "sell".
    #[arg(long)]
    side: TradeSide,

    #[arg(long)]
    quantity: Decimal,

    /// Execution price per unit.
    #[arg(long)]
    price: Decimal,
}

#[derive(Parser)]
struct PortfolioArgs {
    /// The id of the user to value.
    #[arg(long)]
    user: i64,
}

#[derive(Parser)]
struct PricesArgs {
    /// A JSON array of `{ "symbol", "current_price", ... }` objects.
    file: PathBuf,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_serve(args: ServeArgs, settings: &Settings) -> anyhow::Result<()> {
    let store: Arc<dyn LedgerStore> = if args.in_memory {
        tracing::warn!("Serving from the in-memory store. State is lost on exit.");
        Arc::new(InMemoryLedgerStore::new())
    } else {
        web_server::postgres_store(&settings.database).await?
    };
    web_server::run_server(settings, store).await
}

async fn handle_migrate(settings: &Settings) -> anyhow::Result<()> {
    let pool = database::connect(&settings.database).await?;
    database::run_migrations(&pool).await?;
    println!("Migrations are up to date.");
    Ok(())
}

async fn handle_trade(args: TradeArgs, settings: &Settings) -> anyhow::Result<()> {
    let store = web_server::postgres_store(&settings.database).await?;
    let symbol = args.coin.to_uppercase();
    let coin = store
        .get_coin_by_symbol(&symbol)
        .await?
        .with_context(|| format!("no coin with symbol {symbol}"))?;

    let executor = TradeExecutor::new(store);
    let executed = executor
        .execute(TradeOrder {
            user_id: args.user,
            coin_id: coin.id,
            side: args.side,
            quantity: args.quantity,
            price: args.price,
        })
        .await?;

    println!(
        "Trade #{}: {} {} {} @ {} = {}",
        executed.trade.id,
        executed.trade.side,
        executed.trade.quantity,
        executed.coin.symbol,
        executed.trade.price,
        executed.trade.total_amount
    );
    Ok(())
}

async fn handle_portfolio(args: PortfolioArgs, settings: &Settings) -> anyhow::Result<()> {
    let store = web_server::postgres_store(&settings.database).await?;
    let valuation = PortfolioValuator::new(store).valuate(args.user).await?;
    println!("{}", render_portfolio(&valuation));
    Ok(())
}

async fn handle_prices(args: PricesArgs, settings: &Settings) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let updates: Vec<CoinPriceUpdate> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.file.display()))?;
    for update in &updates {
        update.validate()?;
    }

    let store = web_server::postgres_store(&settings.database).await?;
    let updated = store.apply_price_updates(&updates).await?;
    println!(
        "Updated {} coin(s); {} symbol(s) matched no coin.",
        updated,
        updates.len().saturating_sub(updated)
    );
    Ok(())
}

/// Renders holdings plus the cash and total lines as a terminal table.
fn render_portfolio(valuation: &PortfolioValuation) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Coin",
        "Quantity",
        "Avg Price",
        "Price",
        "Market Value",
        "Unrealized P&L",
    ]);

    for view in &valuation.holdings {
        table.add_row(vec![
            Cell::new(&view.coin.symbol),
            Cell::new(view.holding.quantity),
            Cell::new(view.holding.average_price),
            Cell::new(view.coin.current_price),
            Cell::new(view.market_value),
            Cell::new(
                view.unrealized_pnl
                    .map_or_else(|| "-".to_string(), |pnl| pnl.to_string()),
            ),
        ]);
    }

    table.add_row(vec![
        Cell::new("Cash"),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
        Cell::new(valuation.balance),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Total"),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
        Cell::new(valuation.total_value),
        Cell::new(""),
    ]);
    table
}
