//! The same guarantees as `trade_execution.rs`, checked on PostgreSQL where
//! they rest on `FOR UPDATE` row locks and `REPEATABLE READ` snapshots.
//!
//! Each test gets a fresh database from the server in `DATABASE_URL`:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/paper_ledger cargo test -p executor --test postgres_ledger -- --ignored
//! ```

use core_types::{
    Coin, CoinOrdering, CoinPriceUpdate, CoinSort, NewCoin, NewUser, SortOrder, TradeSide, User,
};
use database::{DbError, DbRepository, LedgerStore};
use executor::{TradeError, TradeExecutor, TradeOrder};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use std::sync::Arc;

async fn seed(store: &DbRepository) -> (User, Coin) {
    let user = store
        .create_user(&NewUser {
            username: "trader".to_string(),
            email: "trader@example.com".to_string(),
            balance: dec!(10000.00),
        })
        .await
        .unwrap();
    let coin = store
        .create_coin(&NewCoin {
            symbol: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            current_price: dec!(100),
        })
        .await
        .unwrap();
    (user, coin)
}

fn buy(user: &User, coin: &Coin, quantity: Decimal, price: Decimal) -> TradeOrder {
    TradeOrder {
        user_id: user.id,
        coin_id: coin.id,
        side: TradeSide::Buy,
        quantity,
        price,
    }
}

#[sqlx::test(migrator = "database::MIGRATOR")]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn a_locked_user_row_blocks_other_writers(pool: PgPool) {
    let store = DbRepository::new(pool).with_transaction_timeouts(200, 5_000);
    let (user, _) = seed(&store).await;

    let mut first = store.begin().await.unwrap();
    assert!(first.lock_user(user.id).await.unwrap().is_some());

    // The second transaction gives up after lock_timeout instead of reading a stale balance.
    let mut second = store.begin().await.unwrap();
    let err = second.lock_user(user.id).await.unwrap_err();
    assert!(matches!(err, DbError::Query(_)), "{err}");
    second.rollback().await.unwrap();

    first.update_balance(user.id, dec!(1)).await.unwrap();
    first.commit().await.unwrap();

    let mut third = store.begin().await.unwrap();
    let locked = third.lock_user(user.id).await.unwrap().unwrap();
    assert_eq!(locked.balance, dec!(1));
    third.rollback().await.unwrap();
}

#[sqlx::test(migrator = "database::MIGRATOR")]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn separate_executors_sharing_a_database_never_overspend(pool: PgPool) {
    let store = Arc::new(DbRepository::new(pool));
    let (user, coin) = seed(&store).await;

    // Two executors have independent in-process locks, like two service instances.
    let executors = [TradeExecutor::new(store.clone()), TradeExecutor::new(store.clone())];
    let results = join_all((0..10).map(|i| {
        let executor = executors[i % 2].clone();
        let order = buy(&user, &coin, dec!(30), dec!(100));
        async move { executor.execute(order).await }
    }))
    .await;

    let executed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(executed, 3);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(err, TradeError::InsufficientBalance { .. }), "{err}");
        }
    }

    let snapshot = store.portfolio_snapshot(user.id).await.unwrap().unwrap();
    assert_eq!(snapshot.user.balance, dec!(1000.00));
    assert_eq!(snapshot.holdings.len(), 1);
    assert_eq!(snapshot.holdings[0].holding.quantity, dec!(90));
    assert_eq!(snapshot.holdings[0].holding.average_price, dec!(100));
    assert_eq!(snapshot.total_trades, 3);
}

#[sqlx::test(migrator = "database::MIGRATOR")]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn full_sell_deletes_the_holding_row(pool: PgPool) {
    let store = Arc::new(DbRepository::new(pool));
    let (user, coin) = seed(&store).await;
    let executor = TradeExecutor::new(store.clone());

    executor.execute(buy(&user, &coin, dec!(2), dec!(100))).await.unwrap();
    executor
        .execute(TradeOrder {
            side: TradeSide::Sell,
            ..buy(&user, &coin, dec!(2), dec!(150))
        })
        .await
        .unwrap();

    let snapshot = store.portfolio_snapshot(user.id).await.unwrap().unwrap();
    assert_eq!(snapshot.user.balance, dec!(10100.00));
    assert!(snapshot.holdings.is_empty());
    assert_eq!(snapshot.total_trades, 2);
}

#[sqlx::test(migrator = "database::MIGRATOR")]
#[ignore = "needs a PostgreSQL server in DATABASE_URL"]
async fn watchlist_and_coin_queries(pool: PgPool) {
    let store = DbRepository::new(pool);
    let (user, btc) = seed(&store).await;
    store
        .create_coin(&NewCoin {
            symbol: "ETH".to_string(),
            name: "Ether".to_string(),
            current_price: dec!(10),
        })
        .await
        .unwrap();
    store
        .apply_price_updates(&[CoinPriceUpdate {
            symbol: "ETH".to_string(),
            current_price: dec!(10),
            market_cap: 3000,
            volume_24h: 2,
            price_change_24h: Decimal::ZERO,
            price_change_percentage_24h: Decimal::ZERO,
        }])
        .await
        .unwrap();

    let item = store.add_to_watchlist(user.id, btc.id).await.unwrap();
    assert_eq!(item.coin.symbol, "BTC");
    assert!(matches!(
        store.add_to_watchlist(user.id, btc.id).await,
        Err(DbError::Conflict(_))
    ));
    assert!(matches!(
        store.add_to_watchlist(user.id, 999).await,
        Err(DbError::NotFound)
    ));
    assert!(matches!(
        store.remove_from_watchlist(user.id + 1, item.entry.id).await,
        Err(DbError::NotFound)
    ));
    let snapshot = store.portfolio_snapshot(user.id).await.unwrap().unwrap();
    assert_eq!(snapshot.watchlist_count, 1);
    store.remove_from_watchlist(user.id, item.entry.id).await.unwrap();
    assert!(store.list_watchlist(user.id).await.unwrap().is_empty());

    let page = store
        .list_coins(Default::default(), CoinOrdering::new(CoinSort::Symbol, SortOrder::Asc))
        .await
        .unwrap();
    let symbols: Vec<_> = page.items.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(symbols, ["BTC", "ETH"]);

    let summary = store.market_summary().await.unwrap();
    assert_eq!(summary.total_market_cap, dec!(3000));
    assert_eq!(summary.total_volume, dec!(2));
    assert_eq!(summary.active_coins, 2);
}
