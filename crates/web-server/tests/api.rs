use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use database::InMemoryLedgerStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use web_server::{AppState, router};

fn app(store: &InMemoryLedgerStore) -> Router {
    router(AppState::new(Arc::new(store.clone()), dec!(10000.00)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, user_id: Option<i64>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = user_id {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user_id: Option<i64>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(id) = user_id {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, user_id: Option<i64>) -> Request<Body> {
    let mut builder = Request::delete(uri);
    if let Some(id) = user_id {
        builder = builder.header("x-user-id", id.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

/// Registers one user and lists BTC at 100. Returns (user id, coin id).
async fn seed(app: &Router) -> (i64, i64) {
    let (status, user) = send(
        app,
        post("/api/users", None, json!({ "username": "alice", "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, coin) = send(
        app,
        post("/api/coins", None, json!({ "symbol": "btc", "name": "Bitcoin", "current_price": "100" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(coin["symbol"], "BTC");

    (user["id"].as_i64().unwrap(), coin["id"].as_i64().unwrap())
}

#[tokio::test]
async fn health_check_responds() {
    let store = InMemoryLedgerStore::new();
    let response = app(&store).oneshot(get("/api/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn registration_grants_initial_balance_and_rejects_duplicates() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (user_id, _) = seed(&app).await;

    let (status, body) = send(&app, get("/api/user/balance", Some(user_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["balance"]), dec!(10000.00));

    let (status, body) = send(
        &app,
        post("/api/users", None, json!({ "username": "alice", "email": "again@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn trade_round_trip_updates_portfolio() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (user_id, coin_id) = seed(&app).await;

    let (status, trade) = send(
        &app,
        post(
            "/api/trades",
            Some(user_id),
            json!({ "coin_id": coin_id, "side": "buy", "quantity": "2", "price": "100" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(trade["side"], "buy");
    assert_eq!(decimal(&trade["total_amount"]), dec!(200));
    assert_eq!(trade["coin"]["symbol"], "BTC");

    send(
        &app,
        post("/api/coins/prices", None, json!([{ "symbol": "BTC", "current_price": "150" }])),
    )
    .await;

    let (status, portfolio) = send(&app, get("/api/user/portfolio", Some(user_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&portfolio["balance"]), dec!(9800));
    assert_eq!(decimal(&portfolio["portfolio_value"]), dec!(300));
    assert_eq!(decimal(&portfolio["total_value"]), dec!(10100));

    let (_, stats) = send(&app, get("/api/user/stats", Some(user_id))).await;
    assert_eq!(stats["total_trades"], 1);
    assert_eq!(stats["total_holdings"], 1);

    let (_, history) = send(&app, get("/api/trades?page=1&limit=10", Some(user_id))).await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["items"][0]["coin"]["symbol"], "BTC");
}

#[tokio::test]
async fn trade_failures_map_to_distinct_statuses() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (user_id, coin_id) = seed(&app).await;

    let cases = [
        (json!({ "coin_id": coin_id, "side": "buy", "quantity": "0", "price": "100" }), StatusCode::BAD_REQUEST, "invalid_order"),
        (json!({ "coin_id": 999, "side": "buy", "quantity": "1", "price": "100" }), StatusCode::NOT_FOUND, "coin_not_found"),
        (json!({ "coin_id": coin_id, "side": "buy", "quantity": "1000", "price": "100" }), StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance"),
        (json!({ "coin_id": coin_id, "side": "sell", "quantity": "1", "price": "100" }), StatusCode::UNPROCESSABLE_ENTITY, "insufficient_holding"),
        (json!({ "coin_id": coin_id, "side": "hold", "quantity": "1", "price": "100" }), StatusCode::BAD_REQUEST, "invalid_order"),
        (json!({ "coin_id": coin_id, "side": "buy", "quantity": "lots", "price": "100" }), StatusCode::BAD_REQUEST, "invalid_request"),
    ];

    for (body, expected_status, expected_code) in cases {
        let (status, response) = send(&app, post("/api/trades", Some(user_id), body.clone())).await;
        assert_eq!(status, expected_status, "{body}");
        assert_eq!(response["code"], expected_code, "{body}");
    }

    assert!(store.trades().await.is_empty());
}

#[tokio::test]
async fn storage_failure_is_reported_as_retryable() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (user_id, coin_id) = seed(&app).await;
    store.fail_next_commit();

    let (status, body) = send(
        &app,
        post(
            "/api/trades",
            Some(user_id),
            json!({ "coin_id": coin_id, "side": "buy", "quantity": "1", "price": "100" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "execution_failed");
    assert!(store.trades().await.is_empty());
}

#[tokio::test]
async fn user_routes_require_identity() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);

    let (status, body) = send(&app, get("/api/user/portfolio", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let request = Request::get("/api/user/stats")
        .header("x-user-id", "not-a-number")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, get("/api/user/portfolio", Some(42))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "user_not_found");
}

#[tokio::test]
async fn coin_lookups_and_pagination() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (_, coin_id) = seed(&app).await;

    let (status, coin) = send(&app, get(&format!("/api/coins/{coin_id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(coin["name"], "Bitcoin");

    let (status, coin) = send(&app, get("/api/coins/symbol/btc", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(coin["id"].as_i64(), Some(coin_id));

    let (status, _) = send(&app, get("/api/coins/symbol/NOPE", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Out-of-range paging falls back to the defaults.
    let (status, page) = send(&app, get("/api/coins?page=0&limit=500", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page"], 1);
    assert_eq!(page["limit"], 20);
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn negative_price_updates_are_rejected_as_a_batch() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (_, coin_id) = seed(&app).await;

    let (status, body) = send(
        &app,
        post(
            "/api/coins/prices",
            None,
            json!([
                { "symbol": "BTC", "current_price": "120" },
                { "symbol": "ETH", "current_price": "-1" }
            ]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");

    let (_, coin) = send(&app, get(&format!("/api/coins/{coin_id}"), None)).await;
    assert_eq!(decimal(&coin["current_price"]), dec!(100));

    let (status, body) = send(
        &app,
        post("/api/coins/prices", None, json!([{ "symbol": "btc", "current_price": "120" }, { "symbol": "XYZ", "current_price": "1" }])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "updated": 1, "skipped": 1 }));
}

#[tokio::test]
async fn watchlist_is_private_and_free_of_duplicates() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    let (user_id, coin_id) = seed(&app).await;
    let (_, bob) = send(
        &app,
        post("/api/users", None, json!({ "username": "bob", "email": "bob@example.com" })),
    )
    .await;
    let bob_id = bob["id"].as_i64().unwrap();

    let (status, item) = send(&app, post("/api/watchlist", Some(user_id), json!({ "coin_id": coin_id }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["coin"]["symbol"], "BTC");
    let entry_id = item["id"].as_i64().unwrap();

    let (status, body) = send(&app, post("/api/watchlist", Some(user_id), json!({ "coin_id": coin_id }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, _) = send(&app, post("/api/watchlist", Some(user_id), json!({ "coin_id": 999 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, stats) = send(&app, get("/api/user/stats", Some(user_id))).await;
    assert_eq!(stats["watchlist_count"], 1);

    let (_, list) = send(&app, get("/api/watchlist", Some(bob_id))).await;
    assert_eq!(list, json!([]));
    let (status, _) = send(&app, delete(&format!("/api/watchlist/{entry_id}"), Some(bob_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, delete(&format!("/api/watchlist/{entry_id}"), Some(user_id))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = send(&app, get("/api/watchlist", Some(user_id))).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn coins_sort_by_whitelisted_columns_and_summarize_the_market() {
    let store = InMemoryLedgerStore::new();
    let app = app(&store);
    seed(&app).await;
    send(&app, post("/api/coins", None, json!({ "symbol": "ETH", "name": "Ether", "current_price": "10" }))).await;
    send(
        &app,
        post(
            "/api/coins/prices",
            None,
            json!([
                { "symbol": "BTC", "current_price": "100", "market_cap": 1000, "volume_24h": 40 },
                { "symbol": "ETH", "current_price": "10", "market_cap": 3000, "volume_24h": 2 }
            ]),
        ),
    )
    .await;

    let symbols = |page: &Value| -> Vec<String> {
        page["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["symbol"].as_str().unwrap().to_string())
            .collect()
    };

    let (_, page) = send(&app, get("/api/coins", None)).await;
    assert_eq!(symbols(&page), ["ETH", "BTC"]);
    let (_, page) = send(&app, get("/api/coins?sort=current_price&order=desc", None)).await;
    assert_eq!(symbols(&page), ["BTC", "ETH"]);
    let (_, page) = send(&app, get("/api/coins?sort=volume_24h&order=asc&limit=1", None)).await;
    assert_eq!(symbols(&page), ["ETH"]);
    assert_eq!(page["total"], 2);

    let (status, body) = send(&app, get("/api/coins?sort=name%3B%20DROP%20TABLE%20coins", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
    let (status, _) = send(&app, get("/api/coins?order=sideways", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, summary) = send(&app, get("/api/coins/market/data", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&summary["total_market_cap"]), dec!(4000));
    assert_eq!(decimal(&summary["total_volume"]), dec!(42));
    assert_eq!(summary["active_coins"], 2);
}
