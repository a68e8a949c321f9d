//! REST client against a local venue stand-in

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use flow_trader::config::{Credentials, VenueConfig};
use flow_trader::execution::{
    canonical_query, hmac_hex, BybitRestClient, OrderRequest, OrderSide, OrderType, RetryPolicy,
    VenueClient,
};
use flow_trader::TraderError;

/// Replies with scripted responses first, then `fallback`
#[derive(Default)]
struct Venue {
    hits: AtomicUsize,
    script: Mutex<VecDeque<(StatusCode, Value)>>,
    requests: Mutex<Vec<HashMap<String, String>>>,
}

impl Venue {
    fn scripted(responses: Vec<(StatusCode, Value)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn reply(&self, params: HashMap<String, String>, fallback: Value) -> (StatusCode, Json<Value>) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(params);
        let (status, body) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::OK, fallback));
        (status, Json(body))
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn order_create(
    State(venue): State<Arc<Venue>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    venue.reply(
        form,
        json!({"retCode": 0, "retMsg": "OK", "result": {"orderId": "ord-1", "orderLinkId": ""}}),
    )
}

async fn wallet_balance(
    State(venue): State<Arc<Venue>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    venue.reply(
        query,
        json!({"retCode": 0, "retMsg": "OK", "result": {"list": [
            {"coin": [{"coin": "BTC", "walletBalance": "1"}, {"coin": "USDT", "walletBalance": "1234.5"}]}
        ]}}),
    )
}

async fn kline(
    State(venue): State<Arc<Venue>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    venue.reply(
        query,
        json!({"retCode": 0, "retMsg": "OK", "result": {"list": [
            ["3000", "2", "3", "1", "2.5", "10"],
            ["2000", "1", "2", "0.5", "2", "12"]
        ]}}),
    )
}

async fn spawn_venue(venue: Arc<Venue>) -> String {
    let app = Router::new()
        .route("/v5/order/create", post(order_create))
        .route("/v5/account/wallet-balance", get(wallet_balance))
        .route("/v5/market/kline", get(kline))
        .with_state(venue);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> BybitRestClient {
    let venue = VenueConfig {
        rest_endpoint: base_url.to_string(),
        ..VenueConfig::default()
    };
    let retry = RetryPolicy::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(100),
        vec![429, 500, 502, 503, 504],
    );
    BybitRestClient::new(&venue, Credentials::new("test-key", "test-secret"), retry).unwrap()
}

fn market_buy() -> OrderRequest {
    OrderRequest {
        symbol: "BTCUSDT".into(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        qty: dec!(0.010),
        price: Some(dec!(30000)),
        time_in_force: "GTC".into(),
        reduce_only: false,
    }
}

fn unavailable() -> (StatusCode, Value) {
    (StatusCode::SERVICE_UNAVAILABLE, json!({"error": "unavailable"}))
}

#[tokio::test]
async fn test_503_retried_until_attempts_exhausted() {
    let venue = Venue::scripted(vec![unavailable(), unavailable(), unavailable()]);
    let client = client(&spawn_venue(venue.clone()).await);

    let err = client.place_order(&market_buy()).await.unwrap_err();

    assert!(matches!(err, TraderError::HttpStatus { status: 503, .. }));
    assert_eq!(venue.hits(), 3);
}

#[tokio::test]
async fn test_503_then_success() {
    let venue = Venue::scripted(vec![unavailable(), unavailable()]);
    let client = client(&spawn_venue(venue.clone()).await);

    let ack = tokio_test::assert_ok!(client.place_order(&market_buy()).await);

    assert_eq!(ack.order_id, "ord-1");
    assert_eq!(venue.hits(), 3);
}

#[tokio::test]
async fn test_venue_error_with_http_200_not_retried() {
    let venue = Venue::scripted(vec![(
        StatusCode::OK,
        json!({"retCode": 110007, "retMsg": "ab not enough for new order", "result": {}}),
    )]);
    let client = client(&spawn_venue(venue.clone()).await);

    let err = client.place_order(&market_buy()).await.unwrap_err();

    match err {
        TraderError::VenueRejected { code, message } => {
            assert_eq!(code, 110007);
            assert!(message.contains("not enough"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(venue.hits(), 1);
}

#[tokio::test]
async fn test_client_error_status_not_retried() {
    let venue = Venue::scripted(vec![(StatusCode::BAD_REQUEST, json!({}))]);
    let client = client(&spawn_venue(venue.clone()).await);

    let err = client.place_order(&market_buy()).await.unwrap_err();

    assert!(matches!(err, TraderError::HttpStatus { status: 400, .. }));
    assert_eq!(venue.hits(), 1);
}

#[tokio::test]
async fn test_order_is_signed() {
    let venue = Venue::scripted(vec![]);
    let client = client(&spawn_venue(venue.clone()).await);

    client.place_order(&market_buy()).await.unwrap();

    let form = venue.requests.lock().unwrap()[0].clone();
    assert_eq!(form["api_key"], "test-key");
    assert_eq!(form["recvWindow"], "5000");
    assert_eq!(form["category"], "linear");
    assert_eq!(form["side"], "Buy");
    assert_eq!(form["orderType"], "Market");
    assert_eq!(form["qty"], "0.01");
    assert!(!form.contains_key("price"));
    assert!(form["timestamp"].parse::<i64>().is_ok());

    let unsigned: Vec<(String, String)> = form
        .iter()
        .filter(|(k, _)| k.as_str() != "sign")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let expected = hmac_hex("test-secret", &canonical_query(&unsigned)).unwrap();
    assert_eq!(form["sign"], expected);
}

#[tokio::test]
async fn test_limit_order_carries_price() {
    let venue = Venue::scripted(vec![]);
    let client = client(&spawn_venue(venue.clone()).await);

    let order = OrderRequest {
        order_type: OrderType::Limit,
        side: OrderSide::Sell,
        reduce_only: true,
        ..market_buy()
    };
    client.place_order(&order).await.unwrap();

    let form = venue.requests.lock().unwrap()[0].clone();
    assert_eq!(form["orderType"], "Limit");
    assert_eq!(form["price"], "30000");
    assert_eq!(form["reduceOnly"], "true");
}

#[tokio::test]
async fn test_wallet_balance_retried_and_parsed() {
    let venue = Venue::scripted(vec![(StatusCode::TOO_MANY_REQUESTS, json!({}))]);
    let client = client(&spawn_venue(venue.clone()).await);

    let balance = tokio_test::assert_ok!(client.wallet_balance().await);

    assert_eq!(balance, dec!(1234.5));
    assert_eq!(venue.hits(), 2);
    let query = venue.requests.lock().unwrap()[1].clone();
    assert_eq!(query["accountType"], "UNIFIED");
    assert_eq!(query["coin"], "USDT");
    assert!(query.contains_key("sign"));
}

#[tokio::test]
async fn test_candles_returned_oldest_first() {
    let venue = Venue::scripted(vec![]);
    let client = client(&spawn_venue(venue.clone()).await);

    let candles = client.fetch_candles("BTCUSDT", "1", 2).await.unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].timestamp, 2000);
    assert_eq!(candles[1].close, 2.5);
    let query = venue.requests.lock().unwrap()[0].clone();
    assert_eq!(query["interval"], "1");
    assert!(!query.contains_key("sign"));
}
