//! Bybit v5 REST client
//!
//! Every call goes through the shared [`RetryPolicy`]. Private calls are
//! re-signed with a fresh timestamp on each attempt.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use super::signer::RequestSigner;
use crate::config::{Credentials, OrderTypeConfig, VenueConfig};
use crate::error::{Result, TraderError};
use crate::parser::Candle;
use crate::risk::InstrumentFilters;

const ORDER_CREATE_PATH: &str = "/v5/order/create";
const WALLET_BALANCE_PATH: &str = "/v5/account/wallet-balance";
const KLINE_PATH: &str = "/v5/market/kline";
const INSTRUMENTS_PATH: &str = "/v5/market/instruments-info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "Market",
            OrderType::Limit => "Limit",
        }
    }
}

impl From<OrderTypeConfig> for OrderType {
    fn from(config: OrderTypeConfig) -> Self {
        match config {
            OrderTypeConfig::Market => OrderType::Market,
            OrderTypeConfig::Limit => OrderType::Limit,
        }
    }
}

/// Order as submitted to the venue
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    /// Required for limit orders, ignored for market orders
    pub price: Option<Decimal>,
    pub time_in_force: String,
    pub reduce_only: bool,
}

impl OrderRequest {
    fn to_params(&self, category: &str) -> Result<Vec<(String, String)>> {
        let mut params = vec![
            ("category".to_string(), category.to_string()),
            ("symbol".to_string(), self.symbol.clone()),
            ("side".to_string(), self.side.as_str().to_string()),
            ("orderType".to_string(), self.order_type.as_str().to_string()),
            ("qty".to_string(), self.qty.normalize().to_string()),
            ("timeInForce".to_string(), self.time_in_force.clone()),
        ];
        if self.order_type == OrderType::Limit {
            let price = self.price.ok_or_else(|| {
                TraderError::ConfigError("limit order submitted without a price".into())
            })?;
            params.push(("price".to_string(), price.normalize().to_string()));
        }
        if self.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        Ok(params)
    }
}

/// Venue acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

/// Outbound venue operations used by the trading loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Wallet balance of the settlement coin
    async fn wallet_balance(&self) -> Result<Decimal>;

    /// Candles oldest first
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters>;
}

/// Common `{retCode, retMsg, result}` wrapper
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

impl Envelope {
    fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if self.ret_code != 0 {
            return Err(TraderError::VenueRejected {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        Ok(serde_json::from_value(self.result)?)
    }
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<InstrumentInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    qty_step: String,
    min_order_qty: String,
}

#[derive(Debug, Deserialize)]
struct WalletResult {
    #[serde(default)]
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
}

/// reqwest-backed [`VenueClient`]
pub struct BybitRestClient {
    http: reqwest::Client,
    base_url: String,
    category: String,
    account_type: String,
    settle_coin: String,
    signer: RequestSigner,
    retry: RetryPolicy,
}

impl BybitRestClient {
    pub fn new(venue: &VenueConfig, credentials: Credentials, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(venue.request_timeout())
            .build()
            .map_err(|e| TraderError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: venue.rest_endpoint.trim_end_matches('/').to_string(),
            category: venue.category.clone(),
            account_type: venue.account_type.clone(),
            settle_coin: venue.settle_coin.clone(),
            signer: RequestSigner::new(credentials, venue.recv_window),
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One attempt: status check, then envelope decode
    async fn read_envelope(response: reqwest::Response) -> Result<Envelope> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraderError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Envelope>().await?)
    }

    async fn post_signed(&self, path: &str, params: Vec<(String, String)>) -> Result<Envelope> {
        let signed = self.signer.sign_now(params)?;
        let response = self.http.post(self.url(path)).form(&signed).send().await?;
        Self::read_envelope(response).await
    }

    async fn get_signed(&self, path: &str, params: Vec<(String, String)>) -> Result<Envelope> {
        let signed = self.signer.sign_now(params)?;
        let response = self.http.get(self.url(path)).query(&signed).send().await?;
        Self::read_envelope(response).await
    }

    async fn get_public(&self, path: &str, params: &[(String, String)]) -> Result<Envelope> {
        let response = self.http.get(self.url(path)).query(params).send().await?;
        Self::read_envelope(response).await
    }
}

#[async_trait]
impl VenueClient for BybitRestClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let params = order.to_params(&self.category)?;
        info!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            order_type = order.order_type.as_str(),
            qty = %order.qty,
            "Submitting order"
        );

        let ack: OrderAck = self
            .retry
            .run("place_order", move || {
                self.post_signed(ORDER_CREATE_PATH, params.clone())
            })
            .await?
            .into_result()?;

        info!(order_id = %ack.order_id, "Order accepted");
        Ok(ack)
    }

    async fn wallet_balance(&self) -> Result<Decimal> {
        let params = vec![
            ("accountType".to_string(), self.account_type.clone()),
            ("coin".to_string(), self.settle_coin.clone()),
        ];
        let result: WalletResult = self
            .retry
            .run("wallet_balance", move || {
                self.get_signed(WALLET_BALANCE_PATH, params.clone())
            })
            .await?
            .into_result()?;

        let coin = result
            .list
            .iter()
            .flat_map(|account| account.coin.iter())
            .find(|c| c.coin == self.settle_coin)
            .ok_or_else(|| {
                TraderError::ParseError(format!("no {} balance in response", self.settle_coin))
            })?;

        let balance = Decimal::from_str(&coin.wallet_balance).map_err(|e| {
            TraderError::ParseError(format!("walletBalance {:?}: {}", coin.wallet_balance, e))
        })?;
        debug!(%balance, coin = %coin.coin, "Wallet balance");
        Ok(balance)
    }

    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let params = vec![
            ("category".to_string(), self.category.clone()),
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let params = params.as_slice();
        let result: KlineResult = self
            .retry
            .run("fetch_candles", move || self.get_public(KLINE_PATH, params))
            .await?
            .into_result()?;

        // The venue returns newest first
        let mut candles = result
            .list
            .iter()
            .map(|row| Candle::from_row(row))
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    async fn instrument_filters(&self, symbol: &str) -> Result<InstrumentFilters> {
        let params = vec![
            ("category".to_string(), self.category.clone()),
            ("symbol".to_string(), symbol.to_string()),
        ];
        let params = params.as_slice();
        let result: InstrumentsResult = self
            .retry
            .run("instrument_filters", move || {
                self.get_public(INSTRUMENTS_PATH, params)
            })
            .await?
            .into_result()?;

        let info = result.list.first().ok_or_else(|| {
            TraderError::ParseError(format!("instrument {} not listed", symbol))
        })?;
        let parse = |field: &str, raw: &str| {
            Decimal::from_str(raw)
                .map_err(|e| TraderError::ParseError(format!("{} {:?}: {}", field, raw, e)))
        };
        Ok(InstrumentFilters {
            qty_step: parse("qtyStep", &info.lot_size_filter.qty_step)?,
            min_qty: parse("minOrderQty", &info.lot_size_filter.min_order_qty)?,
        })
    }
}
