// follower.rs — Follower execution adapter (spec.md §4 "Follower
// Execution Adapter"). Unlike the Master venue, which is consumed
// read-only, the Follower is the venue this engine actually trades on,
// so its client is authenticated with HMAC-signed REST calls and carries
// an execution-report stream.
use crate::error::VenueError;
use crate::events::{FollowerExecutionReport, FollowerOrderStatus, Side};
use crate::follower_signing::build_signed_query;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use url::Url;

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub follower_order_id: String,
    pub status: FollowerOrderStatus,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AccountSnapshot {
    pub equity: Decimal,
}

/// The Follower's current net position on an instrument, plus its average
/// entry price — used by the Exposure Rebalancer to anchor a take-profit
/// correction at `entry * (1 +/- offset)` (spec.md §4.7).
#[derive(Debug, Clone, Copy)]
pub struct PositionDetail {
    pub size: Decimal,
    pub entry_price: Decimal,
}

#[async_trait]
pub trait FollowerClient: Send + Sync {
    async fn account_equity(&self) -> Result<AccountSnapshot, VenueError>;
    async fn position(&self, instrument: &str) -> Result<Decimal, VenueError>;
    async fn position_detail(&self, instrument: &str) -> Result<PositionDetail, VenueError>;
    async fn open_orders(&self, instrument: &str) -> Result<Vec<PlacedOrder>, VenueError>;

    /// Looks up a single order's current status, used by the Periodic Order
    /// Validator to detect a Follower order that already reached a terminal
    /// state (or vanished) before the mapping's staleness timeout (spec.md
    /// §4.8). Returns `VenueError::UnknownOrder` if the venue no longer
    /// recognizes it.
    async fn order_status(
        &self,
        instrument: &str,
        follower_order_id: &str,
    ) -> Result<FollowerOrderStatus, VenueError>;

    async fn place_limit_gtc(
        &self,
        instrument: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError>;

    async fn place_market(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError>;

    async fn cancel(&self, instrument: &str, follower_order_id: &str) -> Result<(), VenueError>;

    /// Atomically cancels the existing order and places a replacement,
    /// used by the Order Executor when a Master order's price or size
    /// changes without a cancel/re-open pair.
    async fn cancel_replace(
        &self,
        instrument: &str,
        follower_order_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError>;
}

pub struct BinanceLikeClient {
    rest_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn parse_decimal(v: &serde_json::Value) -> Decimal {
    v.as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .or_else(|| v.as_f64().and_then(|f| Decimal::from_str(&f.to_string()).ok()))
        .unwrap_or_default()
}

fn parse_status(s: &str) -> FollowerOrderStatus {
    match s {
        "NEW" => FollowerOrderStatus::New,
        "PARTIALLY_FILLED" => FollowerOrderStatus::PartiallyFilled,
        "FILLED" => FollowerOrderStatus::Filled,
        "CANCELED" => FollowerOrderStatus::Canceled,
        "EXPIRED" => FollowerOrderStatus::Expired,
        _ => FollowerOrderStatus::Rejected,
    }
}

impl BinanceLikeClient {
    pub fn new(rest_url: String, api_key: String, api_secret: String) -> Self {
        Self { rest_url, api_key, api_secret, http: reqwest::Client::new() }
    }

    async fn signed_post(&self, path: &str, mut params: Vec<(&str, String)>) -> Result<serde_json::Value, VenueError> {
        params.push(("timestamp", now_ms().to_string()));
        let query = build_signed_query(&self.api_secret, &params);
        let url = format!("{}{path}?{query}", self.rest_url);
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(VenueError::RateLimited);
        }
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(VenueError::Auth("rejected credentials".into()));
        }
        let value: serde_json::Value =
            resp.json().await.map_err(|e| VenueError::Network(e.to_string()))?;
        if let Some(msg) = value.get("msg").and_then(|m| m.as_str()) {
            if value.get("code").and_then(|c| c.as_i64()).unwrap_or(0) < 0 {
                return Err(VenueError::Rejected(msg.to_string()));
            }
        }
        Ok(value)
    }

    async fn signed_get(&self, path: &str, mut params: Vec<(&str, String)>) -> Result<serde_json::Value, VenueError> {
        params.push(("timestamp", now_ms().to_string()));
        let query = build_signed_query(&self.api_secret, &params);
        let url = format!("{}{path}?{query}", self.rest_url);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;
        resp.json().await.map_err(|e| VenueError::Network(e.to_string()))
    }

    fn order_from_value(v: &serde_json::Value) -> PlacedOrder {
        PlacedOrder {
            follower_order_id: v["orderId"].as_u64().map(|n| n.to_string()).unwrap_or_default(),
            status: v["status"].as_str().map(parse_status).unwrap_or(FollowerOrderStatus::New),
            side: match v["side"].as_str() {
                Some("BUY") => Side::Buy,
                _ => Side::Sell,
            },
            price: parse_decimal(&v["price"]),
            size: parse_decimal(&v["origQty"]),
            reduce_only: v["reduceOnly"].as_bool().unwrap_or(false),
        }
    }
}

#[async_trait]
impl FollowerClient for BinanceLikeClient {
    async fn account_equity(&self) -> Result<AccountSnapshot, VenueError> {
        let value = self.signed_get("/fapi/v2/account", vec![]).await?;
        Ok(AccountSnapshot { equity: parse_decimal(&value["totalMarginBalance"]) })
    }

    async fn position(&self, instrument: &str) -> Result<Decimal, VenueError> {
        let value = self
            .signed_get("/fapi/v2/positionRisk", vec![("symbol", instrument.to_string())])
            .await?;
        let positions = value.as_array().cloned().unwrap_or_default();
        Ok(positions.first().map(|p| parse_decimal(&p["positionAmt"])).unwrap_or_default())
    }

    async fn position_detail(&self, instrument: &str) -> Result<PositionDetail, VenueError> {
        let value = self
            .signed_get("/fapi/v2/positionRisk", vec![("symbol", instrument.to_string())])
            .await?;
        let positions = value.as_array().cloned().unwrap_or_default();
        let p = positions.first();
        Ok(PositionDetail {
            size: p.map(|p| parse_decimal(&p["positionAmt"])).unwrap_or_default(),
            entry_price: p.map(|p| parse_decimal(&p["entryPrice"])).unwrap_or_default(),
        })
    }

    async fn order_status(
        &self,
        instrument: &str,
        follower_order_id: &str,
    ) -> Result<FollowerOrderStatus, VenueError> {
        let value = self
            .signed_get(
                "/fapi/v1/order",
                vec![("symbol", instrument.to_string()), ("orderId", follower_order_id.to_string())],
            )
            .await?;
        if let Some(code) = value.get("code").and_then(|c| c.as_i64()) {
            if code < 0 {
                let msg = value.get("msg").and_then(|m| m.as_str()).unwrap_or("rejected").to_string();
                if msg.to_lowercase().contains("unknown order") {
                    return Err(VenueError::UnknownOrder(follower_order_id.to_string()));
                }
                return Err(VenueError::Rejected(msg));
            }
        }
        Ok(value["status"].as_str().map(parse_status).unwrap_or(FollowerOrderStatus::Rejected))
    }

    async fn open_orders(&self, instrument: &str) -> Result<Vec<PlacedOrder>, VenueError> {
        let value = self
            .signed_get("/fapi/v1/openOrders", vec![("symbol", instrument.to_string())])
            .await?;
        Ok(value
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(Self::order_from_value)
            .collect())
    }

    async fn place_limit_gtc(
        &self,
        instrument: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError> {
        let params = vec![
            ("symbol", instrument.to_string()),
            ("side", if side == Side::Buy { "BUY".to_string() } else { "SELL".to_string() }),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("price", price.to_string()),
            ("quantity", size.to_string()),
            ("reduceOnly", reduce_only.to_string()),
        ];
        let value = self.signed_post("/fapi/v1/order", params).await?;
        Ok(Self::order_from_value(&value))
    }

    async fn place_market(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError> {
        let params = vec![
            ("symbol", instrument.to_string()),
            ("side", if side == Side::Buy { "BUY".to_string() } else { "SELL".to_string() }),
            ("type", "MARKET".to_string()),
            ("quantity", size.to_string()),
            ("reduceOnly", reduce_only.to_string()),
        ];
        let value = self.signed_post("/fapi/v1/order", params).await?;
        Ok(Self::order_from_value(&value))
    }

    async fn cancel(&self, instrument: &str, follower_order_id: &str) -> Result<(), VenueError> {
        let params = vec![
            ("symbol", instrument.to_string()),
            ("orderId", follower_order_id.to_string()),
        ];
        let value = self.signed_post("/fapi/v1/order/cancel", params).await;
        match value {
            Ok(_) => Ok(()),
            Err(VenueError::Rejected(msg)) if msg.contains("Unknown order") => {
                Err(VenueError::UnknownOrder(follower_order_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_replace(
        &self,
        instrument: &str,
        follower_order_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        reduce_only: bool,
    ) -> Result<PlacedOrder, VenueError> {
        // Best-effort: cancel then place. A true atomic cancelReplace
        // endpoint is venue-specific; callers must tolerate a brief gap.
        let _ = self.cancel(instrument, follower_order_id).await;
        self.place_limit_gtc(instrument, side, price, size, reduce_only).await
    }
}

/// Decodes a raw Follower user-data-stream frame into an execution
/// report, forwarding it on `tx`.
pub fn handle_user_stream_frame(frame: &serde_json::Value, tx: &mpsc::Sender<FollowerExecutionReport>) {
    if frame["e"].as_str() != Some("ORDER_TRADE_UPDATE") {
        return;
    }
    let order = &frame["o"];
    let side = match order["S"].as_str() {
        Some("BUY") => Side::Buy,
        _ => Side::Sell,
    };
    let report = FollowerExecutionReport {
        follower_order_id: order["i"].as_u64().map(|n| n.to_string()).unwrap_or_default(),
        instrument: order["s"].as_str().unwrap_or_default().to_string(),
        side,
        status: order["X"].as_str().map(parse_status).unwrap_or(FollowerOrderStatus::New),
        last_fill_price: order.get("L").map(parse_decimal),
        last_fill_size: order.get("l").map(parse_decimal),
        timestamp_ms: frame["E"].as_u64().unwrap_or_else(now_ms),
    };
    let _ = tx.try_send(report);
}

/// Connects to the Follower's user-data WebSocket and forwards decoded
/// execution reports on `tx`, reconnecting with exponential backoff on
/// drop (mirrors master.rs's Master feed loop).
pub async fn run_user_stream(ws_url: String, tx: mpsc::Sender<FollowerExecutionReport>) {
    let mut retry_delay_secs: u64 = 1;
    let max_delay_secs: u64 = 32;

    loop {
        info!("[FOLLOWER] connecting user stream to {ws_url}");
        match connect_async(Url::parse(&ws_url).expect("invalid follower ws url")).await {
            Ok((ws_stream, _)) => {
                info!("[FOLLOWER] user stream connected");
                retry_delay_secs = 1;
                let (_write, mut read) = ws_stream.split();

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                            if let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) {
                                handle_user_stream_frame(&frame, &tx);
                            }
                        }
                        Ok(tokio_tungstenite::tungstenite::Message::Close(_)) => {
                            warn!("[FOLLOWER] user stream closed by server, reconnecting");
                            break;
                        }
                        Err(e) => {
                            error!("[FOLLOWER] user stream error: {e}, reconnecting");
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                error!("[FOLLOWER] user stream connect failed: {e}, retrying in {retry_delay_secs}s");
            }
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = std::cmp::min(retry_delay_secs * 2, max_delay_secs);
    }
}
