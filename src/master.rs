// master.rs — Master ingest (spec.md §4 "Master Ingest"). Subscribes to
// the Hyperliquid `orderUpdates` and `userFills` channels for the
// followed accounts, reconnecting with exponential backoff, and decodes
// incoming frames into `MasterOrderEvent`/`MasterFillEvent` pushed onto an
// mpsc channel for the Order Executor to consume. Also exposes the
// snapshot REST calls (`openOrders`, `clearinghouseState`) used by
// startup reconciliation.
use crate::events::{MasterFillEvent, MasterOrderEvent, MasterOrderStatus, Side};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

const STALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum MasterEvent {
    Order(MasterOrderEvent),
    Fill(MasterFillEvent),
}

pub struct MasterIngest {
    ws_url: String,
    rest_url: String,
    followed_users: Vec<String>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn parse_decimal(v: &serde_json::Value) -> Decimal {
    v.as_str().and_then(|s| Decimal::from_str(s).ok()).unwrap_or_default()
}

impl MasterIngest {
    pub fn new(ws_url: String, rest_url: String, followed_users: Vec<String>) -> Self {
        Self { ws_url, rest_url, followed_users }
    }

    /// Fetches the Master's currently-open orders for reconciliation
    /// (spec.md §4.6 "Startup Reconciliation").
    pub async fn fetch_open_orders(
        &self,
        user: &str,
    ) -> Result<Vec<MasterOrderEvent>, crate::error::VenueError> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/info", self.rest_url))
            .json(&serde_json::json!({"type": "openOrders", "user": user}))
            .send()
            .await
            .map_err(|e| crate::error::VenueError::Network(e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| crate::error::VenueError::Network(e.to_string()))?;

        let mut events = Vec::new();
        if let Some(arr) = resp.as_array() {
            for o in arr {
                let side = match o["side"].as_str() {
                    Some("B") => Side::Buy,
                    _ => Side::Sell,
                };
                events.push(MasterOrderEvent {
                    oid: o["oid"].as_u64().unwrap_or_default(),
                    instrument: o["coin"].as_str().unwrap_or_default().to_string(),
                    side,
                    price: parse_decimal(&o["limitPx"]),
                    size: parse_decimal(&o["sz"]),
                    status: MasterOrderStatus::Open,
                    reduce_only: o["reduceOnly"].as_bool().unwrap_or(false),
                    timestamp_ms: o["timestamp"].as_u64().unwrap_or_else(now_ms),
                    master_account: user.to_string(),
                });
            }
        }
        Ok(events)
    }

    /// Fetches the Master's net position per instrument (signed size), used
    /// by reconciliation's price-side-match recovery.
    pub async fn fetch_positions(
        &self,
        user: &str,
    ) -> Result<Vec<(String, Decimal)>, crate::error::VenueError> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/info", self.rest_url))
            .json(&serde_json::json!({"type": "clearinghouseState", "user": user}))
            .send()
            .await
            .map_err(|e| crate::error::VenueError::Network(e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| crate::error::VenueError::Network(e.to_string()))?;

        let mut positions = Vec::new();
        if let Some(arr) = resp["assetPositions"].as_array() {
            for p in arr {
                let coin = p["position"]["coin"].as_str().unwrap_or_default().to_string();
                let szi = parse_decimal(&p["position"]["szi"]);
                if !coin.is_empty() {
                    positions.push((coin, szi));
                }
            }
        }
        Ok(positions)
    }

    /// Connects and forwards decoded Master events on `tx` until the
    /// connection drops, then reconnects with exponential backoff
    /// (base 1s, cap 32s).
    pub async fn run(&self, tx: mpsc::Sender<MasterEvent>) {
        let mut retry_delay_secs: u64 = 1;
        let max_delay_secs: u64 = 32;

        loop {
            info!("[MASTER] connecting to {}", self.ws_url);
            match connect_async(Url::parse(&self.ws_url).expect("invalid master ws url")).await {
                Ok((ws_stream, _)) => {
                    info!("[MASTER] connected");
                    retry_delay_secs = 1;
                    let (mut write, mut read) = ws_stream.split();

                    for user in &self.followed_users {
                        let order_sub = serde_json::json!({
                            "method": "subscribe",
                            "subscription": { "type": "orderUpdates", "user": user }
                        });
                        if let Err(e) = write.send(Message::Text(order_sub.to_string())).await {
                            error!("[MASTER] failed to subscribe orderUpdates for {user}: {e}");
                        }
                        let fill_sub = serde_json::json!({
                            "method": "subscribe",
                            "subscription": { "type": "userFills", "user": user }
                        });
                        if let Err(e) = write.send(Message::Text(fill_sub.to_string())).await {
                            error!("[MASTER] failed to subscribe userFills for {user}: {e}");
                        }
                    }

                    let mut last_message_at = now_ms();
                    while let Some(msg) = read.next().await {
                        match msg {
                            Ok(Message::Text(text)) => {
                                last_message_at = now_ms();
                                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                                    self.handle_frame(&parsed, &tx).await;
                                }
                            }
                            Ok(Message::Ping(data)) => {
                                let _ = write.send(Message::Pong(data)).await;
                                last_message_at = now_ms();
                            }
                            Ok(Message::Close(_)) => {
                                warn!("[MASTER] connection closed by server, reconnecting");
                                break;
                            }
                            Err(e) => {
                                error!("[MASTER] ws error: {e}, reconnecting");
                                break;
                            }
                            _ => {}
                        }
                        if now_ms().saturating_sub(last_message_at) > STALL_TIMEOUT_SECS * 1_000 {
                            warn!("[MASTER] feed stalled, forcing reconnect");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("[MASTER] connect failed: {e}, retrying in {retry_delay_secs}s");
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay_secs)).await;
            retry_delay_secs = std::cmp::min(retry_delay_secs * 2, max_delay_secs);
        }
    }

    async fn handle_frame(&self, parsed: &serde_json::Value, tx: &mpsc::Sender<MasterEvent>) {
        let channel = parsed["channel"].as_str().unwrap_or("");
        match channel {
            "orderUpdates" => {
                if let Some(updates) = parsed["data"].as_array() {
                    for u in updates {
                        if let Some(event) = self.parse_order_update(u) {
                            let _ = tx.send(MasterEvent::Order(event)).await;
                        }
                    }
                }
            }
            "userFills" => {
                if let Some(data) = parsed.get("data") {
                    if data["isSnapshot"].as_bool().unwrap_or(false) {
                        return;
                    }
                    if let Some(fills) = data["fills"].as_array() {
                        for f in fills {
                            if let Some(event) = self.parse_fill(f) {
                                let _ = tx.send(MasterEvent::Fill(event)).await;
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn parse_order_update(&self, u: &serde_json::Value) -> Option<MasterOrderEvent> {
        let order = &u["order"];
        let status = match u["status"].as_str()? {
            "open" => MasterOrderStatus::Open,
            "canceled" => MasterOrderStatus::Canceled,
            "filled" => MasterOrderStatus::Filled,
            "triggered" => MasterOrderStatus::Triggered,
            _ => return None,
        };
        let side = match order["side"].as_str()? {
            "B" => Side::Buy,
            _ => Side::Sell,
        };
        Some(MasterOrderEvent {
            oid: order["oid"].as_u64()?,
            instrument: order["coin"].as_str()?.to_string(),
            side,
            price: parse_decimal(&order["limitPx"]),
            size: parse_decimal(&order["sz"]),
            status,
            reduce_only: order["reduceOnly"].as_bool().unwrap_or(false),
            timestamp_ms: u["statusTimestamp"].as_u64().unwrap_or_else(now_ms),
            master_account: order["user"].as_str().unwrap_or_default().to_string(),
        })
    }

    fn parse_fill(&self, f: &serde_json::Value) -> Option<MasterFillEvent> {
        let side = match f["side"].as_str()? {
            "B" => Side::Buy,
            _ => Side::Sell,
        };
        // Hyperliquid marks resting (maker) fills with a non-empty "crossed"==false;
        // only taker fills are independently reproducible and reported here.
        let taker = f["crossed"].as_bool().unwrap_or(true);
        Some(MasterFillEvent {
            instrument: f["coin"].as_str()?.to_string(),
            side,
            price: parse_decimal(&f["px"]),
            size: parse_decimal(&f["sz"]),
            timestamp_ms: f["time"].as_u64().unwrap_or_else(now_ms),
            taker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest() -> MasterIngest {
        MasterIngest::new("wss://example.invalid/ws".into(), "https://example.invalid".into(), vec!["0xabc".into()])
    }

    #[test]
    fn parse_order_update_decodes_open_order() {
        let frame = serde_json::json!({
            "status": "open",
            "statusTimestamp": 1_700_000_000_000u64,
            "order": {
                "oid": 123,
                "coin": "BTC",
                "side": "B",
                "limitPx": "30000.5",
                "sz": "0.25",
                "reduceOnly": false,
                "user": "0xabc",
            }
        });
        let event = ingest().parse_order_update(&frame).expect("parses");
        assert_eq!(event.oid, 123);
        assert_eq!(event.instrument, "BTC");
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.status, MasterOrderStatus::Open);
        assert_eq!(event.size, Decimal::new(25, 2));
        assert!(!event.reduce_only);
    }

    #[test]
    fn parse_order_update_rejects_unknown_status() {
        let frame = serde_json::json!({
            "status": "weird",
            "order": { "oid": 1, "coin": "BTC", "side": "B", "limitPx": "1", "sz": "1" }
        });
        assert!(ingest().parse_order_update(&frame).is_none());
    }

    #[test]
    fn parse_fill_flags_crossed_fills_as_taker() {
        let frame = serde_json::json!({
            "coin": "ETH",
            "side": "A",
            "px": "2000",
            "sz": "1.5",
            "time": 1_700_000_000_000u64,
            "crossed": true,
        });
        let fill = ingest().parse_fill(&frame).expect("parses");
        assert_eq!(fill.side, Side::Sell);
        assert!(fill.taker);
        assert_eq!(fill.size, Decimal::new(15, 1));
    }

    #[test]
    fn parse_fill_flags_resting_fills_as_non_taker() {
        let frame = serde_json::json!({
            "coin": "ETH",
            "side": "B",
            "px": "2000",
            "sz": "1",
            "time": 1_700_000_000_000u64,
            "crossed": false,
        });
        let fill = ingest().parse_fill(&frame).expect("parses");
        assert!(!fill.taker);
    }
}
