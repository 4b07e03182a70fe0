use super::{connect_with_timeout, text_of};
use crate::adapter::{MarketFill, VenueAdapter};
use crate::error::EngineError;
use crate::messages::{BookFrame, LevelUpdate, OrderUpdate};
use crate::types::{Instrument, OrderStatus, Side};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Speaks the taker venue's Binance-style `{e:"depthUpdate",s,b:[[p,q]],a:[[p,q]]}`
/// delta dialect at ~100 ms cadence (§6), with REST legs for market-order
/// hedging, cancellation, and position query. Behind the same `VenueAdapter`
/// trait as `MakerAdapter` so C7/C8 are written once (§9).
pub struct TakerAdapter {
    ws_url: String,
    rest_url: String,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
    connected: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct DepthUpdate {
    e: String,
    s: String,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(default)]
    b: Vec<[String; 2]>,
    #[serde(default)]
    a: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct ExecutionReport {
    order_id: String,
    client_id: String,
    status: String,
    side: String,
    price: Decimal,
    filled_size: Decimal,
    remaining_size: Decimal,
    symbol: String,
}

#[derive(Debug, Serialize)]
struct MarketOrderRequest<'a> {
    side: &'a str,
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct MarketOrderResponse {
    order_id: String,
    average_fill_price: Decimal,
    filled_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct InstrumentResponse {
    contract_id: String,
    tick_size: Decimal,
    min_order_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    position: Decimal,
}

impl TakerAdapter {
    pub fn new(ws_url: String, rest_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            ws_url,
            rest_url,
            api_key,
            api_secret,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
        }
    }

    fn side_str(side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    fn parse_decimal(raw: &str) -> Decimal {
        raw.parse().unwrap_or(Decimal::ZERO)
    }

    fn map_status(raw: &str) -> OrderStatus {
        match raw.to_ascii_uppercase().as_str() {
            "NEW" => OrderStatus::Open,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" | "EXPIRED" => OrderStatus::Canceled,
            other => {
                warn!(status = other, "unrecognized taker order status, treating as Rejected");
                OrderStatus::Rejected
            }
        }
    }
}

#[async_trait]
impl VenueAdapter for TakerAdapter {
    async fn connect(&self) -> Result<(), EngineError> {
        self.client
            .get(format!("{}/ping", self.rest_url))
            .send()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn instrument_info(&self, symbol: &str) -> Result<Instrument, EngineError> {
        let resp = self
            .client
            .get(format!("{}/exchangeInfo", self.rest_url))
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| EngineError::UnknownSymbol(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::UnknownSymbol(symbol.to_string()));
        }
        let body: InstrumentResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::UnknownSymbol(e.to_string()))?;
        Ok(Instrument {
            symbol: symbol.to_string(),
            contract_id: body.contract_id,
            tick_size: body.tick_size,
            min_order_size: body.min_order_size,
        })
    }

    async fn subscribe_book(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<BookFrame>,
    ) -> Result<(), EngineError> {
        let stream_name = format!("{}@depth@100ms", contract_id.to_ascii_lowercase());
        let url = format!("{}/stream?streams={stream_name}", self.ws_url);
        let mut stream = connect_with_timeout(&url).await?;

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return Err(EngineError::Subscription(e.to_string())),
            };
            let Some(text) = text_of(&msg) else { continue };
            let wire: DepthUpdate = match serde_json::from_str(text) {
                Ok(w) => w,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable taker depth frame");
                    continue;
                }
            };
            if wire.e != "depthUpdate" {
                continue;
            }
            let frame = BookFrame {
                venue: crate::types::Venue::Taker,
                bids: wire
                    .b
                    .iter()
                    .map(|[p, q]| LevelUpdate {
                        price: Self::parse_decimal(p),
                        size: Self::parse_decimal(q),
                    })
                    .collect(),
                asks: wire
                    .a
                    .iter()
                    .map(|[p, q]| LevelUpdate {
                        price: Self::parse_decimal(p),
                        size: Self::parse_decimal(q),
                    })
                    .collect(),
                sequence: Some(wire.final_update_id),
            };
            let _ = &wire.s;
            if sink.send(frame).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn subscribe_orders(
        &self,
        sink: mpsc::Sender<OrderUpdate>,
    ) -> Result<(), EngineError> {
        let url = format!("{}/ws/userDataStream?key={}", self.ws_url, self.api_key);
        let mut stream = connect_with_timeout(&url).await?;
        let auth = json!({ "method": "auth", "key": self.api_key, "secret": self.api_secret });
        stream
            .send(Message::Text(auth.to_string()))
            .await
            .map_err(|e| EngineError::Subscription(e.to_string()))?;

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return Err(EngineError::Subscription(e.to_string())),
            };
            let Some(text) = text_of(&msg) else { continue };
            let wire: ExecutionReport = match serde_json::from_str(text) {
                Ok(w) => w,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable taker execution report");
                    continue;
                }
            };
            let side = match wire.side.to_ascii_uppercase().as_str() {
                "BUY" => Side::Buy,
                _ => Side::Sell,
            };
            let update = OrderUpdate {
                venue_order_id: wire.order_id,
                client_id: wire.client_id,
                status: Self::map_status(&wire.status),
                side,
                price: wire.price,
                filled_size: wire.filled_size,
                remaining_size: wire.remaining_size,
                instrument: wire.symbol,
                received_at: Instant::now(),
            };
            if sink.send(update).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn place_post_only(
        &self,
        side: Side,
        qty: Decimal,
        price: Decimal,
        client_id: &str,
    ) -> Result<String, EngineError> {
        let _ = (side, qty, price, client_id);
        Err(EngineError::Rejected(
            "taker venue is not used for resting post-only orders".to_string(),
        ))
    }

    async fn place_market(&self, side: Side, qty: Decimal) -> Result<MarketFill, EngineError> {
        let req = MarketOrderRequest {
            side: Self::side_str(side),
            qty,
        };
        let resp = self
            .client
            .post(format!("{}/order", self.rest_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| EngineError::Rejected(e.to_string()))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(body));
        }
        let body: MarketOrderResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Rejected(e.to_string()))?;
        Ok(MarketFill {
            order_id: body.order_id,
            average_fill_price: body.average_fill_price,
            filled_qty: body.filled_qty,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<(), EngineError> {
        let resp = self
            .client
            .delete(format!("{}/order", self.rest_url))
            .bearer_auth(&self.api_key)
            .query(&[("orderId", order_id)])
            .send()
            .await
            .map_err(|e| EngineError::NotFound(e.to_string()))?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(EngineError::NotFound(order_id.to_string()))
        }
    }

    async fn get_position(&self, symbol: &str) -> Result<Decimal, EngineError> {
        let resp = self
            .client
            .get(format!("{}/positionRisk", self.rest_url))
            .bearer_auth(&self.api_key)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| EngineError::Query(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::Query(format!("status {}", resp.status())));
        }
        let body: PositionResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Query(e.to_string()))?;
        Ok(body.position)
    }
}
