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

/// Speaks the maker venue's `{bids:[{price,size}],asks:[{price,size}]}`
/// snapshot dialect over a raw WebSocket, and a plain REST API for order
/// placement/cancellation/position query (§4.1, §6). REST auth uses a single
/// bearer token; no HMAC signing scheme is modeled (out of scope per §1).
pub struct MakerAdapter {
    ws_url: String,
    rest_url: String,
    api_token: String,
    client: reqwest::Client,
    connected: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireBookFrame {
    bids: Vec<WireLevel>,
    asks: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
struct WireOrderUpdate {
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
struct PlaceOrderRequest<'a> {
    side: &'a str,
    qty: Decimal,
    price: Decimal,
    post_only: bool,
    client_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    order_id: String,
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

impl MakerAdapter {
    pub fn new(ws_url: String, rest_url: String, api_token: String) -> Self {
        Self {
            ws_url,
            rest_url,
            api_token,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
        }
    }

    fn side_str(side: Side) -> &'static str {
        match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    fn map_status(raw: &str) -> OrderStatus {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => OrderStatus::Pending,
            "OPEN" => OrderStatus::Open,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
            other => {
                warn!(status = other, "unrecognized maker order status, treating as Rejected");
                OrderStatus::Rejected
            }
        }
    }
}

#[async_trait]
impl VenueAdapter for MakerAdapter {
    async fn connect(&self) -> Result<(), EngineError> {
        self.client
            .get(format!("{}/health", self.rest_url))
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
            .get(format!("{}/instruments/{symbol}", self.rest_url))
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
        let mut stream = connect_with_timeout(&self.ws_url).await?;
        let subscribe = json!({ "type": "subscribe", "channel": "book", "contract_id": contract_id });
        stream
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| EngineError::Subscription(e.to_string()))?;

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return Err(EngineError::Subscription(e.to_string())),
            };
            let Some(text) = text_of(&msg) else { continue };
            let wire: WireBookFrame = match serde_json::from_str(text) {
                Ok(w) => w,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable maker book frame");
                    continue;
                }
            };
            let frame = BookFrame {
                venue: crate::types::Venue::Maker,
                bids: wire
                    .bids
                    .into_iter()
                    .map(|l| LevelUpdate {
                        price: l.price,
                        size: l.size,
                    })
                    .collect(),
                asks: wire
                    .asks
                    .into_iter()
                    .map(|l| LevelUpdate {
                        price: l.price,
                        size: l.size,
                    })
                    .collect(),
                sequence: None,
            };
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
        let mut stream = connect_with_timeout(&self.ws_url).await?;
        let subscribe = json!({ "type": "subscribe", "channel": "orders", "token": self.api_token });
        stream
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| EngineError::Subscription(e.to_string()))?;

        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => return Err(EngineError::Subscription(e.to_string())),
            };
            let Some(text) = text_of(&msg) else { continue };
            let wire: WireOrderUpdate = match serde_json::from_str(text) {
                Ok(w) => w,
                Err(e) => {
                    debug!(error = %e, "skipping unparseable maker order update");
                    continue;
                }
            };
            let side = match wire.side.to_ascii_lowercase().as_str() {
                "buy" => Side::Buy,
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
        let req = PlaceOrderRequest {
            side: Self::side_str(side),
            qty,
            price,
            post_only: true,
            client_id,
        };
        let resp = self
            .client
            .post(format!("{}/orders", self.rest_url))
            .bearer_auth(&self.api_token)
            .json(&req)
            .send()
            .await
            .map_err(|e| EngineError::Rejected(e.to_string()))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(body));
        }
        let body: PlaceOrderResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Rejected(e.to_string()))?;
        Ok(body.order_id)
    }

    async fn place_market(&self, side: Side, qty: Decimal) -> Result<MarketFill, EngineError> {
        // The maker venue is never used for the taker leg in this engine, but
        // the trait must still be total: a post-only-only venue rejects it.
        let _ = (side, qty);
        Err(EngineError::Rejected(
            "maker venue does not accept market orders".to_string(),
        ))
    }

    async fn cancel(&self, order_id: &str) -> Result<(), EngineError> {
        let resp = self
            .client
            .delete(format!("{}/orders/{order_id}", self.rest_url))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EngineError::NotFound(e.to_string()))?;
        // Idempotent: already-terminal orders are reported as success too.
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(EngineError::NotFound(order_id.to_string()))
        }
    }

    async fn get_position(&self, symbol: &str) -> Result<Decimal, EngineError> {
        let resp = self
            .client
            .get(format!("{}/positions/{symbol}", self.rest_url))
            .bearer_auth(&self.api_token)
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
