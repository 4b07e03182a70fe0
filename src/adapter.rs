use crate::error::EngineError;
use crate::messages::{BookFrame, OrderUpdate};
use crate::types::{Instrument, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Result of a market order: the venue's fill is synchronous and terminal.
#[derive(Debug, Clone)]
pub struct MarketFill {
    pub order_id: String,
    pub average_fill_price: Decimal,
    pub filled_qty: Decimal,
}

/// Uniform capability set each venue must provide (§4.1). Polymorphic over two
/// variants, maker and taker, so the Execution State Machine and Strategy
/// Coordinator are written once against this trait (§9's one-strategy point).
///
/// Adapters own no strategy state; they may batch, rate-limit, and sign
/// requests internally. All fallible operations return `EngineError` so
/// callers can match on the concrete kind named in §7's error table.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), EngineError>;

    async fn disconnect(&self) -> Result<(), EngineError>;

    async fn instrument_info(&self, symbol: &str) -> Result<Instrument, EngineError>;

    /// Delivers book frames onto `sink` until the connection drops or is
    /// cancelled. Returns when the stream ends so the Connection Supervisor
    /// can reconnect.
    async fn subscribe_book(
        &self,
        contract_id: &str,
        sink: mpsc::Sender<BookFrame>,
    ) -> Result<(), EngineError>;

    /// Delivers every status transition of the account's orders; at-least-once.
    async fn subscribe_orders(
        &self,
        sink: mpsc::Sender<OrderUpdate>,
    ) -> Result<(), EngineError>;

    /// Places a strictly post-only order; the venue rejects it if it would
    /// cross. `client_id` is echoed back on every `OrderUpdate` for this order
    /// so the executor can correlate a fill that arrives before this call
    /// returns (§5). Returns the venue-assigned order id after acknowledgement.
    async fn place_post_only(
        &self,
        side: Side,
        qty: Decimal,
        price: Decimal,
        client_id: &str,
    ) -> Result<String, EngineError>;

    /// Places a market order; the fill is synchronous and terminal.
    async fn place_market(&self, side: Side, qty: Decimal) -> Result<MarketFill, EngineError>;

    /// Idempotent: success and already-terminal are both reported as success.
    async fn cancel(&self, order_id: &str) -> Result<(), EngineError>;

    /// Authoritative signed position for `symbol`. Retryable on failure.
    async fn get_position(&self, symbol: &str) -> Result<Decimal, EngineError>;
}
