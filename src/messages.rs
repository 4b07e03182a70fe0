use crate::types::{OrderStatus, Side, Venue};
use rust_decimal::Decimal;
use std::time::Instant;

/// A single normalized price level update, independent of wire dialect.
#[derive(Debug, Clone)]
pub struct LevelUpdate {
    pub price: Decimal,
    pub size: Decimal,
}

/// A depth frame as delivered by a Connection Supervisor to the Order Book
/// Maintainer. `mode` is carried per-frame only for assertions in tests; the
/// authoritative mode is the adapter's static configuration (§9 open question 1).
#[derive(Debug, Clone)]
pub struct BookFrame {
    pub venue: Venue,
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
    pub sequence: Option<u64>,
}

/// What a Connection Supervisor sends to the Order Book Maintainer: either a
/// normal frame, or an explicit reset when the supervisor declares the
/// stream stale/gapped/disconnected (§4.3) — the book is cleared and the
/// ready flag dropped before the supervisor resubscribes.
#[derive(Debug, Clone)]
pub enum BookEvent {
    Frame(BookFrame),
    Reset,
}

/// Latest-value snapshot of one venue's book, republished over a watch channel
/// by the Order Book Maintainer on every applied frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookSnapshot {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub ready: bool,
    pub sequence: u64,
}

impl BookSnapshot {
    pub fn is_ready(&self) -> bool {
        self.ready && self.best_bid.is_some() && self.best_ask.is_some()
    }
}

/// Normalized order-update event, as the adapter presents it regardless of
/// venue-specific wire schema (§6).
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub venue_order_id: String,
    pub client_id: String,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Decimal,
    pub filled_size: Decimal,
    pub remaining_size: Decimal,
    pub instrument: String,
    pub received_at: Instant,
}

/// Confirmed fill, delivered to the Position Tracker. Distinct from `OrderUpdate`
/// so C6 only ever sees facts that change position, never intermediate acks.
#[derive(Debug, Clone, Copy)]
pub struct FillEvent {
    pub venue: Venue,
    pub side: Side,
    pub filled_size: Decimal,
    pub price: Decimal,
}

/// Commands the Strategy Coordinator sends to the Execution State Machine.
/// The coordinator never touches executor internals directly (§9).
#[derive(Debug, Clone, Copy)]
pub enum ExecutionCmd {
    PlaceLong,
    PlaceShort,
    Stop,
}

/// Outcomes the executor reports back. `Safety` is the terminal EmergencyStop
/// report; `AlertAndIdle` is the loud, non-retried taker-reject outcome (§4.6).
#[derive(Debug, Clone, Copy)]
pub enum ExecutionOutcome {
    Completed,
    Canceled,
    AlertAndIdle,
    Safety,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdPair {
    pub long: Decimal,
    pub short: Decimal,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InventorySnapshot {
    pub maker_position: Decimal,
    pub taker_position: Decimal,
}

impl InventorySnapshot {
    pub fn net(&self) -> Decimal {
        self.maker_position + self.taker_position
    }
}
