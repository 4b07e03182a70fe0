use rust_decimal::Decimal;
use std::time::Instant;

/// Which leg of the arbitrage pair an order or position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Maker,
    Taker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// How a venue's book-update subscription delivers depth (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookMode {
    /// Each frame replaces the top-N levels; absent prices are not removed.
    Snapshot,
    /// Each frame is applied level-by-level; size=0 removes.
    Delta,
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub symbol: String,
    pub contract_id: String,
    pub tick_size: Decimal,
    pub min_order_size: Decimal,
}

/// Status set for a working order, including the two venue-reported pre-terminal
/// states the adapter must normalize into before the executor sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct WorkingOrder {
    pub venue: Venue,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub client_id: String,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub created_at: Instant,
}

impl WorkingOrder {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}
