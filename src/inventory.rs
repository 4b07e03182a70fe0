use crate::adapter::VenueAdapter;
use crate::error::EngineError;
use crate::messages::{FillEvent, InventorySnapshot};
use crate::types::{Side, Venue};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::warn;

const REQUERY_TIMEOUT: Duration = Duration::from_secs(3);
const DEDUP_TTL: Duration = Duration::from_secs(900);
const EPSILON_POS: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001

/// Authoritative per-venue inventory (§4.5, §3). Fill deltas are applied
/// exactly once per fill (dedup by a synthetic key supplied by the caller);
/// re-queries overwrite the local value and log any discrepancy beyond
/// `EPSILON_POS`.
pub struct PositionTracker {
    maker_position: Decimal,
    taker_position: Decimal,
    seen_fills: HashMap<String, Instant>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            maker_position: Decimal::ZERO,
            taker_position: Decimal::ZERO,
            seen_fills: HashMap::new(),
        }
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            maker_position: self.maker_position,
            taker_position: self.taker_position,
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        self.seen_fills
            .retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_TTL);
    }

    /// Applies a confirmed fill delta exactly once, keyed by `dedup_key`
    /// (venue_order_id + fill sequence, per §4.5).
    pub fn apply_fill(&mut self, dedup_key: &str, fill: FillEvent) {
        let now = Instant::now();
        self.evict_expired(now);
        if self.seen_fills.contains_key(dedup_key) {
            return;
        }
        self.seen_fills.insert(dedup_key.to_string(), now);

        let signed = match fill.side {
            Side::Buy => fill.filled_size,
            Side::Sell => -fill.filled_size,
        };
        match fill.venue {
            Venue::Maker => self.maker_position += signed,
            Venue::Taker => self.taker_position += signed,
        }
    }

    /// Authoritative re-query against both adapters before a trade attempt.
    /// Retries once with a 3s timeout each; on a second failure the trade
    /// attempt is aborted (the engine keeps running) — resolves the Open
    /// Question in favor of the documented §7 policy over the original's
    /// silent zero-default.
    pub async fn requery(
        &mut self,
        maker: &dyn VenueAdapter,
        taker: &dyn VenueAdapter,
        symbol: &str,
    ) -> Result<InventorySnapshot, EngineError> {
        let maker_pos = Self::requery_one(maker, symbol).await?;
        let taker_pos = Self::requery_one(taker, symbol).await?;

        if (maker_pos - self.maker_position).abs() > EPSILON_POS {
            warn!(
                cached = %self.maker_position,
                authoritative = %maker_pos,
                "maker position discrepancy on re-query"
            );
        }
        if (taker_pos - self.taker_position).abs() > EPSILON_POS {
            warn!(
                cached = %self.taker_position,
                authoritative = %taker_pos,
                "taker position discrepancy on re-query"
            );
        }

        self.maker_position = maker_pos;
        self.taker_position = taker_pos;
        Ok(self.snapshot())
    }

    async fn requery_one(adapter: &dyn VenueAdapter, symbol: &str) -> Result<Decimal, EngineError> {
        match timeout(REQUERY_TIMEOUT, adapter.get_position(symbol)).await {
            Ok(Ok(pos)) => Ok(pos),
            Ok(Err(_)) | Err(_) => {
                // one retry
                match timeout(REQUERY_TIMEOUT, adapter.get_position(symbol)).await {
                    Ok(Ok(pos)) => Ok(pos),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(EngineError::Query("position query timed out twice".into())),
                }
            }
        }
    }

    pub fn is_over_cap(&self, long_cap: Decimal, short_cap: Decimal) -> (bool, bool) {
        (
            self.maker_position >= long_cap,
            self.maker_position <= -short_cap,
        )
    }

    pub fn safety_violated(&self, order_qty: Decimal) -> bool {
        self.snapshot().net().abs() > Decimal::TWO * order_qty
    }
}
