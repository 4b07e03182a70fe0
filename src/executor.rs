use crate::adapter::VenueAdapter;
use crate::alert::AlertSink;
use crate::error::EngineError;
use crate::inventory::PositionTracker;
use crate::logging::TradeRecord;
use crate::messages::{
    BookSnapshot, ExecutionCmd, ExecutionOutcome, FillEvent, OrderUpdate,
};
use crate::types::{OrderStatus, Side, Venue};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

const T_CANCEL: Duration = Duration::from_secs(5);
const FULL_CYCLE_BUDGET: Duration = Duration::from_secs(180);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub order_quantity: Decimal,
    pub max_position: Decimal,
    pub tick_size: Decimal,
}

/// Drives one trade attempt through the Execution State Machine (§4.6). The
/// coordinator only ever sends `{PlaceLong, PlaceShort, Stop}` and receives
/// `{Completed, Canceled, AlertAndIdle, Safety}` back — it never touches
/// executor internals (§9's message-passing re-architecture point).
pub struct Executor {
    cfg: ExecutorConfig,
    symbol: String,
    maker: Arc<dyn VenueAdapter>,
    taker: Arc<dyn VenueAdapter>,
    tracker: Arc<Mutex<PositionTracker>>,
    alert: Arc<dyn AlertSink>,
    maker_book_rx: watch::Receiver<BookSnapshot>,
    cmd_rx: mpsc::Receiver<ExecutionCmd>,
    outcome_tx: mpsc::Sender<ExecutionOutcome>,
    order_rx: mpsc::Receiver<OrderUpdate>,
    pending_fills: HashMap<String, OrderUpdate>,
    trade_log_tx: Option<mpsc::Sender<TradeRecord>>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ExecutorConfig,
        symbol: String,
        maker: Arc<dyn VenueAdapter>,
        taker: Arc<dyn VenueAdapter>,
        tracker: Arc<Mutex<PositionTracker>>,
        alert: Arc<dyn AlertSink>,
        maker_book_rx: watch::Receiver<BookSnapshot>,
        cmd_rx: mpsc::Receiver<ExecutionCmd>,
        outcome_tx: mpsc::Sender<ExecutionOutcome>,
        order_rx: mpsc::Receiver<OrderUpdate>,
    ) -> Self {
        Self {
            cfg,
            symbol,
            maker,
            taker,
            tracker,
            alert,
            maker_book_rx,
            cmd_rx,
            outcome_tx,
            order_rx,
            pending_fills: HashMap::new(),
            trade_log_tx: None,
        }
    }

    /// Attaches the trades CSV sink (§6); without this, fills are still
    /// applied to the position tracker but no trade record is logged.
    pub fn with_trade_log(mut self, tx: mpsc::Sender<TradeRecord>) -> Self {
        self.trade_log_tx = Some(tx);
        self
    }

    async fn log_trade(&self, exchange: &str, side: Side, price: Decimal, quantity: Decimal) {
        if let Some(tx) = &self.trade_log_tx {
            let _ = tx
                .send(TradeRecord {
                    exchange: exchange.to_string(),
                    side: match side {
                        Side::Buy => "buy".to_string(),
                        Side::Sell => "sell".to_string(),
                    },
                    price,
                    quantity,
                })
                .await;
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(ExecutionCmd::Stop) | None => break,
                        Some(ExecutionCmd::PlaceLong) => self.run_attempt(Side::Buy).await,
                        Some(ExecutionCmd::PlaceShort) => self.run_attempt(Side::Sell).await,
                    }
                }
                Some(update) = self.order_rx.recv() => {
                    // Arrived outside an active attempt (or before its ack
                    // resolved); buffer by client-id per the ordering
                    // guarantee in SPEC_FULL §5.
                    self.pending_fills.insert(update.client_id.clone(), update);
                }
            }
        }
    }

    /// Drains one attempt end-to-end within the 180s cycle budget. Always
    /// reports exactly one outcome (or none, if the budget itself expires —
    /// that case logs and silently returns to Idle, per §4.6).
    async fn run_attempt(&mut self, maker_side: Side) {
        let deadline = Instant::now() + FULL_CYCLE_BUDGET;
        match timeout(FULL_CYCLE_BUDGET, self.attempt_body(maker_side, deadline)).await {
            Ok(outcome) => {
                let _ = self.outcome_tx.send(outcome).await;
            }
            Err(_) => {
                error!("trade attempt timed out after 180s, returning to Idle");
            }
        }
    }

    async fn attempt_body(&mut self, maker_side: Side, _deadline: Instant) -> ExecutionOutcome {
        // RefreshPositions
        let snapshot = {
            let mut tracker = self.tracker.lock().await;
            match tracker.requery(&*self.maker, &*self.taker, &self.symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "position re-query failed, aborting this attempt");
                    return ExecutionOutcome::Canceled;
                }
            }
        };

        if {
            let tracker = self.tracker.lock().await;
            tracker.safety_violated(self.cfg.order_quantity)
        } {
            error!(net = %snapshot.net(), "safety invariant violated, emergency stop");
            self.alert
                .send(
                    "EMERGENCY STOP",
                    &format!("net position {} exceeds safety bound", snapshot.net()),
                    2,
                )
                .await;
            return ExecutionOutcome::Safety;
        }

        let (long_cap_hit, short_cap_hit) = {
            let tracker = self.tracker.lock().await;
            tracker.is_over_cap(self.cfg.max_position, self.cfg.max_position)
        };
        if (maker_side == Side::Buy && long_cap_hit) || (maker_side == Side::Sell && short_cap_hit) {
            info!("position cap hit, skipping this attempt");
            return ExecutionOutcome::Canceled;
        }

        // PlaceMaker
        let price = match self.maker_price(maker_side) {
            Some(p) => p,
            None => {
                info!("maker book not usable, skipping this attempt");
                return ExecutionOutcome::Canceled;
            }
        };

        let client_order_id = uuid::Uuid::new_v4().to_string();
        let placed = self
            .maker
            .place_post_only(maker_side, self.cfg.order_quantity, price, &client_order_id)
            .await;
        let venue_order_id = match placed {
            Ok(id) => id,
            Err(e) => {
                info!(error = %e, "maker order rejected, returning to Idle");
                return ExecutionOutcome::Canceled;
            }
        };

        // WaitFill
        let filled_size = self
            .wait_for_fill_or_cancel(&venue_order_id, &client_order_id, self.cfg.order_quantity)
            .await;

        if filled_size == Decimal::ZERO {
            return ExecutionOutcome::Canceled;
        }

        // HedgeTaker
        let hedge_side = maker_side.opposite();
        match self.taker.place_market(hedge_side, filled_size).await {
            Ok(fill) => {
                {
                    let mut tracker = self.tracker.lock().await;
                    tracker.apply_fill(
                        &format!("{venue_order_id}:maker"),
                        FillEvent {
                            venue: Venue::Maker,
                            side: maker_side,
                            filled_size,
                            price,
                        },
                    );
                    tracker.apply_fill(
                        &format!("{}:taker", fill.order_id),
                        FillEvent {
                            venue: Venue::Taker,
                            side: hedge_side,
                            filled_size: fill.filled_qty,
                            price: fill.average_fill_price,
                        },
                    );
                }
                self.log_trade("maker", maker_side, price, filled_size).await;
                self.log_trade("taker", hedge_side, fill.average_fill_price, fill.filled_qty)
                    .await;
                ExecutionOutcome::Completed
            }
            Err(e) => {
                error!(error = %e, "hedge leg rejected, position is imbalanced");
                self.log_trade("maker", maker_side, price, filled_size).await;
                self.alert
                    .send(
                        "HEDGE FAILED",
                        &format!("taker market order rejected after maker fill of {filled_size}: {e}"),
                        1,
                    )
                    .await;
                ExecutionOutcome::AlertAndIdle
            }
        }
    }

    /// Waits up to `T_CANCEL` for a fill; on timeout or partial fill, cancels
    /// and treats a CANCELED-with-fills response as Filled for the filled
    /// portion (§4.6, §9 open question 2). Returns the quantity to hedge.
    async fn wait_for_fill_or_cancel(
        &mut self,
        venue_order_id: &str,
        client_order_id: &str,
        quantity: Decimal,
    ) -> Decimal {
        let matches_this_order = |u: &OrderUpdate| {
            u.client_id == client_order_id || u.venue_order_id == venue_order_id
        };

        if let Some(update) = self.pending_fills.remove(client_order_id) {
            if let Some(qty) = self.terminal_filled_qty(&update) {
                return qty;
            }
        }

        let deadline = Instant::now() + T_CANCEL;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.order_rx.recv()).await {
                Ok(Some(update)) => {
                    if !matches_this_order(&update) {
                        self.pending_fills.insert(update.client_id.clone(), update);
                        continue;
                    }
                    if let Some(qty) = self.terminal_filled_qty(&update) {
                        return qty;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        // No fill (or only partial) within T_cancel: cancel and reconcile.
        match timeout(ACK_TIMEOUT, self.maker.cancel(venue_order_id)).await {
            Ok(Ok(())) => {}
            _ => warn!("cancel ack timed out or failed; treating as terminal per §7 CancelFailed"),
        }

        // Drain any update that resolves the cancel/partial-fill race.
        if let Ok(Some(update)) = timeout(ACK_TIMEOUT, self.order_rx.recv()).await {
            if matches_this_order(&update) {
                if let Some(qty) = self.terminal_filled_qty(&update) {
                    return qty;
                }
                return update.filled_size;
            }
            self.pending_fills.insert(update.client_id.clone(), update);
        }
        let _ = quantity;
        Decimal::ZERO
    }

    fn terminal_filled_qty(&self, update: &OrderUpdate) -> Option<Decimal> {
        match update.status {
            OrderStatus::Filled => Some(update.filled_size),
            // Venue reports CANCELED with filled_size>0: reclassify as
            // Filled for the filled portion (§9 open question 2).
            OrderStatus::Canceled if update.filled_size > Decimal::ZERO => Some(update.filled_size),
            OrderStatus::Canceled | OrderStatus::Rejected => Some(Decimal::ZERO),
            _ => None,
        }
    }

    /// Price determination for PlaceMaker (§4.6): `best_ask - tick` for a
    /// buy, `best_bid + tick` for a sell, rounded toward the book.
    fn maker_price(&self, side: Side) -> Option<Decimal> {
        let book = *self.maker_book_rx.borrow();
        if !book.is_ready() {
            return None;
        }
        let tick = self.cfg.tick_size;
        let raw = match side {
            Side::Buy => book.best_ask? - tick,
            Side::Sell => book.best_bid? + tick,
        };
        Some((raw / tick).round() * tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NoopAlertSink;
    use async_trait::async_trait;

    struct StubAdapter {
        place_result: Result<String, String>,
        position: Decimal,
        captured_client_id: std::sync::Arc<std::sync::Mutex<Option<String>>>,
    }

    impl StubAdapter {
        fn new(place_result: Result<String, String>, position: Decimal) -> Self {
            Self {
                place_result,
                position,
                captured_client_id: std::sync::Arc::new(std::sync::Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        async fn connect(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn instrument_info(&self, _symbol: &str) -> Result<crate::types::Instrument, EngineError> {
            unimplemented!()
        }
        async fn subscribe_book(
            &self,
            _contract_id: &str,
            _sink: mpsc::Sender<crate::messages::BookFrame>,
        ) -> Result<(), EngineError> {
            Ok(())
        }
        async fn subscribe_orders(&self, _sink: mpsc::Sender<OrderUpdate>) -> Result<(), EngineError> {
            Ok(())
        }
        async fn place_post_only(
            &self,
            _side: Side,
            _qty: Decimal,
            _price: Decimal,
            client_id: &str,
        ) -> Result<String, EngineError> {
            *self.captured_client_id.lock().unwrap() = Some(client_id.to_string());
            self.place_result.clone().map_err(EngineError::Rejected)
        }
        async fn place_market(&self, _side: Side, qty: Decimal) -> Result<crate::adapter::MarketFill, EngineError> {
            Ok(crate::adapter::MarketFill {
                order_id: "taker-1".into(),
                average_fill_price: "50015".parse().unwrap(),
                filled_qty: qty,
            })
        }
        async fn cancel(&self, _order_id: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn get_position(&self, _symbol: &str) -> Result<Decimal, EngineError> {
            Ok(self.position)
        }
    }

    fn book_ready(bid: &str, ask: &str) -> watch::Receiver<BookSnapshot> {
        let (_tx, rx) = watch::channel(BookSnapshot {
            best_bid: Some(bid.parse().unwrap()),
            best_ask: Some(ask.parse().unwrap()),
            ready: true,
            sequence: 1,
        });
        rx
    }

    fn make_executor(
        maker: StubAdapter,
        taker: StubAdapter,
    ) -> (Executor, mpsc::Sender<ExecutionCmd>, mpsc::Receiver<ExecutionOutcome>, mpsc::Sender<OrderUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (outcome_tx, outcome_rx) = mpsc::channel(4);
        let (order_tx, order_rx) = mpsc::channel(4);
        let tracker = Arc::new(Mutex::new(PositionTracker::new()));
        let executor = Executor::new(
            ExecutorConfig {
                order_quantity: "0.004".parse().unwrap(),
                max_position: "1".parse().unwrap(),
                tick_size: "1".parse().unwrap(),
            },
            "BTC".into(),
            Arc::new(maker),
            Arc::new(taker),
            tracker,
            Arc::new(NoopAlertSink),
            book_ready("50000", "50002"),
            cmd_rx,
            outcome_tx,
            order_rx,
        );
        (executor, cmd_tx, outcome_rx, order_tx)
    }

    #[tokio::test]
    async fn happy_path_full_fill_hedges_exact_qty() {
        let maker = StubAdapter::new(Ok("maker-1".into()), Decimal::ZERO);
        let captured = maker.captured_client_id.clone();
        let taker = StubAdapter::new(Ok("unused".into()), Decimal::ZERO);
        let (executor, cmd_tx, mut outcome_rx, order_tx) = make_executor(maker, taker);
        tokio::spawn(executor.run());

        cmd_tx.send(ExecutionCmd::PlaceLong).await.unwrap();
        // Simulate the order-update stream reporting a full fill shortly
        // after, before the place call would have returned. Use a
        // venue_order_id that does not match so the test actually proves
        // correlation happens on the echoed client_id, not the fallback.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let client_id = captured.lock().unwrap().clone().expect("place_post_only was called");
        order_tx
            .send(OrderUpdate {
                venue_order_id: "some-other-id".into(),
                client_id,
                status: OrderStatus::Filled,
                side: Side::Buy,
                price: "50001".parse().unwrap(),
                filled_size: "0.004".parse().unwrap(),
                remaining_size: Decimal::ZERO,
                instrument: "BTC".into(),
                received_at: Instant::now(),
            })
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), outcome_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }

    #[tokio::test]
    async fn cancel_on_timeout_no_fill_returns_canceled() {
        let maker = StubAdapter::new(Ok("maker-1".into()), Decimal::ZERO);
        let taker = StubAdapter::new(Ok("unused".into()), Decimal::ZERO);
        let (executor, cmd_tx, mut outcome_rx, _order_tx) = make_executor(maker, taker);
        tokio::spawn(executor.run());
        cmd_tx.send(ExecutionCmd::PlaceShort).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(6), outcome_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Canceled));
    }

    #[tokio::test]
    async fn rejected_maker_order_returns_canceled() {
        let maker = StubAdapter::new(Err("would cross".into()), Decimal::ZERO);
        let taker = StubAdapter::new(Ok("unused".into()), Decimal::ZERO);
        let (executor, cmd_tx, mut outcome_rx, _order_tx) = make_executor(maker, taker);
        tokio::spawn(executor.run());
        cmd_tx.send(ExecutionCmd::PlaceLong).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), outcome_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Canceled));
    }

    #[tokio::test]
    async fn safety_violation_emits_safety_outcome() {
        let maker = StubAdapter::new(Ok("maker-1".into()), "0.10".parse().unwrap());
        let taker = StubAdapter::new(Ok("unused".into()), "-0.06".parse().unwrap());
        let (executor, cmd_tx, mut outcome_rx, _order_tx) = make_executor(maker, taker);
        tokio::spawn(executor.run());
        cmd_tx.send(ExecutionCmd::PlaceLong).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), outcome_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Safety));
    }

    #[test]
    fn maker_price_buy_is_ask_minus_tick_rounded() {
        let (_tx, rx) = watch::channel(BookSnapshot {
            best_bid: Some("50000".parse().unwrap()),
            best_ask: Some("50002".parse().unwrap()),
            ready: true,
            sequence: 1,
        });
        let tracker = Arc::new(Mutex::new(PositionTracker::new()));
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (outcome_tx, _outcome_rx) = mpsc::channel(1);
        let (_order_tx, order_rx) = mpsc::channel(1);
        let executor = Executor::new(
            ExecutorConfig {
                order_quantity: dec(0.004),
                max_position: dec(1.0),
                tick_size: dec(1.0),
            },
            "BTC".into(),
            Arc::new(StubAdapter::new(Ok("x".into()), Decimal::ZERO)),
            Arc::new(StubAdapter::new(Ok("x".into()), Decimal::ZERO)),
            tracker,
            Arc::new(NoopAlertSink),
            rx,
            cmd_rx,
            outcome_tx,
            order_rx,
        );
        assert_eq!(executor.maker_price(Side::Buy), Some(dec(50001.0)));
        assert_eq!(executor.maker_price(Side::Sell), Some(dec(50001.0)));
    }

    fn dec(v: f64) -> Decimal {
        Decimal::try_from(v).unwrap()
    }
}
