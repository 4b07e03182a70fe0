use crate::alert::AlertSink;
use crate::inventory::PositionTracker;
use crate::logging::BboRecord;
use crate::messages::{BookSnapshot, ExecutionCmd, ExecutionOutcome, ThresholdPair};
use crate::stats::SpreadWindow;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

const NOT_READY_SLEEP: Duration = Duration::from_millis(500);
const NO_SIGNAL_SLEEP: Duration = Duration::from_millis(50);
const COOLDOWN_DEFAULT: Duration = Duration::from_secs(2);

/// Why `Coordinator::run` returned, so the caller can pick an exit code
/// (§6, scenario 4: a safety-stop must exit 1, not the 0 of a clean shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// The executor or the coordinator's own cached check hit the safety bound.
    SafetyStop,
    /// A channel to the executor closed, meaning it exited first.
    ExecutorGone,
}

pub struct CoordinatorConfig {
    pub order_quantity: Decimal,
    pub cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            order_quantity: Decimal::ZERO,
            cooldown: COOLDOWN_DEFAULT,
        }
    }
}

/// Top-level loop (§4.7): samples both BBOs, feeds spreads into the rolling
/// windows, reads thresholds, evaluates the signal, and delegates to the
/// Execution State Machine over channels — never touching executor state
/// directly (§9's message-passing re-architecture point).
pub struct Coordinator {
    cfg: CoordinatorConfig,
    maker_book_rx: watch::Receiver<BookSnapshot>,
    taker_book_rx: watch::Receiver<BookSnapshot>,
    threshold_rx: watch::Receiver<ThresholdPair>,
    tracker: Arc<Mutex<PositionTracker>>,
    alert: Arc<dyn AlertSink>,
    cmd_tx: mpsc::Sender<ExecutionCmd>,
    outcome_rx: mpsc::Receiver<ExecutionOutcome>,
    long_window_tx: mpsc::Sender<Decimal>,
    short_window_tx: mpsc::Sender<Decimal>,
    bbo_log_tx: mpsc::Sender<BboRecord>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: CoordinatorConfig,
        maker_book_rx: watch::Receiver<BookSnapshot>,
        taker_book_rx: watch::Receiver<BookSnapshot>,
        threshold_rx: watch::Receiver<ThresholdPair>,
        tracker: Arc<Mutex<PositionTracker>>,
        alert: Arc<dyn AlertSink>,
        cmd_tx: mpsc::Sender<ExecutionCmd>,
        outcome_rx: mpsc::Receiver<ExecutionOutcome>,
        long_window_tx: mpsc::Sender<Decimal>,
        short_window_tx: mpsc::Sender<Decimal>,
        bbo_log_tx: mpsc::Sender<BboRecord>,
    ) -> Self {
        Self {
            cfg,
            maker_book_rx,
            taker_book_rx,
            threshold_rx,
            tracker,
            alert,
            cmd_tx,
            outcome_rx,
            long_window_tx,
            short_window_tx,
            bbo_log_tx,
        }
    }

    pub async fn run(mut self) -> CoordinatorExit {
        loop {
            let maker = *self.maker_book_rx.borrow();
            let taker = *self.taker_book_rx.borrow();

            if !maker.is_ready() || !taker.is_ready() {
                tokio::time::sleep(NOT_READY_SLEEP).await;
                continue;
            }

            let (maker_bid, maker_ask) = (maker.best_bid.unwrap(), maker.best_ask.unwrap());
            let (taker_bid, taker_ask) = (taker.best_bid.unwrap(), taker.best_ask.unwrap());

            let long_spread = taker_bid - maker_bid;
            let short_spread = maker_ask - taker_ask;

            if long_spread > Decimal::ZERO {
                let _ = self.long_window_tx.send(long_spread).await;
            }
            if short_spread > Decimal::ZERO {
                let _ = self.short_window_tx.send(short_spread).await;
            }

            let thresholds = *self.threshold_rx.borrow();

            // At most one may be true: the two spreads move opposite to each
            // other on realistic book shapes, and the coordinator itself
            // enforces single-flight (P5, P7's mutual-exclusion boundary case).
            let long_signal = long_spread > thresholds.long;
            let short_signal = short_spread > thresholds.short;

            let _ = self
                .bbo_log_tx
                .send(BboRecord {
                    maker_bid,
                    maker_ask,
                    taker_bid,
                    taker_ask,
                    long_spread,
                    short_spread,
                    long_signal,
                    short_signal,
                    long_threshold: thresholds.long,
                    short_threshold: thresholds.short,
                })
                .await;

            if !long_signal && !short_signal {
                tokio::time::sleep(NO_SIGNAL_SLEEP).await;
                continue;
            }

            if self.safety_violated().await {
                error_and_alert_safety(&self.alert, &self.tracker).await;
                return CoordinatorExit::SafetyStop;
            }

            let cmd = if long_signal {
                ExecutionCmd::PlaceLong
            } else {
                ExecutionCmd::PlaceShort
            };
            if self.cmd_tx.send(cmd).await.is_err() {
                warn!("executor command channel closed, stopping coordinator");
                return CoordinatorExit::ExecutorGone;
            }

            match self.outcome_rx.recv().await {
                Some(ExecutionOutcome::Safety) => {
                    error_and_alert_safety(&self.alert, &self.tracker).await;
                    return CoordinatorExit::SafetyStop;
                }
                Some(ExecutionOutcome::AlertAndIdle) => {
                    info!("hedge leg failed, alert raised, continuing to next iteration");
                }
                Some(ExecutionOutcome::Completed) => info!("trade attempt completed"),
                Some(ExecutionOutcome::Canceled) => info!("trade attempt canceled, no fill"),
                None => {
                    warn!("executor outcome channel closed, stopping coordinator");
                    return CoordinatorExit::ExecutorGone;
                }
            }

            tokio::time::sleep(self.cfg.cooldown).await;
        }
    }

    async fn safety_violated(&self) -> bool {
        let tracker = self.tracker.lock().await;
        tracker.safety_violated(self.cfg.order_quantity)
    }
}

async fn error_and_alert_safety(alert: &Arc<dyn AlertSink>, tracker: &Arc<Mutex<PositionTracker>>) {
    let net = tracker.lock().await.snapshot().net();
    error_log_safety(net);
    alert
        .send(
            "EMERGENCY STOP",
            &format!("net position {net} exceeds safety bound, coordinator exiting"),
            2,
        )
        .await;
}

fn error_log_safety(net: Decimal) {
    tracing::error!(%net, "safety invariant violated at coordinator level, emergency stop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NoopAlertSink;
    use rust_decimal_macros::dec;

    fn ready_book(bid: &str, ask: &str) -> watch::Receiver<BookSnapshot> {
        let (_tx, rx) = watch::channel(BookSnapshot {
            best_bid: Some(bid.parse().unwrap()),
            best_ask: Some(ask.parse().unwrap()),
            ready: true,
            sequence: 1,
        });
        rx
    }

    fn not_ready_book() -> watch::Receiver<BookSnapshot> {
        let (_tx, rx) = watch::channel(BookSnapshot::default());
        rx
    }

    fn make_coordinator(
        maker_rx: watch::Receiver<BookSnapshot>,
        taker_rx: watch::Receiver<BookSnapshot>,
        thresholds: ThresholdPair,
    ) -> (
        Coordinator,
        mpsc::Receiver<ExecutionCmd>,
        mpsc::Sender<ExecutionOutcome>,
        mpsc::Receiver<Decimal>,
        mpsc::Receiver<Decimal>,
        mpsc::Receiver<BboRecord>,
    ) {
        let (threshold_tx, threshold_rx) = watch::channel(thresholds);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (outcome_tx, outcome_rx) = mpsc::channel(4);
        let (long_tx, long_rx) = mpsc::channel(16);
        let (short_tx, short_rx) = mpsc::channel(16);
        let (bbo_tx, bbo_rx) = mpsc::channel(16);
        let tracker = Arc::new(Mutex::new(PositionTracker::new()));
        drop(threshold_tx);

        let coordinator = Coordinator::new(
            CoordinatorConfig {
                order_quantity: dec!(0.004),
                cooldown: Duration::from_millis(1),
            },
            maker_rx,
            taker_rx,
            threshold_rx,
            tracker,
            Arc::new(NoopAlertSink),
            cmd_tx,
            outcome_rx,
            long_tx,
            short_tx,
            bbo_tx,
        );
        (coordinator, cmd_rx, outcome_tx, long_rx, short_rx, bbo_rx)
    }

    #[tokio::test]
    async fn not_ready_book_suppresses_signal() {
        let (coordinator, mut cmd_rx, _outcome_tx, _long_rx, _short_rx, _bbo_rx) =
            make_coordinator(not_ready_book(), ready_book("50015", "50017"), ThresholdPair { long: dec!(5), short: dec!(5) });
        tokio::spawn(coordinator.run());

        let result = tokio::time::timeout(Duration::from_millis(100), cmd_rx.recv()).await;
        assert!(result.is_err(), "no command should be issued while a book is not ready");
    }

    #[tokio::test]
    async fn happy_long_signal_fires_place_long() {
        let (coordinator, mut cmd_rx, outcome_tx, _long_rx, _short_rx, mut bbo_rx) = make_coordinator(
            ready_book("50000", "50002"),
            ready_book("50015", "50017"),
            ThresholdPair { long: dec!(11), short: dec!(5) },
        );
        tokio::spawn(coordinator.run());

        let cmd = tokio::time::timeout(Duration::from_millis(200), cmd_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(cmd, ExecutionCmd::PlaceLong));
        outcome_tx.send(ExecutionOutcome::Completed).await.unwrap();

        let rec = tokio::time::timeout(Duration::from_millis(200), bbo_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(rec.long_signal);
        assert!(!rec.short_signal);
    }

    #[tokio::test]
    async fn equal_spread_to_threshold_does_not_fire() {
        let (coordinator, mut cmd_rx, _outcome_tx, _long_rx, _short_rx, _bbo_rx) = make_coordinator(
            ready_book("50000", "50002"),
            ready_book("50015", "50017"),
            ThresholdPair { long: dec!(15), short: dec!(5) },
        );
        tokio::spawn(coordinator.run());

        let result = tokio::time::timeout(Duration::from_millis(100), cmd_rx.recv()).await;
        assert!(result.is_err(), "strictly-equal spread must not fire (strict >)");
    }
}
