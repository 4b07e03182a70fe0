use crate::logging::SpreadStatsRecord;
use crate::messages::ThresholdPair;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

const RECOMPUTE_INTERVAL: Duration = Duration::from_secs(5);

pub const WINDOW_CAPACITY: usize = 100;
pub const MIN_SAMPLES_FOR_DYNAMIC: usize = 50;
/// Floor applied to every dynamic threshold, and also the minimum magnitude
/// of change the threshold engine will act on (both happen to be 0.1 in the
/// source; kept as one constant since nothing requires them to diverge).
pub const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1

#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub mean: Decimal,
    pub std: Decimal,
    pub count: usize,
    pub min: Decimal,
    pub max: Decimal,
}

/// One side's bounded FIFO of strictly-positive spread samples, capacity 100
/// (§3, §4.4). Only positive samples are ever appended — a losing sample would
/// bias the threshold downward into noise.
#[derive(Debug, Default)]
pub struct SpreadWindow {
    samples: VecDeque<Decimal>,
}

impl SpreadWindow {
    pub fn push(&mut self, spread: Decimal) {
        if spread <= Decimal::ZERO {
            return;
        }
        self.samples.push_back(spread);
        if self.samples.len() > WINDOW_CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn stats(&self) -> Option<WindowStats> {
        let count = self.samples.len();
        if count == 0 {
            return None;
        }
        let sum: Decimal = self.samples.iter().sum();
        let mean = sum / Decimal::from(count);
        let variance: Decimal = self
            .samples
            .iter()
            .map(|x| (*x - mean) * (*x - mean))
            .sum::<Decimal>()
            / Decimal::from(count);
        let std = variance.sqrt().unwrap_or(Decimal::ZERO);
        let min = *self.samples.iter().min().unwrap();
        let max = *self.samples.iter().max().unwrap();
        Some(WindowStats {
            mean,
            std,
            count,
            min,
            max,
        })
    }
}

/// Recomputes `(long_threshold, short_threshold)` on its own 5s cadence,
/// independent of the trading loop (§4.4). Suppresses updates under a 0.1
/// change so the watch channel doesn't fire on statistical noise.
pub struct ThresholdEngine {
    floor_long: Decimal,
    floor_short: Decimal,
    k: Decimal,
    current: ThresholdPair,
}

impl ThresholdEngine {
    pub fn new(floor_long: Decimal, floor_short: Decimal, k: Decimal) -> Self {
        Self {
            floor_long,
            floor_short,
            k,
            current: ThresholdPair {
                long: floor_long,
                short: floor_short,
            },
        }
    }

    pub fn current(&self) -> ThresholdPair {
        self.current
    }

    fn dynamic(floor: Decimal, k: Decimal, stats: Option<WindowStats>) -> Decimal {
        match stats {
            Some(s) if s.count >= MIN_SAMPLES_FOR_DYNAMIC => {
                floor.max(s.mean + k * s.std).max(EPSILON)
            }
            _ => floor,
        }
    }

    /// Recomputes both thresholds; returns `true` if either changed by at
    /// least 0.1 (and was therefore applied).
    pub fn recompute(&mut self, long_stats: Option<WindowStats>, short_stats: Option<WindowStats>) -> bool {
        let new_long = Self::dynamic(self.floor_long, self.k, long_stats);
        let new_short = Self::dynamic(self.floor_short, self.k, short_stats);

        let mut changed = false;
        if (new_long - self.current.long).abs() >= EPSILON {
            self.current.long = new_long;
            changed = true;
        }
        if (new_short - self.current.short).abs() >= EPSILON {
            self.current.short = new_short;
            changed = true;
        }
        if changed {
            debug!(long = %self.current.long, short = %self.current.short, "thresholds updated");
        }
        changed
    }
}

/// Owns both spread windows and the threshold engine on its own 5s cadence,
/// independent of the coordinator's sample rate (§4.4). Publishes the latest
/// pair over `threshold_tx` only when `recompute` reports a change, and
/// emits one spread-stats CSV record per side per cycle whenever that side
/// has at least one sample, regardless of whether the threshold moved.
pub async fn run_threshold_task(
    mut long_rx: mpsc::Receiver<Decimal>,
    mut short_rx: mpsc::Receiver<Decimal>,
    threshold_tx: watch::Sender<ThresholdPair>,
    spread_stats_tx: mpsc::Sender<SpreadStatsRecord>,
    mut engine: ThresholdEngine,
) {
    let mut long_window = SpreadWindow::default();
    let mut short_window = SpreadWindow::default();
    let mut ticker = tokio::time::interval(RECOMPUTE_INTERVAL);

    loop {
        tokio::select! {
            sample = long_rx.recv() => {
                match sample {
                    Some(s) => long_window.push(s),
                    None => return,
                }
            }
            sample = short_rx.recv() => {
                match sample {
                    Some(s) => short_window.push(s),
                    None => return,
                }
            }
            _ = ticker.tick() => {
                let long_stats = long_window.stats();
                let short_stats = short_window.stats();
                if engine.recompute(long_stats, short_stats) {
                    let _ = threshold_tx.send(engine.current());
                }
                if let Some(s) = long_stats {
                    let _ = spread_stats_tx
                        .send(SpreadStatsRecord {
                            spread: s.mean,
                            spread_type: "long",
                            mean: s.mean,
                            std: s.std,
                            count: s.count,
                            min: s.min,
                            max: s.max,
                        })
                        .await;
                }
                if let Some(s) = short_stats {
                    let _ = spread_stats_tx
                        .send(SpreadStatsRecord {
                            spread: s.mean,
                            spread_type: "short",
                            mean: s.mean,
                            std: s.std,
                            count: s.count,
                            min: s.min,
                            max: s.max,
                        })
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn single_sample_law() {
        let mut w = SpreadWindow::default();
        w.push(dec!(8));
        let s = w.stats().unwrap();
        assert_eq!(s.mean, dec!(8));
        assert_eq!(s.std, Decimal::ZERO);
    }

    #[test]
    fn non_positive_samples_rejected() {
        let mut w = SpreadWindow::default();
        w.push(dec!(-1));
        w.push(Decimal::ZERO);
        assert!(w.stats().is_none());
    }

    #[test]
    fn capacity_is_bounded_fifo() {
        let mut w = SpreadWindow::default();
        for i in 1..=(WINDOW_CAPACITY + 10) {
            w.push(Decimal::from(i));
        }
        assert_eq!(w.stats().unwrap().count, WINDOW_CAPACITY);
    }

    #[test]
    fn warmup_floor_below_min_samples() {
        let mut engine = ThresholdEngine::new(dec!(5), dec!(5), dec!(1.5));
        let mut w = SpreadWindow::default();
        for _ in 0..10 {
            w.push(dec!(50));
        }
        engine.recompute(w.stats(), None);
        assert_eq!(engine.current().long, dec!(5));
    }

    #[test]
    fn dynamic_threshold_once_warm() {
        let mut engine = ThresholdEngine::new(dec!(5), dec!(5), dec!(1.5));
        let mut w = SpreadWindow::default();
        for _ in 0..MIN_SAMPLES_FOR_DYNAMIC {
            w.push(dec!(8));
        }
        engine.recompute(w.stats(), None);
        // all samples equal -> std=0 -> dyn = max(5, 8, 0.1) = 8
        assert_eq!(engine.current().long, dec!(8));
    }

    #[test]
    fn small_change_suppressed() {
        let mut engine = ThresholdEngine::new(dec!(5), dec!(5), dec!(1.5));
        let mut w = SpreadWindow::default();
        for _ in 0..MIN_SAMPLES_FOR_DYNAMIC {
            w.push(dec!(8));
        }
        engine.recompute(w.stats(), None);
        let before = engine.current().long;
        w.push(dec!(8.02));
        let changed = engine.recompute(w.stats(), None);
        assert!(!changed);
        assert_eq!(engine.current().long, before);
    }
}
