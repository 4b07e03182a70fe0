use crate::messages::{BookEvent, BookFrame, BookSnapshot};
use crate::types::BookMode;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Single writer of a venue's order book. Applies frames from `frame_rx` and
/// republishes an immutable `(best_bid, best_ask, ready, sequence)` snapshot
/// over `snapshot_tx` after each frame, so readers (coordinator, CSV logger)
/// never block the writer and never need full-book access on the hot path.
///
/// Grounded in `original_source/strategy_grvt/order_book_manager.py`: snapshot
/// mode keeps levels not present in a frame, delta mode removes on size=0.
pub struct OrderBookMaintainer {
    mode: BookMode,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    ready: bool,
    sequence: u64,
    last_sequence: Option<u64>,
    frame_rx: mpsc::Receiver<BookEvent>,
    snapshot_tx: watch::Sender<BookSnapshot>,
    label: &'static str,
}

impl OrderBookMaintainer {
    pub fn new(
        mode: BookMode,
        label: &'static str,
        frame_rx: mpsc::Receiver<BookEvent>,
    ) -> (Self, watch::Receiver<BookSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(BookSnapshot::default());
        (
            Self {
                mode,
                bids: BTreeMap::new(),
                asks: BTreeMap::new(),
                ready: false,
                sequence: 0,
                last_sequence: None,
                frame_rx,
                snapshot_tx,
                label,
            },
            snapshot_rx,
        )
    }

    pub async fn run(mut self) {
        while let Some(event) = self.frame_rx.recv().await {
            match event {
                BookEvent::Frame(frame) => self.apply(frame),
                BookEvent::Reset => self.invalidate(),
            }
        }
    }

    fn apply(&mut self, frame: BookFrame) {
        if let Some(seq) = frame.sequence {
            if let Some(last) = self.last_sequence {
                if seq != last + 1 {
                    warn!(venue = self.label, last, seq, "sequence gap detected");
                    self.invalidate();
                }
            }
            self.last_sequence = Some(seq);
        }

        // Snapshot and delta frames apply identically at the level-update
        // granularity (size>0 sets, size=0 removes); they differ in what the
        // adapter guarantees about frame completeness, not in how a frame is
        // folded into the map. `self.mode` is retained for future divergence
        // and for the sequence-gap check above, which only applies to delta.
        for lvl in &frame.bids {
            Self::apply_level(&mut self.bids, lvl.price, lvl.size);
        }
        for lvl in &frame.asks {
            Self::apply_level(&mut self.asks, lvl.price, lvl.size);
        }

        self.sequence += 1;
        let best_bid = self.bids.keys().next_back().copied();
        let best_ask = self.asks.keys().next().copied();

        if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
            if bid >= ask {
                warn!(venue = self.label, %bid, %ask, "book inconsistent, clearing ready flag");
                self.ready = false;
                let _ = self.snapshot_tx.send(BookSnapshot {
                    best_bid: Some(bid),
                    best_ask: Some(ask),
                    ready: false,
                    sequence: self.sequence,
                });
                return;
            }
        }

        let was_ready = self.ready;
        if best_bid.is_some() && best_ask.is_some() {
            self.ready = true;
        }
        if self.ready && !was_ready {
            info!(venue = self.label, ?best_bid, ?best_ask, "order book ready");
        } else {
            debug!(venue = self.label, ?best_bid, ?best_ask, "order book updated");
        }

        let _ = self.snapshot_tx.send(BookSnapshot {
            best_bid,
            best_ask,
            ready: self.ready,
            sequence: self.sequence,
        });
    }

    fn apply_level(side: &mut BTreeMap<Decimal, Decimal>, price: Decimal, size: Decimal) {
        if size > Decimal::ZERO {
            side.insert(price, size);
        } else {
            side.remove(&price);
        }
    }

    /// Clears the book and drops the ready flag; called on stream gap/reconnect
    /// by the Connection Supervisor via the sequence check above, and directly
    /// when the supervisor detects a stale heartbeat.
    pub fn invalidate(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.ready = false;
        self.last_sequence = None;
        let _ = self.snapshot_tx.send(BookSnapshot {
            best_bid: None,
            best_ask: None,
            ready: false,
            sequence: self.sequence,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::LevelUpdate;
    use crate::types::Venue;

    fn lvl(price: &str, size: &str) -> LevelUpdate {
        LevelUpdate {
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
        }
    }

    fn frame(bids: Vec<LevelUpdate>, asks: Vec<LevelUpdate>) -> BookEvent {
        BookEvent::Frame(BookFrame {
            venue: Venue::Maker,
            bids,
            asks,
            sequence: None,
        })
    }

    #[tokio::test]
    async fn ready_flips_on_first_two_sided_frame() {
        let (tx, rx) = mpsc::channel(8);
        let (maintainer, mut snap_rx) = OrderBookMaintainer::new(BookMode::Delta, "maker", rx);
        tokio::spawn(maintainer.run());

        tx.send(frame(vec![lvl("100", "1")], vec![])).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert!(!snap_rx.borrow().is_ready());

        tx.send(frame(vec![], vec![lvl("101", "1")])).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert!(snap_rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn zero_size_delta_removes_level() {
        let (tx, rx) = mpsc::channel(8);
        let (maintainer, mut snap_rx) = OrderBookMaintainer::new(BookMode::Delta, "maker", rx);
        tokio::spawn(maintainer.run());

        tx.send(frame(vec![lvl("100", "1")], vec![lvl("101", "1")]))
            .await
            .unwrap();
        snap_rx.changed().await.unwrap();
        assert_eq!(snap_rx.borrow().best_bid, Some("100".parse().unwrap()));

        tx.send(frame(vec![lvl("100", "0")], vec![])).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert_eq!(snap_rx.borrow().best_bid, None);
    }

    #[tokio::test]
    async fn crossed_book_clears_ready() {
        let (tx, rx) = mpsc::channel(8);
        let (maintainer, mut snap_rx) = OrderBookMaintainer::new(BookMode::Delta, "maker", rx);
        tokio::spawn(maintainer.run());

        tx.send(frame(vec![lvl("100", "1")], vec![lvl("101", "1")]))
            .await
            .unwrap();
        snap_rx.changed().await.unwrap();
        assert!(snap_rx.borrow().is_ready());

        tx.send(frame(vec![lvl("102", "1")], vec![])).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert!(!snap_rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn zero_size_delta_on_absent_price_is_noop() {
        let (tx, rx) = mpsc::channel(8);
        let (maintainer, mut snap_rx) = OrderBookMaintainer::new(BookMode::Delta, "maker", rx);
        tokio::spawn(maintainer.run());

        tx.send(frame(vec![lvl("100", "0")], vec![])).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert_eq!(snap_rx.borrow().best_bid, None);
        assert!(!snap_rx.borrow().is_ready());
    }

    #[tokio::test]
    async fn reset_event_clears_book_and_ready_flag() {
        let (tx, rx) = mpsc::channel(8);
        let (maintainer, mut snap_rx) = OrderBookMaintainer::new(BookMode::Delta, "maker", rx);
        tokio::spawn(maintainer.run());

        tx.send(frame(vec![lvl("100", "1")], vec![lvl("101", "1")]))
            .await
            .unwrap();
        snap_rx.changed().await.unwrap();
        assert!(snap_rx.borrow().is_ready());

        tx.send(BookEvent::Reset).await.unwrap();
        snap_rx.changed().await.unwrap();
        assert!(!snap_rx.borrow().is_ready());
        assert_eq!(snap_rx.borrow().best_bid, None);
    }
}
