use crate::adapter::VenueAdapter;
use crate::messages::{BookEvent, BookFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const SLOW_RETRY_AFTER: u32 = 5;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Owns one venue's subscribe/reconnect lifecycle. Feeds `BookEvent`s to the
/// Order Book Maintainer's channel rather than mutating book state directly,
/// so a reconnect never races the maintainer's single-writer task (§9).
///
/// Grounded in `original_source/strategy_grvt/websocket_manager.py`:
/// `_monitor_grvt_connection`'s heartbeat poll, `handle_aster_ws`'s immediate
/// reconnect loop, and `wait_for_order_books_ready`'s readiness gate.
pub struct ConnectionSupervisor<A: VenueAdapter + 'static> {
    adapter: Arc<A>,
    contract_id: String,
    label: &'static str,
    book_tx: mpsc::Sender<BookEvent>,
}

impl<A: VenueAdapter + 'static> ConnectionSupervisor<A> {
    pub fn new(
        adapter: Arc<A>,
        contract_id: String,
        label: &'static str,
        book_tx: mpsc::Sender<BookEvent>,
    ) -> Self {
        Self {
            adapter,
            contract_id,
            label,
            book_tx,
        }
    }

    /// Runs forever: connect, subscribe, stream until the subscription ends
    /// or the heartbeat goes stale, reset the book, back off, retry. Never
    /// returns under normal operation; the caller aborts the task on shutdown.
    pub async fn run(self) {
        let mut consecutive_failures: u32 = 0;

        loop {
            match tokio::time::timeout(CONNECT_TIMEOUT, self.adapter.connect()).await {
                Ok(Ok(())) => {
                    info!(venue = self.label, "connected");
                    // A successful connect clears the streak: a venue that
                    // reconnects periodically after hours of healthy
                    // streaming must not escalate into permanent slow retry.
                    consecutive_failures = 0;
                }
                Ok(Err(e)) => {
                    warn!(venue = self.label, error = %e, "connect failed");
                    self.reset_and_backoff(&mut consecutive_failures).await;
                    continue;
                }
                Err(_) => {
                    warn!(venue = self.label, "connect timed out after {CONNECT_TIMEOUT:?}");
                    self.reset_and_backoff(&mut consecutive_failures).await;
                    continue;
                }
            }

            self.stream_until_done().await;

            let _ = self.adapter.disconnect().await;
            self.reset_and_backoff(&mut consecutive_failures).await;
        }
    }

    /// Spawns the adapter's subscription onto its own task (it runs until the
    /// venue drops the connection or errors), then forwards frames into
    /// `book_tx` while independently polling a heartbeat clock. Returns once
    /// the subscription ends or the heartbeat goes stale, in which case a
    /// `BookEvent::Reset` has already been sent so the maintainer clears
    /// state before the next reconnect attempt.
    async fn stream_until_done(&self) {
        let (frame_tx, mut frame_rx) = mpsc::channel::<BookFrame>(256);
        let adapter = self.adapter.clone();
        let contract_id = self.contract_id.clone();
        let mut subscribe_handle =
            tokio::spawn(async move { adapter.subscribe_book(&contract_id, frame_tx).await });

        let mut last_frame = Instant::now();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_CHECK_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(f) => {
                            last_frame = Instant::now();
                            if let Err(e) = self.book_tx.send(BookEvent::Frame(f)).await {
                                error!(venue = self.label, error = %e, "book maintainer channel closed");
                                subscribe_handle.abort();
                                return;
                            }
                        }
                        None => {
                            warn!(venue = self.label, "subscription stream ended");
                            let _ = self.book_tx.send(BookEvent::Reset).await;
                            return;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if last_frame.elapsed() > HEARTBEAT_TIMEOUT {
                        warn!(venue = self.label, elapsed = ?last_frame.elapsed(), "heartbeat stale");
                        subscribe_handle.abort();
                        let _ = self.book_tx.send(BookEvent::Reset).await;
                        return;
                    }
                }
                result = &mut subscribe_handle => {
                    match result {
                        Ok(Err(e)) => warn!(venue = self.label, error = %e, "subscription returned error"),
                        Err(e) => warn!(venue = self.label, error = %e, "subscription task panicked"),
                        Ok(Ok(())) => {}
                    }
                    let _ = self.book_tx.send(BookEvent::Reset).await;
                    return;
                }
            }
        }
    }

    async fn reset_and_backoff(&self, consecutive_failures: &mut u32) {
        let _ = self.book_tx.send(BookEvent::Reset).await;
        *consecutive_failures += 1;
        let delay = if *consecutive_failures > SLOW_RETRY_AFTER {
            BACKOFF_CAP
        } else {
            let shift = (*consecutive_failures - 1).min(8);
            (BACKOFF_BASE * (1u32 << shift)).min(BACKOFF_CAP)
        };
        info!(venue = self.label, ?delay, failures = *consecutive_failures, "backing off before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Sends a ping frame on `KEEPALIVE_INTERVAL` cadence for venues whose wire
/// protocol requires client-initiated pings. Cancelled by aborting the
/// returned handle when the parent connection task exits (§4.3).
pub fn spawn_keepalive<A: VenueAdapter + 'static>(
    adapter: Arc<A>,
    label: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = adapter.connect().await {
                warn!(venue = label, error = %e, "keepalive ping failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::messages::OrderUpdate;
    use crate::types::{Instrument, Side};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        connect_attempts: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl VenueAdapter for FlakyAdapter {
        async fn connect(&self) -> Result<(), EngineError> {
            let n = self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(EngineError::Connection("simulated".into()))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn instrument_info(&self, symbol: &str) -> Result<Instrument, EngineError> {
            Ok(Instrument {
                symbol: symbol.to_string(),
                contract_id: symbol.to_string(),
                tick_size: Decimal::ONE,
                min_order_size: Decimal::ONE,
            })
        }

        async fn subscribe_book(
            &self,
            _contract_id: &str,
            _sink: mpsc::Sender<BookFrame>,
        ) -> Result<(), EngineError> {
            // Ends immediately so the supervisor's reconnect loop exercises
            // its backoff path deterministically in tests.
            Ok(())
        }

        async fn subscribe_orders(
            &self,
            _sink: mpsc::Sender<OrderUpdate>,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn place_post_only(
            &self,
            _side: Side,
            _qty: Decimal,
            _price: Decimal,
            _client_id: &str,
        ) -> Result<String, EngineError> {
            unimplemented!()
        }

        async fn place_market(
            &self,
            _side: Side,
            _qty: Decimal,
        ) -> Result<crate::adapter::MarketFill, EngineError> {
            unimplemented!()
        }

        async fn cancel(&self, _order_id: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn get_position(&self, _symbol: &str) -> Result<Decimal, EngineError> {
            Ok(Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn connect_failure_emits_reset_and_retries() {
        let adapter = Arc::new(FlakyAdapter {
            connect_attempts: AtomicU32::new(0),
            fail_first_n: 2,
        });
        let (book_tx, mut book_rx) = mpsc::channel(8);
        let supervisor =
            ConnectionSupervisor::new(adapter.clone(), "BTC".into(), "maker", book_tx);

        let handle = tokio::spawn(supervisor.run());

        let first = tokio::time::timeout(Duration::from_millis(500), book_rx.recv())
            .await
            .expect("first reset within timeout");
        assert!(matches!(first, Some(BookEvent::Reset)));

        handle.abort();
    }

    #[tokio::test]
    async fn empty_subscription_return_emits_reset() {
        let adapter = Arc::new(FlakyAdapter {
            connect_attempts: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let (book_tx, mut book_rx) = mpsc::channel(8);
        let supervisor =
            ConnectionSupervisor::new(adapter.clone(), "BTC".into(), "maker", book_tx);

        let handle = tokio::spawn(supervisor.run());

        let first = tokio::time::timeout(Duration::from_millis(500), book_rx.recv())
            .await
            .expect("reset within timeout");
        assert!(matches!(first, Some(BookEvent::Reset)));

        handle.abort();
    }

    #[tokio::test]
    async fn keepalive_pings_on_interval_and_stops_on_abort() {
        let adapter = Arc::new(FlakyAdapter {
            connect_attempts: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let handle = spawn_keepalive(adapter.clone(), "maker");
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        let _ = handle.await;
    }
}
