use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use venue_arb_engine::alert::{AlertSink, NoopAlertSink, PushAlertSink};
use venue_arb_engine::config::{load_env_file, CliArgs, EngineSettings};
use venue_arb_engine::coordinator::{Coordinator, CoordinatorConfig, CoordinatorExit};
use venue_arb_engine::executor::{Executor, ExecutorConfig};
use venue_arb_engine::inventory::PositionTracker;
use venue_arb_engine::logging::{
    init_tracing, run_bbo_log, run_spread_stats_log, run_trade_log, BboRecord, SpreadStatsRecord,
    TradeRecord,
};
use venue_arb_engine::messages::{BookEvent, ExecutionCmd, ExecutionOutcome, OrderUpdate, ThresholdPair};
use venue_arb_engine::orderbook::OrderBookMaintainer;
use venue_arb_engine::remote_config::RemoteConfigClient;
use venue_arb_engine::stats::{run_threshold_task, ThresholdEngine};
use venue_arb_engine::supervisor::ConnectionSupervisor;
use venue_arb_engine::types::BookMode;
use venue_arb_engine::venues::maker::MakerAdapter;
use venue_arb_engine::venues::taker::TakerAdapter;

const ORDER_UPDATE_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Exit codes documented in §7: 0 graceful, 1 config/safety-stop, 2 unrecoverable loss.
const EXIT_CONFIG_OR_SAFETY: i32 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    load_env_file(args.env_file.as_ref());
    init_tracing();

    let settings = match EngineSettings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "fatal: configuration error at startup");
            std::process::exit(EXIT_CONFIG_OR_SAFETY);
        }
    };

    let remote = RemoteConfigClient::new(
        settings.remote_config_url.clone(),
        settings.remote_config_api_key.clone(),
    );
    let master = remote
        .get_master(&args.config_key)
        .await
        .context("fetching master config row")?;
    if !master.enabled {
        info!(config_key = %args.config_key, "config row disabled, exiting cleanly");
        return Ok(());
    }
    let detail = remote
        .get_detail(&args.config_key, &args.symbol)
        .await
        .context("fetching detail config row")?;

    let cooldown = master
        .cooldown_secs
        .map(Duration::from_secs)
        .unwrap_or(settings.cooldown);

    let maker = Arc::new(MakerAdapter::new(
        settings.maker_ws_url.clone(),
        settings.maker_rest_url.clone(),
        settings.maker_api_token.clone(),
    ));
    let taker = Arc::new(TakerAdapter::new(
        settings.taker_ws_url.clone(),
        settings.taker_rest_url.clone(),
        settings.taker_api_key.clone(),
        settings.taker_api_secret.clone(),
    ));

    let maker_instrument = maker
        .instrument_info(&args.symbol)
        .await
        .context("fetching maker instrument info")?;
    let taker_instrument = taker
        .instrument_info(&args.symbol)
        .await
        .context("fetching taker instrument info")?;

    let alert: Arc<dyn AlertSink> = match (&settings.alert_user_key, &settings.alert_api_token) {
        (Some(u), Some(t)) => Arc::new(PushAlertSink::new(
            settings.alert_endpoint.clone(),
            Some(u.clone()),
            Some(t.clone()),
        )),
        _ => {
            warn!("alert credentials not configured, running with a noop alert sink");
            Arc::new(NoopAlertSink)
        }
    };

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Order books: one Connection Supervisor + Order Book Maintainer pair per venue.
    let (maker_book_tx, maker_book_rx_ev) = mpsc::channel::<BookEvent>(256);
    let (maker_maintainer, maker_snapshot_rx) =
        OrderBookMaintainer::new(BookMode::Snapshot, "maker", maker_book_rx_ev);
    tasks.push(tokio::spawn(maker_maintainer.run()));

    let maker_supervisor = ConnectionSupervisor::new(
        maker.clone(),
        maker_instrument.contract_id.clone(),
        "maker",
        maker_book_tx,
    );
    tasks.push(tokio::spawn(maker_supervisor.run()));

    let (taker_book_tx, taker_book_rx_ev) = mpsc::channel::<BookEvent>(256);
    let (taker_maintainer, taker_snapshot_rx) =
        OrderBookMaintainer::new(BookMode::Delta, "taker", taker_book_rx_ev);
    tasks.push(tokio::spawn(taker_maintainer.run()));

    let taker_supervisor = ConnectionSupervisor::new(
        taker.clone(),
        taker_instrument.contract_id.clone(),
        "taker",
        taker_book_tx,
    );
    tasks.push(tokio::spawn(taker_supervisor.run()));

    // Maker order-update stream: reconnect loop in the teacher's style, since
    // the Connection Supervisor above only manages the book stream (§4.3
    // scopes it to depth; order-update delivery has no heartbeat/backoff
    // requirement of its own, just resubscribe-on-drop).
    let (order_tx, order_rx) = mpsc::channel::<OrderUpdate>(256);
    {
        let maker = maker.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    return;
                }
                if let Err(e) = maker.subscribe_orders(order_tx.clone()).await {
                    warn!(error = %e, "maker order-update stream ended, reconnecting");
                }
                tokio::time::sleep(ORDER_UPDATE_RECONNECT_DELAY).await;
            }
        }));
    }

    // Trade/BBO/spread-stats CSV logs, buffered single-writer tasks under logs/.
    let (trade_log_tx, trade_log_rx) = mpsc::channel::<TradeRecord>(64);
    tasks.push(tokio::spawn(run_trade_log(
        PathBuf::from("logs/trades.csv"),
        trade_log_rx,
    )));
    let (bbo_log_tx, bbo_log_rx) = mpsc::channel::<BboRecord>(256);
    tasks.push(tokio::spawn(run_bbo_log(
        PathBuf::from("logs/bbo.csv"),
        bbo_log_rx,
    )));
    let (spread_stats_tx, spread_stats_rx) = mpsc::channel::<SpreadStatsRecord>(64);
    tasks.push(tokio::spawn(run_spread_stats_log(
        PathBuf::from("logs/spread_stats.csv"),
        spread_stats_rx,
    )));

    // Threshold engine: recomputes on its own 5s cadence from the coordinator's
    // positive-spread samples.
    let (long_window_tx, long_window_rx) = mpsc::channel::<Decimal>(256);
    let (short_window_tx, short_window_rx) = mpsc::channel::<Decimal>(256);
    let (threshold_tx, threshold_rx) = watch::channel(ThresholdPair {
        long: detail.long_threshold_floor,
        short: detail.short_threshold_floor,
    });
    let threshold_engine = ThresholdEngine::new(
        detail.long_threshold_floor,
        detail.short_threshold_floor,
        detail.z_score_multiplier,
    );
    tasks.push(tokio::spawn(run_threshold_task(
        long_window_rx,
        short_window_rx,
        threshold_tx,
        spread_stats_tx,
        threshold_engine,
    )));

    let tracker = Arc::new(Mutex::new(PositionTracker::new()));

    let (cmd_tx, cmd_rx) = mpsc::channel::<ExecutionCmd>(4);
    let (outcome_tx, outcome_rx) = mpsc::channel::<ExecutionOutcome>(4);

    let executor = Executor::new(
        ExecutorConfig {
            order_quantity: detail.order_quantity,
            max_position: detail.max_position,
            tick_size: maker_instrument.tick_size,
        },
        args.symbol.clone(),
        maker.clone(),
        taker.clone(),
        tracker.clone(),
        alert.clone(),
        maker_snapshot_rx.clone(),
        cmd_rx,
        outcome_tx,
        order_rx,
    )
    .with_trade_log(trade_log_tx);
    tasks.push(tokio::spawn(executor.run()));

    let coordinator = Coordinator::new(
        CoordinatorConfig {
            order_quantity: detail.order_quantity,
            cooldown,
        },
        maker_snapshot_rx,
        taker_snapshot_rx,
        threshold_rx,
        tracker,
        alert,
        cmd_tx,
        outcome_rx,
        long_window_tx,
        short_window_tx,
        bbo_log_tx,
    );
    let coordinator_handle = tokio::spawn(coordinator.run());

    let mut exit_code = 0;
    tokio::select! {
        result = coordinator_handle => {
            match result {
                Ok(CoordinatorExit::SafetyStop) => {
                    error!("coordinator exited on a safety stop");
                    exit_code = EXIT_CONFIG_OR_SAFETY;
                }
                Ok(CoordinatorExit::ExecutorGone) => {
                    warn!("coordinator exited because the executor's channel closed");
                }
                Err(e) => {
                    error!(error = %e, "coordinator task panicked");
                    exit_code = EXIT_CONFIG_OR_SAFETY;
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    shutdown.cancel();
    for task in tasks {
        task.abort();
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
