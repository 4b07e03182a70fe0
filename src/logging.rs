use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::error;

const FLUSH_INTERVAL: usize = 10;

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub exchange: String,
    pub side: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct BboRecord {
    pub maker_bid: Decimal,
    pub maker_ask: Decimal,
    pub taker_bid: Decimal,
    pub taker_ask: Decimal,
    pub long_spread: Decimal,
    pub short_spread: Decimal,
    pub long_signal: bool,
    pub short_signal: bool,
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
}

#[derive(Debug, Clone)]
pub struct SpreadStatsRecord {
    pub spread: Decimal,
    pub spread_type: &'static str,
    pub mean: Decimal,
    pub std: Decimal,
    pub count: usize,
    pub min: Decimal,
    pub max: Decimal,
}

/// One buffered, append-only CSV writer owned by a single task, per §9's
/// re-architecture point ("file handles kept open across long lifetimes ->
/// a buffered writer owned by a dedicated log task, fed by a bounded
/// channel"). Flushes every 10 writes, matching the original's cadence.
async fn open_with_header(path: &Path, header: &str) -> Result<BufWriter<File>> {
    let existed = path.exists();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .with_context(|| format!("opening log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    if !existed {
        writer.write_all(header.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(writer)
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub async fn run_trade_log(path: PathBuf, mut rx: mpsc::Receiver<TradeRecord>) {
    let header = "exchange,timestamp,side,price,quantity\n";
    let mut writer = match open_with_header(&path, header).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to open trade log");
            return;
        }
    };
    let mut count = 0usize;
    while let Some(rec) = rx.recv().await {
        let line = format!(
            "{},{},{},{},{}\n",
            csv_escape(&rec.exchange),
            Utc::now().to_rfc3339(),
            rec.side,
            rec.price,
            rec.quantity
        );
        if writer.write_all(line.as_bytes()).await.is_err() {
            error!("failed to write trade record");
            continue;
        }
        count += 1;
        if count >= FLUSH_INTERVAL {
            let _ = writer.flush().await;
            count = 0;
        }
    }
    let _ = writer.flush().await;
}

pub async fn run_bbo_log(path: PathBuf, mut rx: mpsc::Receiver<BboRecord>) {
    let header = "timestamp,maker_bid,maker_ask,taker_bid,taker_ask,long_spread,short_spread,long_signal,short_signal,long_threshold,short_threshold\n";
    let mut writer = match open_with_header(&path, header).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to open bbo log");
            return;
        }
    };
    let mut count = 0usize;
    while let Some(rec) = rx.recv().await {
        let line = format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            Utc::now().to_rfc3339(),
            rec.maker_bid,
            rec.maker_ask,
            rec.taker_bid,
            rec.taker_ask,
            rec.long_spread,
            rec.short_spread,
            rec.long_signal,
            rec.short_signal,
            rec.long_threshold,
            rec.short_threshold,
        );
        if writer.write_all(line.as_bytes()).await.is_err() {
            error!("failed to write bbo record");
            continue;
        }
        count += 1;
        if count >= FLUSH_INTERVAL {
            let _ = writer.flush().await;
            count = 0;
        }
    }
    let _ = writer.flush().await;
}

pub async fn run_spread_stats_log(path: PathBuf, mut rx: mpsc::Receiver<SpreadStatsRecord>) {
    let header = "timestamp,spread,spread_type,mean,std,count,min,max\n";
    let mut writer = match open_with_header(&path, header).await {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to open spread stats log");
            return;
        }
    };
    let mut count = 0usize;
    while let Some(rec) = rx.recv().await {
        let line = format!(
            "{},{:.2},{},{:.2},{:.2},{},{:.2},{:.2}\n",
            Utc::now().to_rfc3339(),
            rec.spread,
            rec.spread_type,
            rec.mean,
            rec.std,
            rec.count,
            rec.min,
            rec.max,
        );
        if writer.write_all(line.as_bytes()).await.is_err() {
            error!("failed to write spread stats record");
            continue;
        }
        count += 1;
        if count >= FLUSH_INTERVAL {
            let _ = writer.flush().await;
            count = 0;
        }
    }
    let _ = writer.flush().await;
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::TempDir;

    mod tempfile_shim {
        use std::path::PathBuf;

        /// Minimal scratch-directory helper so tests don't pull in the
        /// `tempfile` crate for a single use; cleans up on drop.
        pub struct TempDir(PathBuf);

        impl TempDir {
            pub fn new() -> Self {
                let dir = std::env::temp_dir().join(format!(
                    "venue-arb-engine-test-{}",
                    uuid::Uuid::new_v4()
                ));
                std::fs::create_dir_all(&dir).unwrap();
                Self(dir)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[tokio::test]
    async fn header_written_once_across_reopen() {
        let dir = TempDir::new();
        let path = dir.path().join("trades.csv");

        let (tx, rx) = mpsc::channel(4);
        tx.send(TradeRecord {
            exchange: "maker".into(),
            side: "buy".into(),
            price: "100".parse().unwrap(),
            quantity: "1".parse().unwrap(),
        })
        .await
        .unwrap();
        drop(tx);
        run_trade_log(path.clone(), rx).await;

        let (tx2, rx2) = mpsc::channel(4);
        drop(tx2);
        run_trade_log(path.clone(), rx2).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.matches("exchange,timestamp").count(), 1);
    }
}
