//! Periodic CSV snapshot of every rate-limit bucket's remaining capacity,
//! ported from `original_source/.../IR_Ensemble/QA_Assistant/bucket_monitor.py`.
//! Purely operational telemetry (spec §1 "Out of scope"); only spawned when
//! `BUCKET_MONITOR_OUT` is configured.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

use crate::rate_limit::RateLimiter;

pub struct BucketMonitor {
    rate_limiter: Arc<RateLimiter>,
    csv_path: PathBuf,
    interval: Duration,
    stop: Arc<Notify>,
}

impl BucketMonitor {
    pub fn new(rate_limiter: Arc<RateLimiter>, csv_path: PathBuf) -> Self {
        Self {
            rate_limiter,
            csv_path,
            interval: Duration::from_secs(1),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Spawns the background polling task; returns a handle whose `stop()`
    /// ends the loop after its current tick.
    pub async fn start(&self) -> tokio::task::JoinHandle<()> {
        if let Some(parent) = self.csv_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let rate_limiter = Arc::clone(&self.rate_limiter);
        let csv_path = self.csv_path.clone();
        let period = self.interval;
        let stop = Arc::clone(&self.stop);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write_row(&rate_limiter, &csv_path).await {
                            tracing::warn!("bucket monitor write failed: {e}");
                        }
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

async fn write_row(rate_limiter: &RateLimiter, csv_path: &std::path::Path) -> std::io::Result<()> {
    let snapshot = rate_limiter.snapshot().await;
    let is_new = !tokio::fs::try_exists(csv_path).await.unwrap_or(false);
    let now = chrono::Utc::now().to_rfc3339();

    // `csv::Writer` only knows how to append a header/record pair to an
    // in-memory buffer; the file append itself stays on the async side so
    // this task never blocks the executor on disk I/O.
    let mut buf = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if is_new {
        let mut header = vec!["time_iso".to_string()];
        header.extend(snapshot.iter().map(|(name, _, _)| name.clone()));
        buf.write_record(&header)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    }

    let mut row = vec![now];
    row.extend(
        snapshot
            .iter()
            .map(|(_, load, capacity)| capacity.saturating_sub(*load).to_string()),
    );
    buf.write_record(&row)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let bytes = buf
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)
        .await?;
    file.write_all(&bytes).await?;
    Ok(())
}
