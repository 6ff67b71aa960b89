//! The sync loop: drains the sync channel, batches document operations,
//! and checkpoints the replication position.
//!
//! Single consumer over three event sources: the sync channel, a periodic
//! flush ticker, and the cancellation signal. Requests accumulate until the
//! batch reaches `bulk_size` or the ticker fires. Positions are persisted
//! on forced markers and whenever the last save is older than the
//! staleness window, always after the preceding flush succeeded.

use crate::error::{Result, RiverError};
use crate::event::SyncMessage;
use crate::position::{Position, PositionStore};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;
use estuary_elastic::{BulkRequest, BulkResponse, BulkSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Default batch size before a flush is forced.
pub const DEFAULT_BULK_SIZE: usize = 128;
/// Default periodic flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
/// How long a non-forced position may stay unpersisted.
const POSITION_STALENESS: Duration = Duration::from_secs(3);

/// The batching consumer of the sync channel.
pub struct SyncLoop {
    rx: mpsc::Receiver<SyncMessage>,
    sink: Arc<dyn BulkSink>,
    store: Arc<dyn PositionStore>,
    shutdown: Shutdown,
    bulk_size: usize,
    flush_interval: Duration,
    retry: RetryPolicy,
}

impl SyncLoop {
    pub fn new(
        rx: mpsc::Receiver<SyncMessage>,
        sink: Arc<dyn BulkSink>,
        store: Arc<dyn PositionStore>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            rx,
            sink,
            store,
            shutdown,
            bulk_size: DEFAULT_BULK_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        if bulk_size > 0 {
            self.bulk_size = bulk_size;
        }
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.flush_interval = interval;
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run until the channel closes, the signal trips, or a fatal error.
    pub async fn run(mut self) -> Result<()> {
        // First tick after one full interval, like a wall-clock ticker.
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Vec<BulkRequest> = Vec::with_capacity(self.bulk_size.max(16));
        let mut last_saved = Instant::now();
        let mut pos: Option<Position> = None;

        loop {
            let mut flush = false;
            let mut save_pos = false;

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(SyncMessage::Requests(requests)) => {
                        pending.extend(requests);
                        flush = pending.len() >= self.bulk_size;
                    }
                    Some(SyncMessage::Position(saver)) => {
                        let now = Instant::now();
                        if saver.force || now.duration_since(last_saved) > POSITION_STALENESS {
                            last_saved = now;
                            flush = true;
                            save_pos = true;
                            pos = Some(saver.pos);
                        }
                    }
                    None => {
                        // Producer is gone; push out what is left.
                        if !pending.is_empty() {
                            if let Err(e) = self.flush(&pending, pos.as_ref()).await {
                                error!(error = %e, "final bulk flush failed");
                                self.shutdown.trip(format!("bulk flush failed: {e}"));
                                return Err(e);
                            }
                        }
                        info!("sync channel closed, sync loop exiting");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    flush = true;
                }
                _ = self.shutdown.cancelled() => {
                    return Ok(());
                }
            }

            if flush && !pending.is_empty() {
                if let Err(e) = self.flush(&pending, pos.as_ref()).await {
                    error!(
                        error = %e,
                        position = pos.as_ref().map(|p| p.to_string()),
                        "bulk flush failed, closing sync"
                    );
                    self.shutdown.trip(format!("bulk flush failed: {e}"));
                    return Err(e);
                }
                pending.clear();
            }

            if save_pos {
                if let Some(p) = &pos {
                    if let Err(e) = self.store.save(p).await {
                        error!(position = %p, error = %e, "position save failed, closing sync");
                        self.shutdown.trip(format!("position save failed: {e}"));
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Submit one batch, retrying transient failures with backoff.
    async fn flush(&self, requests: &[BulkRequest], pos: Option<&Position>) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.sink.bulk(requests).await {
                Ok(response) => {
                    log_item_errors(&response);
                    return Ok(());
                }
                Err(e) if e.is_retriable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        position = pos.map(|p| p.to_string()),
                        error = %e,
                        "bulk submit failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(RiverError::from(e)),
            }
        }
    }
}

/// Log per-document rejections. The batch itself is considered complete.
fn log_item_errors(response: &BulkResponse) {
    if !response.errors {
        return;
    }
    for item in &response.items {
        for (action, result) in item {
            if let Some(err) = result.error_text() {
                error!(
                    action = %action,
                    index = %result.index,
                    doc_type = %result.doc_type,
                    id = %result.id,
                    status = result.status,
                    error = %err,
                    "bulk item rejected"
                );
            }
        }
    }
}
