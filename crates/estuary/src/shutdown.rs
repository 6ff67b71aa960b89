//! Process-wide cancellation shared by the replication and sync tasks.
//!
//! Any fatal error trips the signal with a reason; both tasks observe it at
//! their suspension points and unwind. The first reason wins.

use crate::error::{Result, RiverError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::info;

/// Shared cancellation signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tripped: AtomicBool,
    reason: Mutex<Option<String>>,
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tripped: AtomicBool::new(false),
                reason: Mutex::new(None),
                tx,
            }),
        }
    }

    /// Trip the signal. Later trips keep the first reason.
    pub fn trip(&self, reason: impl Into<String>) {
        if self.inner.tripped.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        info!(%reason, "cancellation tripped");
        if let Ok(mut slot) = self.inner.reason.lock() {
            *slot = Some(reason);
        }
        let _ = self.inner.tx.send(true);
    }

    /// Check whether the signal has been tripped.
    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// Reason the signal was tripped, if it was.
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Error out if the signal has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_tripped() {
            Err(RiverError::Shutdown(
                self.reason().unwrap_or_else(|| "cancelled".to_string()),
            ))
        } else {
            Ok(())
        }
    }

    /// Wait until the signal is tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}
