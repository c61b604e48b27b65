//! Commit barrier between in-flight operations and batch commits.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tracing::{debug, trace};

use crate::error::{DocSetError, DocSetResult};

/// Counts outstanding operations of a unit of work.
///
/// Each query or registered task holds a [`BarrierGuard`] while it runs; a commit waits
/// until no guard is alive.
#[derive(Debug, Clone, Default)]
pub struct CommitBarrier {
    outstanding: Arc<AtomicUsize>,
}

impl CommitBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one operation as outstanding until the returned guard is dropped.
    pub fn enter(&self) -> BarrierGuard {
        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(outstanding, "operation entered barrier");

        BarrierGuard {
            outstanding: self.outstanding.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_clear(&self) -> bool {
        self.outstanding() == 0
    }

    /// Polls every `interval` until no operation is outstanding.
    ///
    /// Fails with [`DocSetError::CommitTimeout`] when the barrier is still held after
    /// `timeout`.
    pub async fn wait_clear(&self, interval: Duration, timeout: Duration) -> DocSetResult<()> {
        if self.is_clear() {
            return Ok(());
        }

        debug!(outstanding = self.outstanding(), "waiting for outstanding operations");

        let poll = async {
            while !self.is_clear() {
                tokio::time::sleep(interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| DocSetError::CommitTimeout(timeout))
    }
}

/// Releases one outstanding operation when dropped.
#[derive(Debug)]
pub struct BarrierGuard {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
