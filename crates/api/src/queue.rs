//! FIFO liquidation queue seam and an in-process implementation.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::candidates::CandidateFeed;

/// External FIFO of borrower identifiers plus named counters.
#[async_trait]
pub trait LiquidationQueue: Send + Sync {
    /// Remove and return up to `n` identifiers, oldest first.
    async fn pop(&self, n: usize) -> Result<Vec<String>>;

    /// Add `n` to a named counter.
    async fn increment_by(&self, key: &str, n: u64) -> Result<()>;
}

/// Queue held in memory. Used when the feed is pushed from inside the process.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    items: Mutex<VecDeque<String>>,
    counters: DashMap<String, u64>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, identifier: impl Into<String>) {
        self.items.lock().push_back(identifier.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&self, identifiers: I) {
        self.items.lock().extend(identifiers);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[async_trait]
impl LiquidationQueue for InMemoryQueue {
    async fn pop(&self, n: usize) -> Result<Vec<String>> {
        let mut items = self.items.lock();
        let take = n.min(items.len());
        Ok(items.drain(..take).collect())
    }

    async fn increment_by(&self, key: &str, n: u64) -> Result<()> {
        *self.counters.entry(key.to_string()).or_insert(0) += n;
        Ok(())
    }
}

/// Adapts a [`LiquidationQueue`] to a [`CandidateFeed`].
#[derive(Clone)]
pub struct QueueCandidateFeed {
    queue: Arc<dyn LiquidationQueue>,
}

impl QueueCandidateFeed {
    pub fn new(queue: Arc<dyn LiquidationQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<dyn LiquidationQueue> {
        &self.queue
    }
}

#[async_trait]
impl CandidateFeed for QueueCandidateFeed {
    async fn next_targets(&self, limit: usize) -> Result<Vec<String>> {
        self.queue.pop(limit).await
    }

    fn feed_name(&self) -> &str {
        "queue"
    }
}
