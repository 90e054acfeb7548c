//! Offset collaborators: the only seam between topology code and the
//! message-queue client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::OffsetFetchError;

/// Latest produced offset of a topic-partition.
#[async_trait]
pub trait OffsetFetcher: Send + Sync {
    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64, OffsetFetchError>;
}

/// Opens an `OffsetFetcher` against a cluster's broker list.
#[async_trait]
pub trait OffsetFetcherFactory: Send + Sync {
    async fn connect(&self, brokers: &[String]) -> Result<Arc<dyn OffsetFetcher>, OffsetFetchError>;
}

// ========================================
// IN-PROCESS OFFSETS
// ========================================

/// Produced offsets held in memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryOffsets {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    offsets: DashMap<(String, i32), i64>,
    failing: DashSet<(String, i32)>,
    connections: AtomicUsize,
}

impl MemoryOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offset(&self, topic: &str, partition: i32, offset: i64) {
        self.inner.offsets.insert((topic.to_string(), partition), offset);
    }

    /// Make every query for this partition fail.
    pub fn fail_partition(&self, topic: &str, partition: i32) {
        self.inner.failing.insert((topic.to_string(), partition));
    }

    /// Number of successful `connect` calls so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffsetFetcher for MemoryOffsets {
    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64, OffsetFetchError> {
        let key = (topic.to_string(), partition);
        if self.inner.failing.contains(&key) {
            return Err(OffsetFetchError::Fetch {
                topic: topic.to_string(),
                partition,
                reason: "partition unavailable".to_string(),
            });
        }
        self.inner
            .offsets
            .get(&key)
            .map(|offset| *offset.value())
            .ok_or_else(|| OffsetFetchError::Fetch {
                topic: topic.to_string(),
                partition,
                reason: "unknown topic or partition".to_string(),
            })
    }
}

#[async_trait]
impl OffsetFetcherFactory for MemoryOffsets {
    async fn connect(&self, brokers: &[String]) -> Result<Arc<dyn OffsetFetcher>, OffsetFetchError> {
        if brokers.is_empty() {
            return Err(OffsetFetchError::Connect {
                brokers: Vec::new(),
                reason: "empty broker list".to_string(),
            });
        }
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}
