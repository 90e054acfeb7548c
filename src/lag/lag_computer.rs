//! Lag Computer: joins committed consumer offsets from the coordination
//! store with live produced offsets.
//!
//! Failure policy is fail-fast: the first offset query that fails stops
//! the scan of that cluster and the records gathered so far are returned.
//! Corrupt committed offsets only drop their own partition.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::coordination::{children_or_empty, children_with_data};
use crate::error::OffsetFetchError;
use crate::lag::offsets::{OffsetFetcher, OffsetFetcherFactory};
use crate::topology::ClusterTopology;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LagRecord {
    pub group: String,
    pub online: bool,
    pub topic: String,
    pub partition: i32,
    pub consumer_offset: i64,
    pub producer_offset: i64,
    /// Signed: negative after a reassignment or compaction.
    pub lag: i64,
}

impl LagRecord {
    pub fn new(
        group: &str,
        online: bool,
        topic: &str,
        partition: i32,
        consumer_offset: i64,
        producer_offset: i64,
    ) -> Self {
        Self {
            group: group.to_string(),
            online,
            topic: topic.to_string(),
            partition,
            consumer_offset,
            producer_offset,
            lag: producer_offset.wrapping_sub(consumer_offset),
        }
    }
}

/// Outcome of one cluster scan.
#[derive(Debug, Default)]
pub struct LagScan {
    pub by_group: BTreeMap<String, Vec<LagRecord>>,
    /// Set when the scan stopped early on an offset query failure.
    pub aborted: Option<OffsetFetchError>,
}

impl LagScan {
    fn push(&mut self, record: LagRecord) {
        self.by_group.entry(record.group.clone()).or_default().push(record);
    }
}

pub struct LagComputer {
    offsets: Arc<dyn OffsetFetcherFactory>,
}

impl LagComputer {
    pub fn new(offsets: Arc<dyn OffsetFetcherFactory>) -> Self {
        Self { offsets }
    }

    /// `{group: [LagRecord]}` for `cluster`.
    pub async fn consumers_by_group(&self, cluster: &ClusterTopology) -> BTreeMap<String, Vec<LagRecord>> {
        self.scan(cluster).await.by_group
    }

    pub async fn scan(&self, cluster: &ClusterTopology) -> LagScan {
        let mut scan = LagScan::default();

        let brokers = cluster.broker_list().await;
        if brokers.is_empty() {
            debug!(cluster = cluster.name(), "no live brokers, skipping lag scan");
            return scan;
        }

        let fetcher = match self.offsets.connect(&brokers).await {
            Ok(fetcher) => fetcher,
            Err(e) => {
                error!(cluster = cluster.name(), error = %e, "cannot open offset client");
                return scan;
            }
        };

        for (group, online) in cluster.consumer_groups().await {
            let offsets_path = cluster.paths().consumer_group_offsets(&group);
            let mut topics = children_or_empty(cluster.client(), &offsets_path).await;
            topics.sort();

            for topic in topics {
                let committed = committed_offsets(cluster, &group, &topic).await;
                let produced = probe_partitions(fetcher.as_ref(), &topic, &committed).await;

                for ((partition, consumer_offset), produced) in committed.into_iter().zip(produced) {
                    match produced {
                        Ok(producer_offset) => scan.push(LagRecord::new(
                            &group,
                            online,
                            &topic,
                            partition,
                            consumer_offset,
                            producer_offset,
                        )),
                        Err(e) => {
                            error!(
                                cluster = cluster.name(),
                                group = %group,
                                topic = %topic,
                                partition,
                                error = %e,
                                "offset query failed, aborting lag scan"
                            );
                            scan.aborted = Some(e);
                            return scan;
                        }
                    }
                }
            }
        }

        scan
    }
}

/// `(partition, committed offset)` ascending by partition. Corrupt entries
/// are logged and dropped individually.
async fn committed_offsets(cluster: &ClusterTopology, group: &str, topic: &str) -> Vec<(i32, i64)> {
    let path = cluster.paths().consumer_group_topic_offsets(group, topic);
    let mut committed: Vec<(i32, i64)> = children_with_data(cluster.client(), &path)
        .await
        .into_iter()
        .filter_map(|(pid, data)| {
            let partition = match pid.parse::<i32>() {
                Ok(partition) => partition,
                Err(_) => {
                    warn!(cluster = cluster.name(), group, topic, partition = %pid, "corrupt partition id");
                    return None;
                }
            };
            match parse_offset(&data) {
                Some(offset) => Some((partition, offset)),
                None => {
                    warn!(cluster = cluster.name(), group, topic, partition, "corrupt committed offset");
                    None
                }
            }
        })
        .collect();
    committed.sort_unstable_by_key(|(partition, _)| *partition);
    committed
}

/// One concurrent probe per partition, joined before returning.
async fn probe_partitions(
    fetcher: &dyn OffsetFetcher,
    topic: &str,
    committed: &[(i32, i64)],
) -> Vec<Result<i64, OffsetFetchError>> {
    let probes = committed
        .iter()
        .map(|(partition, _)| fetcher.latest_offset(topic, *partition));
    join_all(probes).await
}

fn parse_offset(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_is_producer_minus_consumer() {
        let record = LagRecord::new("g", true, "t", 0, 100, 130);
        assert_eq!(record.lag, 30);
    }

    #[test]
    fn negative_lag_is_not_clamped() {
        let record = LagRecord::new("g", false, "t", 0, 100, 90);
        assert_eq!(record.lag, -10);
    }

    #[test]
    fn parse_offset_accepts_decimal_only() {
        assert_eq!(parse_offset(b"42"), Some(42));
        assert_eq!(parse_offset(b" 7\n"), Some(7));
        assert_eq!(parse_offset(b"-1"), Some(-1));
        assert_eq!(parse_offset(b"0x10"), None);
        assert_eq!(parse_offset(b""), None);
    }
}
