//! Cluster Topology: stateless facade over one cluster's chroot.
//!
//! Nothing is cached; every call reads the store again. Store failures
//! degrade to empty results and a log line, never to an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::coordination::{children_or_empty, children_with_data, ChrootPaths, CoordinationClient};
use crate::error::CoordinationError;
use crate::topology::broker::{compare_ids, Broker};
use crate::topology::partition::PartitionState;

pub struct ClusterTopology {
    name: String,
    paths: ChrootPaths,
    client: Arc<dyn CoordinationClient>,
}

impl ClusterTopology {
    pub fn new(name: impl Into<String>, chroot: &str, client: Arc<dyn CoordinationClient>) -> Self {
        Self {
            name: name.into(),
            paths: ChrootPaths::new(chroot),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chroot(&self) -> &str {
        self.paths.root()
    }

    pub fn paths(&self) -> &ChrootPaths {
        &self.paths
    }

    pub fn client(&self) -> &dyn CoordinationClient {
        self.client.as_ref()
    }

    // ========================================
    // BROKERS
    // ========================================

    /// `{brokerId: Broker}` for every registration that decodes.
    pub async fn brokers(&self) -> BTreeMap<String, Broker> {
        let mut brokers = BTreeMap::new();
        for (id, data) in children_with_data(self.client(), &self.paths.broker_ids()).await {
            match Broker::decode(&id, &data) {
                Ok(broker) => {
                    brokers.insert(id, broker);
                }
                Err(e) => warn!(cluster = %self.name, broker = %id, error = %e, "skipping malformed broker"),
            }
        }
        brokers
    }

    pub async fn broker(&self, id: &str) -> Option<Broker> {
        let data = self.read(&self.paths.broker(id)).await?;
        match Broker::decode(id, &data) {
            Ok(broker) => Some(broker),
            Err(e) => {
                warn!(cluster = %self.name, broker = %id, error = %e, "malformed broker");
                None
            }
        }
    }

    /// `host:port` of every live broker, ordered by broker id.
    pub async fn broker_list(&self) -> Vec<String> {
        let mut brokers: Vec<Broker> = self.brokers().await.into_values().collect();
        brokers.sort_by(|a, b| compare_ids(&a.id, &b.id));
        brokers.iter().map(Broker::addr).collect()
    }

    // ========================================
    // TOPICS & PARTITIONS
    // ========================================

    pub async fn topics(&self) -> Vec<String> {
        let mut topics = children_or_empty(self.client(), &self.paths.topics()).await;
        topics.sort();
        topics
    }

    /// Ascending partition ids of `topic`. Non-numeric children are ignored.
    pub async fn partitions(&self, topic: &str) -> Vec<i32> {
        let mut partitions: Vec<i32> = children_or_empty(self.client(), &self.paths.partitions(topic))
            .await
            .into_iter()
            .filter_map(|pid| match pid.parse() {
                Ok(pid) => Some(pid),
                Err(_) => {
                    warn!(cluster = %self.name, topic, partition = %pid, "non-numeric partition id");
                    None
                }
            })
            .collect();
        partitions.sort_unstable();
        partitions
    }

    pub async fn partition_state(&self, topic: &str, partition: i32) -> Option<PartitionState> {
        let data = self.read(&self.paths.partition_state(topic, partition)).await?;
        match PartitionState::decode(topic, partition, &data) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(cluster = %self.name, topic, partition, error = %e, "malformed partition state");
                None
            }
        }
    }

    /// In-sync replicas of one partition, ascending. Empty when the state
    /// is missing or malformed.
    pub async fn isr(&self, topic: &str, partition: i32) -> Vec<i32> {
        self.partition_state(topic, partition)
            .await
            .map(|state| state.isr)
            .unwrap_or_default()
    }

    // ========================================
    // CONSUMER GROUPS
    // ========================================

    /// `{groupName: online}`; membership of all groups is probed concurrently.
    pub async fn consumer_groups(&self) -> BTreeMap<String, bool> {
        let groups = children_or_empty(self.client(), &self.paths.consumer_groups()).await;
        let probes = groups.iter().map(|group| self.consumer_group_online(group));
        let online = join_all(probes).await;
        groups.into_iter().zip(online).collect()
    }

    /// A group is online while at least one ephemeral member record exists.
    pub async fn consumer_group_online(&self, group: &str) -> bool {
        !children_or_empty(self.client(), &self.paths.consumer_group_ids(group))
            .await
            .is_empty()
    }

    // ========================================
    // HELPERS
    // ========================================

    async fn read(&self, path: &str) -> Option<bytes::Bytes> {
        match self.client.get_data(path).await {
            Ok(data) => Some(data),
            Err(CoordinationError::NoNode(_)) => {
                debug!(cluster = %self.name, path, "node not found");
                None
            }
            Err(e) => {
                warn!(cluster = %self.name, path, error = %e, "topology unavailable");
                None
            }
        }
    }
}
