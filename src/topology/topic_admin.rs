//! Topic creation collaborator.
//!
//! Implementations report the tool output line by line; a line containing
//! `Created topic` marks success.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::coordination::MemoryCoordinator;
use crate::error::TopicAdminError;
use crate::topology::broker::compare_ids;
use crate::topology::ClusterTopology;

#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn add_topic(
        &self,
        cluster: &ClusterTopology,
        topic: &str,
        replicas: i32,
        partitions: i32,
    ) -> Result<Vec<String>, TopicAdminError>;
}

/// Kafka topic name for an application topic.
pub fn kafka_topic(appid: &str, topic: &str, ver: &str) -> String {
    format!("{}.{}.{}", appid, topic, ver)
}

/// Writes partition-state nodes straight into a `MemoryCoordinator`,
/// placing replicas round-robin over the live brokers.
pub struct MemoryTopicAdmin {
    store: Arc<MemoryCoordinator>,
}

impl MemoryTopicAdmin {
    pub fn new(store: Arc<MemoryCoordinator>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TopicAdmin for MemoryTopicAdmin {
    async fn add_topic(
        &self,
        cluster: &ClusterTopology,
        topic: &str,
        replicas: i32,
        partitions: i32,
    ) -> Result<Vec<String>, TopicAdminError> {
        if partitions <= 0 || replicas <= 0 {
            return Err(TopicAdminError::Rejected(format!(
                "partitions ({}) and replicas ({}) must be positive",
                partitions, replicas
            )));
        }

        if cluster.topics().await.iter().any(|t| t == topic) {
            return Ok(vec![format!(
                "Error while executing topic command : Topic \"{}\" already exists.",
                topic
            )]);
        }

        let mut brokers: Vec<String> = cluster.brokers().await.into_keys().collect();
        brokers.sort_by(|a, b| compare_ids(a, b));
        let ids: Vec<i32> = brokers.iter().filter_map(|id| id.parse().ok()).collect();
        if ids.len() < replicas as usize {
            return Err(TopicAdminError::Rejected(format!(
                "replication factor: {} larger than available brokers: {}",
                replicas,
                ids.len()
            )));
        }

        let paths = cluster.paths();
        let replicas = replicas as usize;
        for partition in 0..partitions {
            let assigned: Vec<i32> = (0..replicas)
                .map(|r| ids[(partition as usize + r) % ids.len()])
                .collect();
            let state = json!({
                "controller_epoch": 1,
                "leader": assigned[0],
                "version": 1,
                "leader_epoch": 0,
                "isr": assigned,
            });
            self.store
                .set(&paths.partition_state(topic, partition), state.to_string());
        }

        info!(cluster = cluster.name(), topic, partitions, replicas, "topic created");
        Ok(vec![format!("Created topic \"{}\".", topic)])
    }
}
