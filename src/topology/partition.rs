//! Partition state, decoded from
//! `<chroot>/brokers/topics/<topic>/partitions/<pid>/state`.

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    #[serde(skip)]
    pub topic: String,
    #[serde(skip)]
    pub partition: i32,
    pub leader: i32,
    /// Ascending and duplicate-free after `decode`.
    pub isr: Vec<i32>,
    #[serde(default)]
    pub leader_epoch: i32,
    #[serde(default)]
    pub controller_epoch: i32,
}

impl PartitionState {
    pub fn decode(topic: &str, partition: i32, data: &[u8]) -> Result<Self, CoordinationError> {
        let mut state: PartitionState =
            serde_json::from_slice(data).map_err(|e| CoordinationError::InvalidData {
                path: format!("brokers/topics/{}/partitions/{}/state", topic, partition),
                reason: e.to_string(),
            })?;
        state.topic = topic.to_string();
        state.partition = partition;
        state.isr.sort_unstable();
        state.isr.dedup();
        Ok(state)
    }
}
