pub mod broker;
pub mod partition;
pub mod cluster;
pub mod clusters;

pub use broker::Broker;
pub use partition::PartitionState;
pub use cluster::ClusterTopology;
pub use clusters::Clusters;
pub mod topic_admin;

pub use topic_admin::{MemoryTopicAdmin, TopicAdmin};
