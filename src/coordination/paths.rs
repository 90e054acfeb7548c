//! Store layout of one cluster under its chroot.
//!
//! ```text
//! <chroot>/brokers/ids/<id>                                 broker registration (JSON)
//! <chroot>/brokers/topics/<topic>/partitions/<pid>/state   partition state (JSON)
//! <chroot>/consumers/<group>/ids/<member>                  ephemeral membership
//! <chroot>/consumers/<group>/offsets/<topic>/<pid>         committed offset (decimal)
//! ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootPaths {
    root: String,
}

impl ChrootPaths {
    /// `"/"`, `""` and trailing slashes all collapse so joined paths never
    /// contain `//`.
    pub fn new(chroot: &str) -> Self {
        let trimmed = chroot.trim().trim_end_matches('/');
        let root = if trimmed.is_empty() || trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self { root }
    }

    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    pub fn broker_ids(&self) -> String {
        format!("{}/brokers/ids", self.root)
    }

    pub fn broker(&self, id: &str) -> String {
        format!("{}/{}", self.broker_ids(), id)
    }

    pub fn topics(&self) -> String {
        format!("{}/brokers/topics", self.root)
    }

    pub fn partitions(&self, topic: &str) -> String {
        format!("{}/{}/partitions", self.topics(), topic)
    }

    pub fn partition_state(&self, topic: &str, partition: i32) -> String {
        format!("{}/{}/state", self.partitions(topic), partition)
    }

    pub fn consumer_groups(&self) -> String {
        format!("{}/consumers", self.root)
    }

    pub fn consumer_group_ids(&self, group: &str) -> String {
        format!("{}/{}/ids", self.consumer_groups(), group)
    }

    pub fn consumer_group_offsets(&self, group: &str) -> String {
        format!("{}/{}/offsets", self.consumer_groups(), group)
    }

    pub fn consumer_group_topic_offsets(&self, group: &str, topic: &str) -> String {
        format!("{}/{}", self.consumer_group_offsets(group), topic)
    }

    pub fn consumer_offset(&self, group: &str, topic: &str, partition: &str) -> String {
        format!("{}/{}", self.consumer_group_topic_offsets(group, topic), partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_chroot_has_no_double_slash() {
        let paths = ChrootPaths::new("/");
        assert_eq!(paths.broker_ids(), "/brokers/ids");
        assert_eq!(paths.root(), "/");
    }

    #[test]
    fn nested_chroot_paths() {
        let paths = ChrootPaths::new("kafka/trade/");
        assert_eq!(paths.root(), "/kafka/trade");
        assert_eq!(
            paths.partition_state("orders", 3),
            "/kafka/trade/brokers/topics/orders/partitions/3/state"
        );
        assert_eq!(
            paths.consumer_offset("billing", "orders", "3"),
            "/kafka/trade/consumers/billing/offsets/orders/3"
        );
    }
}
