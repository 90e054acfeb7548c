//! Registry of the clusters this gateway knows about, keyed by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::coordination::CoordinationClient;
use crate::topology::ClusterTopology;

#[derive(Clone, Default)]
pub struct Clusters {
    clusters: BTreeMap<String, Arc<ClusterTopology>>,
}

impl Clusters {
    /// One topology per `(name, chroot)` pair, all sharing `client`.
    pub fn new(client: Arc<dyn CoordinationClient>, entries: &[(String, String)]) -> Self {
        let clusters = entries
            .iter()
            .map(|(name, chroot)| {
                let topology = ClusterTopology::new(name.clone(), chroot, Arc::clone(&client));
                (name.clone(), Arc::new(topology))
            })
            .collect();
        Self { clusters }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClusterTopology>> {
        self.clusters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.clusters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClusterTopology>> {
        self.clusters.values()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
