pub mod config;
pub mod coordination;
pub mod error;
pub mod lag;
pub mod server;
pub mod topology;

use std::sync::Arc;

use crate::config::AdminConfig;
use crate::lag::LagComputer;
use crate::server::GatewayServer;
use crate::topology::{Clusters, TopicAdmin};

// ========================================
// ENGINE
// ========================================

/// Shared state behind every admin handler.
/// Cheap to clone (all fields are Arcs or small config).
#[derive(Clone)]
pub struct KatewayEngine {
    pub gateway: Arc<GatewayServer>,
    pub clusters: Arc<Clusters>,
    pub lag: Arc<LagComputer>,
    pub topic_admin: Arc<dyn TopicAdmin>,
    pub admin: AdminConfig,
}

impl KatewayEngine {
    pub fn new(
        gateway: Arc<GatewayServer>,
        clusters: Clusters,
        lag: LagComputer,
        topic_admin: Arc<dyn TopicAdmin>,
        admin: AdminConfig,
    ) -> Self {
        Self {
            gateway,
            clusters: Arc::new(clusters),
            lag: Arc::new(lag),
            topic_admin,
            admin,
        }
    }
}
