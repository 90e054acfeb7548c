//! Coordination Store: read-only client seam over the hierarchical store that
//! holds broker registrations, partition state and consumer-group offsets.

pub mod memory;
pub mod paths;

pub use memory::MemoryCoordinator;
pub use paths::ChrootPaths;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use tracing::warn;

use crate::error::CoordinationError;

/// Narrow view of a coordination-service session.
///
/// Implementations own their own deadlines; callers never wrap these calls
/// in a timeout.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Raw data stored at `path`.
    async fn get_data(&self, path: &str) -> Result<Bytes, CoordinationError>;

    /// Names (not full paths) of the direct children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;
}

// ========================================
// READ HELPERS
// ========================================

/// Children of `path`, or empty when the store cannot answer.
pub async fn children_or_empty(client: &dyn CoordinationClient, path: &str) -> Vec<String> {
    match client.children(path).await {
        Ok(children) => children,
        Err(CoordinationError::NoNode(_)) => Vec::new(),
        Err(e) => {
            warn!(path, error = %e, "cannot list children");
            Vec::new()
        }
    }
}

/// Every child of `path` together with its data, read concurrently.
///
/// A child whose data cannot be read is skipped; the rest of the listing
/// is still returned.
pub async fn children_with_data(
    client: &dyn CoordinationClient,
    path: &str,
) -> Vec<(String, Bytes)> {
    let children = children_or_empty(client, path).await;

    let reads = children.iter().map(|child| {
        let child_path = format!("{}/{}", path, child);
        async move { client.get_data(&child_path).await }
    });
    let results = join_all(reads).await;

    children
        .into_iter()
        .zip(results)
        .filter_map(|(child, result)| match result {
            Ok(data) => Some((child, data)),
            Err(e) => {
                warn!(path, child = %child, error = %e, "skipping unreadable child");
                None
            }
        })
        .collect()
}
