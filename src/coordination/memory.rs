//! In-process coordination store.
//! Backs the standalone binary and the test suites; nodes are created
//! implicitly for every ancestor of a written path.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::CoordinationClient;
use crate::error::CoordinationError;

#[derive(Default)]
pub struct MemoryCoordinator {
    nodes: DashMap<String, Bytes>,
    unavailable: AtomicBool,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the node at `path`.
    pub fn set(&self, path: &str, data: impl Into<Bytes>) {
        self.nodes.insert(normalize(path), data.into());
    }

    /// Remove `path` and everything below it, like an expiring session
    /// dropping its ephemeral nodes.
    pub fn delete(&self, path: &str) {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        self.nodes.retain(|key, _| key != &path && !key.starts_with(&prefix));
    }

    /// Simulate losing the session: every read fails until restored.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable("session expired".to_string()));
        }
        Ok(())
    }

    fn has_descendants(&self, path: &str) -> bool {
        let prefix = child_prefix(path);
        self.nodes.iter().any(|entry| entry.key().starts_with(&prefix))
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinator {
    async fn get_data(&self, path: &str) -> Result<Bytes, CoordinationError> {
        self.check_available()?;
        let path = normalize(path);
        if let Some(data) = self.nodes.get(&path) {
            return Ok(data.value().clone());
        }
        if self.has_descendants(&path) {
            return Ok(Bytes::new());
        }
        Err(CoordinationError::NoNode(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.check_available()?;
        let path = normalize(path);
        let prefix = child_prefix(&path);

        let children: BTreeSet<String> = self
            .nodes
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.split('/').next())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .collect();

        if children.is_empty() && !self.nodes.contains_key(&path) {
            return Err(CoordinationError::NoNode(path));
        }
        Ok(children.into_iter().collect())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

fn child_prefix(path: &str) -> String {
    if path == "/" { "/".to_string() } else { format!("{}/", path) }
}
