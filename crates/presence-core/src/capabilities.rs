//! Capability records and their store.
//!
//! A [`Capabilities`] record is content-addressed by `(node, ver)` and never
//! changes once stored. Two sessions may resolve the same key concurrently,
//! so [`CapabilitiesStore::insert`] must accept a duplicate key without
//! failing.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Key of a capability record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapsKey {
    /// Application node URI.
    pub node: String,
    /// Verification string.
    pub ver: String,
}

impl CapsKey {
    /// Create a key.
    #[must_use]
    pub fn new(node: impl Into<String>, ver: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ver: ver.into(),
        }
    }
}

impl fmt::Display for CapsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.ver)
    }
}

/// A resolved feature set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Application node URI.
    pub node: String,
    /// Verification string.
    pub ver: String,
    /// Features in discovery-response order.
    pub features: Vec<String>,
}

impl Capabilities {
    /// Create a record.
    #[must_use]
    pub fn new(node: impl Into<String>, ver: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            node: node.into(),
            ver: ver.into(),
            features,
        }
    }

    /// The record's key.
    #[must_use]
    pub fn key(&self) -> CapsKey {
        CapsKey::new(self.node.clone(), self.ver.clone())
    }

    /// Whether the feature set contains `feature`.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is not reachable.
    #[error("Capabilities store unavailable: {0}")]
    Unavailable(String),

    /// Backend failure.
    #[error("Capabilities store error: {0}")]
    Backend(String),
}

/// Persistence for capability records.
#[async_trait]
pub trait CapabilitiesStore: Send + Sync {
    /// Fetch the record for `key`, if stored.
    async fn fetch(&self, key: &CapsKey) -> Result<Option<Arc<Capabilities>>, StoreError>;

    /// Store a record. Inserting an existing key is a no-op, not an error.
    async fn insert(&self, caps: Capabilities) -> Result<(), StoreError>;
}

/// In-memory capabilities store.
///
/// The first record inserted for a key wins; later inserts for the same key
/// are dropped.
#[derive(Debug, Default)]
pub struct MemoryCapabilitiesStore {
    records: DashMap<CapsKey, Arc<Capabilities>>,
}

impl MemoryCapabilitiesStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CapabilitiesStore for MemoryCapabilitiesStore {
    async fn fetch(&self, key: &CapsKey) -> Result<Option<Arc<Capabilities>>, StoreError> {
        let found = self.records.get(key).map(|r| Arc::clone(r.value()));
        trace!(key = %key, hit = found.is_some(), "Capabilities fetch");
        Ok(found)
    }

    async fn insert(&self, caps: Capabilities) -> Result<(), StoreError> {
        let key = caps.key();
        let mut inserted = false;
        self.records.entry(key.clone()).or_insert_with(|| {
            inserted = true;
            Arc::new(caps)
        });

        if inserted {
            debug!(key = %key, "Capabilities stored");
        } else {
            debug!(key = %key, "Capabilities already stored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exodus(features: &[&str]) -> Capabilities {
        Capabilities::new(
            "http://code.google.com/p/exodus",
            "QgayPKawpkPSDYmwT/WM94uAlu0=",
            features.iter().map(|f| f.to_string()).collect(),
        )
    }

    #[test]
    fn test_caps_key_display() {
        let key = exodus(&[]).key();
        assert_eq!(
            key.to_string(),
            "http://code.google.com/p/exodus#QgayPKawpkPSDYmwT/WM94uAlu0="
        );
    }

    #[test]
    fn test_has_feature() {
        let caps = exodus(&["princely_musings+notify"]);
        assert!(caps.has_feature("princely_musings+notify"));
        assert!(!caps.has_feature("cool+feature"));
    }

    #[tokio::test]
    async fn test_fetch_miss() {
        let store = MemoryCapabilitiesStore::new();
        assert!(store.fetch(&exodus(&[]).key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_idempotent() {
        let store = MemoryCapabilitiesStore::new();

        store.insert(exodus(&["cool+feature"])).await.unwrap();
        store.insert(exodus(&["cool+feature"])).await.unwrap();

        assert_eq!(store.len(), 1);
        let caps = store.fetch(&exodus(&[]).key()).await.unwrap().unwrap();
        assert_eq!(caps.features, vec!["cool+feature"]);
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = MemoryCapabilitiesStore::new();

        store.insert(exodus(&["a"])).await.unwrap();
        store.insert(exodus(&["b"])).await.unwrap();

        let caps = store.fetch(&exodus(&[]).key()).await.unwrap().unwrap();
        assert_eq!(caps.features, vec!["a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_inserts() {
        let store = Arc::new(MemoryCapabilitiesStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert(exodus(&["cool+feature"])).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len(), 1);
    }
}
