//! Attribute registry: stable integer handles for attribute paths
//!
//! Producers address timeline slots through hierarchical paths such as
//! `["CPUs", "0", "Status"]`. Interval records only carry a fixed-width
//! [`AttributeId`], so the registry interns each path once and hands out
//! dense ids in registration order. The backends never see path strings.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use histree_core::AttributeId;

/// Interns attribute paths and hands out dense [`AttributeId`]s.
///
/// Ids start at zero and are allocated in registration order, so they double
/// as indexes into id-dense tables such as full-state vectors.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    paths: Vec<Vec<String>>,
    index: FxHashMap<Vec<String>, AttributeId>,
}

impl AttributeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id for `path`, registering it if unseen.
    pub fn open(&self, path: &[&str]) -> AttributeId {
        let key: Vec<String> = path.iter().map(|s| (*s).to_string()).collect();
        if let Some(&id) = self.inner.read().index.get(&key) {
            return id;
        }

        let mut inner = self.inner.write();
        // Another writer may have registered it between the locks.
        if let Some(&id) = inner.index.get(&key) {
            return id;
        }
        let id = AttributeId::new(inner.paths.len() as u32);
        inner.paths.push(key.clone());
        inner.index.insert(key, id);
        debug!(
            target: "histree::engine",
            id = %id,
            path = ?inner.paths[id.as_index()],
            "Registered attribute"
        );
        id
    }

    /// Look up the path registered for `id`.
    pub fn path(&self, id: AttributeId) -> Option<Vec<String>> {
        self.inner.read().paths.get(id.as_index()).cloned()
    }

    /// Whether `id` has been registered.
    pub fn contains(&self, id: AttributeId) -> bool {
        id.as_index() < self.inner.read().paths.len()
    }

    /// Ids whose path matches `pattern`, in id order.
    ///
    /// A `"*"` segment matches exactly one path segment; the pattern must
    /// have the same number of segments as the path.
    pub fn matching(&self, pattern: &[&str]) -> Vec<AttributeId> {
        let inner = self.inner.read();
        inner
            .paths
            .iter()
            .enumerate()
            .filter(|(_, path)| {
                path.len() == pattern.len()
                    && path
                        .iter()
                        .zip(pattern)
                        .all(|(seg, pat)| *pat == "*" || seg == pat)
            })
            .map(|(i, _)| AttributeId::new(i as u32))
            .collect()
    }

    /// Number of registered attributes.
    pub fn len(&self) -> usize {
        self.inner.read().paths.len()
    }

    /// Whether no attribute has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
