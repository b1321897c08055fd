//! Shared, mutable set of layer specifications.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use stratum_core::{Layer, Stratumfile};

/// Layer specifications keyed by layer name.
///
/// Clones share the same map, so a change made through one handle is seen
/// by the build cache on its next lookup.
#[derive(Debug, Clone, Default)]
pub struct LayerSpecs {
    inner: Arc<RwLock<BTreeMap<String, Layer>>>,
}

impl LayerSpecs {
    pub fn new(layers: BTreeMap<String, Layer>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(layers)),
        }
    }

    pub fn from_stratumfile(file: &Stratumfile) -> Self {
        Self::new(file.layers.clone())
    }

    /// Snapshot of one layer's current specification.
    pub fn get(&self, name: &str) -> Option<Layer> {
        self.inner.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn insert(&self, name: &str, layer: Layer) {
        self.inner.write().insert(name.to_string(), layer);
    }

    /// Modify a layer in place. Returns false if `name` is unknown.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut Layer)) -> bool {
        match self.inner.write().get_mut(name) {
            Some(layer) => {
                f(layer);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_updates() {
        let specs = LayerSpecs::default();
        specs.insert("foo", Layer::default());

        let other = specs.clone();
        assert!(other.update("foo", |l| l.run = vec!["jmh".to_string()]));
        assert_eq!(specs.get("foo").unwrap().run, vec!["jmh".to_string()]);
    }

    #[test]
    fn test_update_unknown() {
        let specs = LayerSpecs::default();
        assert!(!specs.update("missing", |_| {}));
        assert!(specs.get("missing").is_none());
        assert!(!specs.contains("missing"));
    }

    #[test]
    fn test_names_sorted() {
        let specs = LayerSpecs::default();
        specs.insert("b", Layer::default());
        specs.insert("a", Layer::default());
        assert_eq!(specs.names(), vec!["a", "b"]);
    }
}
