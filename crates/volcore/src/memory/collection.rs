//! Named collection of layers owned by a context.

use crate::error::{CoreError, CoreResult};
use crate::memory::traits::Layer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The set of layers available to a context, keyed by unique name.
///
/// A layer may only be added once all of its dependencies are present, so
/// the dependency graph stays acyclic by construction.
#[derive(Default)]
pub struct LayerCollection {
    layers: BTreeMap<String, Arc<dyn Layer>>,
}

impl LayerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer.
    pub fn add_layer(&mut self, layer: Arc<dyn Layer>) -> CoreResult<()> {
        let name = layer.name().to_owned();
        if self.layers.contains_key(&name) {
            return Err(CoreError::layer(&name, "Layer already exists"));
        }
        let missing: Vec<String> = layer
            .dependencies()
            .into_iter()
            .filter(|dep| !self.layers.contains_key(dep))
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::layer(
                &name,
                format!("Layer has unmet dependencies: {}", missing.join(", ")),
            ));
        }
        debug!(layer = %name, "adding layer");
        self.layers.insert(name, layer);
        Ok(())
    }

    /// Remove and destroy a layer that nothing else depends on.
    pub fn del_layer(&mut self, name: &str) -> CoreResult<()> {
        if !self.layers.contains_key(name) {
            return Err(CoreError::LayerNotFound(name.to_owned()));
        }
        for (other, layer) in &self.layers {
            if layer.dependencies().iter().any(|dep| dep == name) {
                return Err(CoreError::layer(
                    name,
                    format!("Layer {} is depended upon by {}", name, other),
                ));
            }
        }
        if let Some(layer) = self.layers.remove(name) {
            layer.destroy();
        }
        Ok(())
    }

    /// A layer name beginning with `prefix` that is not yet taken.
    pub fn free_layer_name(&self, prefix: &str) -> String {
        let mut count = 1;
        loop {
            let candidate = format!("{}{}", prefix, count);
            if !self.layers.contains_key(&candidate) {
                return candidate;
            }
            count += 1;
        }
    }

    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn Layer>> {
        self.layers
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::LayerNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Layer>)> {
        self.layers.iter()
    }

    /// Read from the named layer.
    pub fn read(&self, layer: &str, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        self.get(layer)?.read(offset, length, pad)
    }

    /// Write to the named layer.
    pub fn write(&self, layer: &str, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.get(layer)?.write(offset, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::{BufferLayer, SegmentedLayer, Segment};

    fn base() -> Arc<dyn Layer> {
        Arc::new(BufferLayer::new("base", vec![0xAA; 0x100]))
    }

    fn remap(base: Arc<dyn Layer>) -> Arc<dyn Layer> {
        Arc::new(SegmentedLayer::new("remap", base, vec![Segment::new(0, 0x10, 0x20)]).unwrap())
    }

    #[test]
    fn test_add_and_duplicate() {
        let mut layers = LayerCollection::new();
        layers.add_layer(base()).unwrap();
        let err = layers.add_layer(base()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(layers.names(), vec!["base".to_string()]);
    }

    #[test]
    fn test_unmet_dependencies() {
        let mut layers = LayerCollection::new();
        let err = layers.add_layer(remap(base())).unwrap_err();
        assert!(err.to_string().contains("unmet dependencies"));
        assert!(layers.is_empty());
    }

    #[test]
    fn test_del_layer_respects_dependents() {
        let mut layers = LayerCollection::new();
        let b = base();
        layers.add_layer(b.clone()).unwrap();
        layers.add_layer(remap(b)).unwrap();

        assert!(layers.del_layer("base").is_err());
        layers.del_layer("remap").unwrap();
        layers.del_layer("base").unwrap();
        assert!(matches!(layers.get("base"), Err(CoreError::LayerNotFound(_))));
    }

    #[test]
    fn test_free_layer_name() {
        let mut layers = LayerCollection::new();
        assert_eq!(layers.free_layer_name("layer"), "layer1");
        layers.add_layer(Arc::new(BufferLayer::new("layer1", vec![0; 4]))).unwrap();
        assert_eq!(layers.free_layer_name("layer"), "layer2");
    }

    #[test]
    fn test_read_write_by_name() {
        let mut layers = LayerCollection::new();
        layers.add_layer(base()).unwrap();
        layers.write("base", 4, b"abcd").unwrap();
        assert_eq!(layers.read("base", 3, 6, false).unwrap(), b"\xAAabcd\xAA");
    }
}
