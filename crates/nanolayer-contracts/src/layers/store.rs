use anyhow::{bail, Result};
use indexmap::IndexMap;

use super::layer::{Layer, LayerType};

/// Generated layers keyed by id, most recent first.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    layers: IndexMap<String, Layer>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// Resolves `id` only if it names an ORIGINAL layer.
    pub fn original(&self, id: &str) -> Option<&Layer> {
        self.get(id).filter(|layer| layer.is_original())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values()
    }

    pub fn prepend_original(&mut self, layer: Layer) -> Result<()> {
        if !layer.is_original() || layer.parent_id.is_some() {
            bail!("layer {} is not an original", layer.id);
        }
        if self.layers.contains_key(&layer.id) {
            bail!("layer {} already exists", layer.id);
        }
        self.layers.shift_insert(0, layer.id.clone(), layer);
        Ok(())
    }

    /// Commits a split pair in one step: SUBJECT lands first, BACKGROUND
    /// second, both ahead of everything already stored. Nothing is inserted
    /// if either layer fails validation.
    pub fn prepend_split(&mut self, subject: Layer, background: Layer) -> Result<()> {
        if subject.layer_type != LayerType::Subject {
            bail!("expected a subject layer, got {}", subject.layer_type);
        }
        if background.layer_type != LayerType::Background {
            bail!("expected a background layer, got {}", background.layer_type);
        }
        let Some(parent_id) = subject.parent_id.as_deref() else {
            bail!("subject layer {} has no parent", subject.id);
        };
        if background.parent_id.as_deref() != Some(parent_id) {
            bail!("split pair does not share parent {parent_id}");
        }
        if self.original(parent_id).is_none() {
            bail!("parent {parent_id} is not an original layer in the store");
        }
        if subject.id == background.id
            || self.layers.contains_key(&subject.id)
            || self.layers.contains_key(&background.id)
        {
            bail!("split pair reuses an existing layer id");
        }

        self.layers
            .shift_insert(0, background.id.clone(), background);
        self.layers.shift_insert(0, subject.id.clone(), subject);
        Ok(())
    }

    /// Groups each ORIGINAL with the layers derived from it, newest original
    /// first. Layers whose parent is not in the store are left out.
    pub fn layer_sets(&self) -> Vec<LayerSet<'_>> {
        let mut sets: IndexMap<&str, LayerSet<'_>> = self
            .iter()
            .filter(|layer| layer.is_original())
            .map(|layer| {
                (
                    layer.id.as_str(),
                    LayerSet {
                        original: layer,
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        for layer in self.iter().filter(|layer| !layer.is_original()) {
            if let Some(set) = layer
                .parent_id
                .as_deref()
                .and_then(|parent_id| sets.get_mut(parent_id))
            {
                set.children.push(layer);
            }
        }

        let mut ordered: Vec<LayerSet<'_>> = sets.into_values().collect();
        ordered.sort_by(|a, b| b.original.created_at.cmp(&a.original.created_at));
        ordered
    }
}

/// One ORIGINAL and its derived layers, children most recent first.
#[derive(Debug, Clone)]
pub struct LayerSet<'a> {
    pub original: &'a Layer,
    pub children: Vec<&'a Layer>,
}

impl<'a> LayerSet<'a> {
    pub fn subject(&self) -> Option<&'a Layer> {
        self.first_of(LayerType::Subject)
    }

    pub fn background(&self) -> Option<&'a Layer> {
        self.first_of(LayerType::Background)
    }

    pub fn has_splits(&self) -> bool {
        !self.children.is_empty()
    }

    fn first_of(&self, layer_type: LayerType) -> Option<&'a Layer> {
        self.children
            .iter()
            .copied()
            .find(|layer| layer.layer_type == layer_type)
    }
}
