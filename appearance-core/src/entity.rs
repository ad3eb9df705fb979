//! Per-entity appearance state.
//!
//! The engine never owns the host's entities; it tracks them by
//! `EntityId` and keeps everything it derives for them here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::accessory::AccessorySlotSet;
use crate::animation::{AnimationRuntimeState, LayerKey};
use crate::appearance::LayerType;
use crate::color::{Color, ColorStore};

/// Host-assigned entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

/// One drawable layer in draw order, as handed to the render collaborator
#[derive(Debug, Clone, Copy)]
pub struct RenderLayer<'a> {
    pub key: LayerKey,
    pub definition_id: &'a str,
    pub state: &'a AnimationRuntimeState,
    pub color: Option<Color>,
}

#[derive(Debug, Clone)]
pub struct EntityAppearance {
    pub id: EntityId,
    /// Peer whose sequence stream is authoritative for this entity
    pub owner: PeerId,
    pub layers: BTreeMap<LayerType, String>,
    pub accessories: AccessorySlotSet,
    pub colors: ColorStore,
    /// Keyed in a stable order so ticks are deterministic
    pub animations: BTreeMap<LayerKey, AnimationRuntimeState>,
}

impl EntityAppearance {
    pub fn new(id: EntityId, owner: PeerId, max_accessory_slots: usize) -> Self {
        Self {
            id,
            owner,
            layers: BTreeMap::new(),
            accessories: AccessorySlotSet::new(max_accessory_slots),
            colors: ColorStore::new(),
            animations: BTreeMap::new(),
        }
    }

    pub fn layer(&self, layer: LayerType) -> Option<&str> {
        self.layers.get(&layer).map(String::as_str)
    }

    pub fn animation(&self, key: LayerKey) -> Option<&AnimationRuntimeState> {
        self.animations.get(&key)
    }

    /// Runtime state of the accessory currently at `index`
    pub fn accessory_animation(&self, index: usize) -> Option<&AnimationRuntimeState> {
        let slot = self.accessories.get(index)?;
        self.animations.get(&LayerKey::Accessory(slot.handle))
    }

    /// Single-slot layers in layer order, then accessories in slot order
    pub fn render_layers(&self) -> Vec<RenderLayer<'_>> {
        let mut out = Vec::with_capacity(self.layers.len() + self.accessories.len());
        for (layer, definition_id) in &self.layers {
            let key = LayerKey::Layer(*layer);
            if let Some(state) = self.animations.get(&key).filter(|s| !s.is_disabled()) {
                out.push(RenderLayer {
                    key,
                    definition_id,
                    state,
                    color: self.colors.get(*layer, 0),
                });
            }
        }
        for slot in self.accessories.iter() {
            let key = LayerKey::Accessory(slot.handle);
            if let Some(state) = self.animations.get(&key).filter(|s| !s.is_disabled()) {
                out.push(RenderLayer {
                    key,
                    definition_id: &slot.definition_id,
                    state,
                    color: slot.color,
                });
            }
        }
        out
    }
}
