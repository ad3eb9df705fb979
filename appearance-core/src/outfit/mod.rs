//! Outfit Store
//!
//! Named bundles of layer selections, accessories and colours.
//! Pack-provided presets are read-only and dropped on reset; player-saved
//! outfits persist as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::accessory::AccessoryRecord;
use crate::appearance::LayerType;
use crate::color::Color;
use crate::registry::RegistrySnapshot;

#[derive(Debug, thiserror::Error)]
pub enum OutfitError {
    #[error("no outfit named '{0}'")]
    NotFound(String),
    #[error("outfit '{0}' is a pack preset and cannot be changed")]
    ReadOnlyPreset(String),
    #[error("outfit name '{0}' is already used by a saved outfit")]
    NameTaken(String),
    #[error("outfit json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitColor {
    pub layer: LayerType,
    pub slot: u8,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outfit {
    pub name: String,
    #[serde(default)]
    pub author: String,
    /// Pack name for presets, empty for player outfits
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub is_preset: bool,
    /// Pack that supplied a preset
    #[serde(default)]
    pub pack_id: Option<String>,
    #[serde(default)]
    pub layers: BTreeMap<LayerType, String>,
    #[serde(default)]
    pub accessories: Vec<AccessoryRecord>,
    #[serde(default)]
    pub colors: Vec<OutfitColor>,
}

impl Outfit {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            author: String::new(),
            source: String::new(),
            is_preset: false,
            pack_id: None,
            layers: BTreeMap::new(),
            accessories: Vec::new(),
            colors: Vec::new(),
        }
    }

    pub fn with_layer(mut self, layer: LayerType, definition_id: &str) -> Self {
        self.layers.insert(layer, definition_id.to_string());
        self
    }

    pub fn with_accessory(mut self, definition_id: &str, color: Option<Color>) -> Self {
        self.accessories.push(AccessoryRecord {
            definition_id: definition_id.to_string(),
            color,
        });
        self
    }

    pub fn with_color(mut self, layer: LayerType, slot: u8, color: Color) -> Self {
        self.colors.push(OutfitColor { layer, slot, color });
        self
    }

    /// Every definition id the outfit references
    pub fn definition_ids(&self) -> impl Iterator<Item = &str> {
        self.layers
            .values()
            .map(String::as_str)
            .chain(self.accessories.iter().map(|a| a.definition_id.as_str()))
    }

    /// Referenced ids the registry does not know
    pub fn missing_ids(&self, registry: &RegistrySnapshot) -> Vec<String> {
        self.definition_ids()
            .filter(|id| !registry.contains(id))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutfitStore {
    outfits: BTreeMap<String, Outfit>,
}

impl OutfitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Outfit> {
        self.outfits.get(name)
    }

    /// All outfits sorted by name
    pub fn list(&self) -> Vec<&Outfit> {
        self.outfits.values().collect()
    }

    pub fn presets(&self) -> impl Iterator<Item = &Outfit> {
        self.outfits.values().filter(|o| o.is_preset)
    }

    pub fn saved(&self) -> impl Iterator<Item = &Outfit> {
        self.outfits.values().filter(|o| !o.is_preset)
    }

    pub fn len(&self) -> usize {
        self.outfits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outfits.is_empty()
    }

    /// Register a pack preset; the author falls back to the pack author
    pub fn add_preset(
        &mut self,
        pack_id: &str,
        pack_name: &str,
        pack_author: &str,
        mut outfit: Outfit,
    ) -> Result<(), OutfitError> {
        if self.outfits.get(&outfit.name).is_some_and(|o| !o.is_preset) {
            return Err(OutfitError::NameTaken(outfit.name));
        }
        if outfit.author.is_empty() {
            outfit.author = pack_author.to_string();
        }
        outfit.source = pack_name.to_string();
        outfit.pack_id = Some(pack_id.to_string());
        outfit.is_preset = true;
        self.outfits.insert(outfit.name.clone(), outfit);
        Ok(())
    }

    /// Drop presets of one pack, or all presets
    pub fn clear_presets(&mut self, pack_filter: Option<&str>) {
        self.outfits.retain(|_, o| {
            !o.is_preset
                || pack_filter.is_some_and(|pack| {
                    !o.pack_id
                        .as_deref()
                        .is_some_and(|id| id.eq_ignore_ascii_case(pack))
                })
        });
    }

    /// Save or overwrite a player outfit
    pub fn save(&mut self, mut outfit: Outfit) -> Result<(), OutfitError> {
        if self.outfits.get(&outfit.name).is_some_and(|o| o.is_preset) {
            return Err(OutfitError::ReadOnlyPreset(outfit.name));
        }
        outfit.is_preset = false;
        outfit.pack_id = None;
        self.outfits.insert(outfit.name.clone(), outfit);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<Outfit, OutfitError> {
        match self.outfits.get(name) {
            None => Err(OutfitError::NotFound(name.to_string())),
            Some(o) if o.is_preset => Err(OutfitError::ReadOnlyPreset(name.to_string())),
            Some(_) => self
                .outfits
                .remove(name)
                .ok_or_else(|| OutfitError::NotFound(name.to_string())),
        }
    }

    /// Player outfits only; presets come back with their packs
    pub fn saved_to_json(&self) -> Result<String, OutfitError> {
        let saved: Vec<&Outfit> = self.saved().collect();
        Ok(serde_json::to_string(&saved)?)
    }

    pub fn load_saved_json(&mut self, json: &str) -> Result<usize, OutfitError> {
        let outfits: Vec<Outfit> = serde_json::from_str(json)?;
        let mut loaded = 0;
        for outfit in outfits {
            match self.save(outfit) {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!("skipping saved outfit: {}", e),
            }
        }
        Ok(loaded)
    }
}
