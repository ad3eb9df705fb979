use serde::{Deserialize, Serialize};

use crate::appearance::AppearanceDefinition;
use crate::condition::{ConditionGroup, ConditionWarning};
use crate::outfit::Outfit;
use crate::registry::RegistryError;

/// Parsed contents of one appearance pack, as produced by the pack loader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackContents {
    pub pack_id: String,
    #[serde(default)]
    pub pack_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub definitions: Vec<AppearanceDefinition>,
    /// Named condition groups, unqualified
    #[serde(default)]
    pub condition_groups: Vec<(String, ConditionGroup)>,
    #[serde(default)]
    pub outfits: Vec<Outfit>,
}

impl PackContents {
    pub fn new(pack_id: &str, pack_name: &str, author: &str) -> Self {
        Self {
            pack_id: pack_id.to_string(),
            pack_name: pack_name.to_string(),
            author: author.to_string(),
            ..Default::default()
        }
    }

    /// Every definition belongs to this pack; blank name/author fields
    /// inherit the pack's
    pub(crate) fn stamp_identity(&mut self) {
        for definition in &mut self.definitions {
            let default_name = definition.pack_name.is_empty() || definition.pack_name == definition.pack_id;
            definition.pack_id = self.pack_id.clone();
            if default_name && !self.pack_name.is_empty() {
                definition.pack_name = self.pack_name.clone();
            }
            if definition.author.is_empty() {
                definition.author = self.author.clone();
            }
        }
    }
}

/// What happened while loading a pack
#[derive(Debug, Default)]
pub struct PackLoadReport {
    pub pack_id: String,
    pub registered: usize,
    pub rejected: Vec<RegistryError>,
    pub condition_groups: usize,
    pub condition_warnings: Vec<ConditionWarning>,
    pub presets: usize,
}

impl PackLoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.condition_warnings.is_empty()
    }
}
