//! Save-record persistence.
//!
//! The save collaborator hands the core a flat string-keyed map attached to
//! the entity's save record. Layer selections, colours and the accessory
//! list are written into it; older formats are migrated in place on load.

pub mod migration;

use std::collections::BTreeMap;

use crate::accessory::AccessorySlotSet;
use crate::appearance::LayerType;
use crate::color::ColorStore;
use crate::constants::{KEY_FORMAT_VERSION, KEY_LAYER_PREFIX};

pub use migration::{migrate_record, MigrationError, MigrationReport, CURRENT_FORMAT_VERSION};

/// String-keyed save data attached to one entity
pub type SaveRecord = BTreeMap<String, String>;

/// Appearance state as it lives in a save record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedAppearance {
    pub layers: BTreeMap<LayerType, String>,
    pub accessories: AccessorySlotSet,
    pub colors: ColorStore,
}

impl PersistedAppearance {
    pub fn write_to(&self, record: &mut SaveRecord) {
        record.insert(KEY_FORMAT_VERSION.to_string(), CURRENT_FORMAT_VERSION.to_string());
        for layer in LayerType::single_slot_layers() {
            let key = layer_key(layer);
            match self.layers.get(&layer) {
                Some(id) => {
                    record.insert(key, id.clone());
                }
                None => {
                    record.remove(&key);
                }
            }
        }
        self.accessories.write_to(record);
        self.colors.write_to(record);
    }

    /// Migrate `record` to the current format, then read it.
    ///
    /// The record is left upgraded so the caller can persist the new
    /// format; a second load is a no-op migration.
    pub fn load(
        record: &mut SaveRecord,
        max_accessory_slots: usize,
    ) -> Result<(Self, MigrationReport), MigrationError> {
        let report = migrate_record(record)?;
        let layers = LayerType::single_slot_layers()
            .into_iter()
            .filter_map(|layer| {
                record
                    .get(&layer_key(layer))
                    .filter(|id| !id.is_empty())
                    .map(|id| (layer, id.clone()))
            })
            .collect();
        let appearance = Self {
            layers,
            accessories: AccessorySlotSet::read_from(record, max_accessory_slots),
            colors: ColorStore::read_from(record),
        };
        Ok((appearance, report))
    }
}

pub fn layer_key(layer: LayerType) -> String {
    format!("{}{}", KEY_LAYER_PREFIX, layer.as_str())
}
