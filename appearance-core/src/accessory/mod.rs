//! Accessory Slot Manager
//!
//! Up to `max_slots` concurrent accessory layers per entity. Slot order is
//! draw order. Each slot carries a stable `SlotHandle`; the entity's
//! animation map is keyed by that handle, so reordering slots never
//! touches animation state.

use serde::{Deserialize, Serialize};

use crate::appearance::LayerType;
use crate::color::Color;
use crate::constants::{
    KEY_ACCESSORY_COLORS, KEY_ACCESSORY_IDS, LEGACY_KEY_ACCESSORY_COLOR, LEGACY_KEY_ACCESSORY_ID,
};
use crate::persistence::SaveRecord;
use crate::registry::RegistrySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessoryError {
    #[error("accessory '{0}' is not registered")]
    UnknownDefinition(String),
    #[error("'{id}' is a {found} layer, not an accessory")]
    WrongLayerType { id: String, found: LayerType },
    #[error("all {max} accessory slots are occupied")]
    SlotLimitExceeded { max: usize },
    #[error("slot index {index} is outside 0..{max}")]
    SlotIndexOutOfRange { index: usize, max: usize },
    #[error("accessory slot {0} is empty")]
    SlotEmpty(usize),
    #[error("reorder must be a permutation of 0..{len}")]
    InvalidOrder { len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorySlot {
    pub handle: SlotHandle,
    pub definition_id: String,
    pub color: Option<Color>,
}

/// Wire/persisted form of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryRecord {
    pub definition_id: String,
    #[serde(default)]
    pub color: Option<Color>,
}

/// What `equip` did to the slot list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipOutcome {
    Added { index: usize, handle: SlotHandle },
    /// The slot at `index` now holds the new accessory; its handle is kept
    Replaced { index: usize, handle: SlotHandle },
}

impl EquipOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Added { index, .. } | Self::Replaced { index, .. } => *index,
        }
    }

    pub fn handle(&self) -> SlotHandle {
        match self {
            Self::Added { handle, .. } | Self::Replaced { handle, .. } => *handle,
        }
    }
}

/// Handles that appeared and disappeared when a slot list was replaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotDiff {
    pub added: Vec<SlotHandle>,
    pub removed: Vec<SlotHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorySlotSet {
    max_slots: usize,
    slots: Vec<AccessorySlot>,
    next_handle: u32,
}

impl AccessorySlotSet {
    pub fn new(max_slots: usize) -> Self {
        Self {
            max_slots,
            slots: Vec::new(),
            next_handle: 0,
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max_slots
    }

    pub fn get(&self, index: usize) -> Option<&AccessorySlot> {
        self.slots.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessorySlot> {
        self.slots.iter()
    }

    pub fn index_of(&self, handle: SlotHandle) -> Option<usize> {
        self.slots.iter().position(|s| s.handle == handle)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.definition_id.as_str()).collect()
    }

    pub fn records(&self) -> Vec<AccessoryRecord> {
        self.slots
            .iter()
            .map(|s| AccessoryRecord {
                definition_id: s.definition_id.clone(),
                color: s.color,
            })
            .collect()
    }

    fn allocate_handle(&mut self) -> SlotHandle {
        let handle = SlotHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    /// Put an accessory in a slot.
    ///
    /// `Some(index)` on an occupied slot replaces it (the colour resets to
    /// the definition default); on a free position it appends. `None`
    /// appends and fails when every slot is taken.
    pub fn equip(
        &mut self,
        registry: &RegistrySnapshot,
        definition_id: &str,
        index: Option<usize>,
    ) -> Result<EquipOutcome, AccessoryError> {
        let definition = registry
            .lookup(definition_id)
            .ok_or_else(|| AccessoryError::UnknownDefinition(definition_id.to_string()))?;
        if definition.layer != LayerType::Accessory {
            return Err(AccessoryError::WrongLayerType {
                id: definition_id.to_string(),
                found: definition.layer,
            });
        }

        match index {
            Some(i) if i < self.slots.len() => {
                let slot = &mut self.slots[i];
                slot.definition_id = definition_id.to_string();
                slot.color = None;
                Ok(EquipOutcome::Replaced {
                    index: i,
                    handle: slot.handle,
                })
            }
            Some(i) if i >= self.max_slots => Err(AccessoryError::SlotIndexOutOfRange {
                index: i,
                max: self.max_slots,
            }),
            _ if self.is_full() => Err(AccessoryError::SlotLimitExceeded {
                max: self.max_slots,
            }),
            _ => Ok(self.push(definition_id, None)),
        }
    }

    fn push(&mut self, definition_id: &str, color: Option<Color>) -> EquipOutcome {
        let handle = self.allocate_handle();
        self.slots.push(AccessorySlot {
            handle,
            definition_id: definition_id.to_string(),
            color,
        });
        EquipOutcome::Added {
            index: self.slots.len() - 1,
            handle,
        }
    }

    /// Remove the slot at `index`; later slots shift down
    pub fn unequip(&mut self, index: usize) -> Result<AccessorySlot, AccessoryError> {
        if index >= self.slots.len() {
            return Err(AccessoryError::SlotEmpty(index));
        }
        Ok(self.slots.remove(index))
    }

    /// `new_order[i]` is the current index of the slot that moves to `i`
    pub fn reorder(&mut self, new_order: &[usize]) -> Result<(), AccessoryError> {
        let len = self.slots.len();
        let mut seen = vec![false; len];
        if new_order.len() != len {
            return Err(AccessoryError::InvalidOrder { len });
        }
        for &i in new_order {
            if i >= len || seen[i] {
                return Err(AccessoryError::InvalidOrder { len });
            }
            seen[i] = true;
        }
        let reordered = new_order.iter().map(|&i| self.slots[i].clone()).collect();
        self.slots = reordered;
        Ok(())
    }

    pub fn set_color(&mut self, index: usize, color: Option<Color>) -> Result<(), AccessoryError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(AccessoryError::SlotEmpty(index))?;
        slot.color = color;
        Ok(())
    }

    pub fn color(&self, index: usize) -> Option<Color> {
        self.slots.get(index).and_then(|s| s.color)
    }

    /// Replace the whole list, reusing handles of slots whose definition
    /// survives so their animations keep running
    pub fn assign(&mut self, records: &[AccessoryRecord]) -> SlotDiff {
        if records.len() > self.max_slots {
            tracing::warn!(
                got = records.len(),
                max = self.max_slots,
                "accessory list longer than the slot limit, truncating"
            );
        }
        let mut old: Vec<Option<AccessorySlot>> = self.slots.drain(..).map(Some).collect();
        let mut diff = SlotDiff::default();
        let mut slots = Vec::with_capacity(records.len().min(self.max_slots));

        for record in records.iter().take(self.max_slots) {
            let reused = old
                .iter_mut()
                .find(|s| {
                    s.as_ref()
                        .is_some_and(|s| s.definition_id == record.definition_id)
                })
                .and_then(Option::take);
            let handle = match reused {
                Some(slot) => slot.handle,
                None => {
                    let handle = self.allocate_handle();
                    diff.added.push(handle);
                    handle
                }
            };
            slots.push(AccessorySlot {
                handle,
                definition_id: record.definition_id.clone(),
                color: record.color,
            });
        }

        diff.removed = old.into_iter().flatten().map(|s| s.handle).collect();
        self.slots = slots;
        diff
    }

    pub fn write_to(&self, record: &mut SaveRecord) {
        let ids: Vec<&str> = self.ids();
        let colors: Vec<String> = self
            .slots
            .iter()
            .map(|s| s.color.map(|c| c.to_save_string()).unwrap_or_default())
            .collect();
        record.insert(
            KEY_ACCESSORY_IDS.to_string(),
            serde_json::to_string(&ids).unwrap_or_else(|_| "[]".into()),
        );
        record.insert(
            KEY_ACCESSORY_COLORS.to_string(),
            serde_json::to_string(&colors).unwrap_or_else(|_| "[]".into()),
        );
    }

    /// Malformed lists load as empty; entries past `max_slots` are dropped
    pub fn read_from(record: &SaveRecord, max_slots: usize) -> Self {
        let ids: Vec<String> = record
            .get(KEY_ACCESSORY_IDS)
            .map(|raw| {
                serde_json::from_str(raw).unwrap_or_else(|e| {
                    tracing::warn!("ignoring malformed accessory list: {}", e);
                    Vec::new()
                })
            })
            .unwrap_or_default();
        let colors: Vec<String> = record
            .get(KEY_ACCESSORY_COLORS)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        let records: Vec<AccessoryRecord> = ids
            .into_iter()
            .enumerate()
            .filter(|(_, id)| !id.is_empty())
            .map(|(i, definition_id)| AccessoryRecord {
                definition_id,
                color: colors.get(i).and_then(|c| Color::parse(c)),
            })
            .collect();

        let mut set = Self::new(max_slots);
        set.assign(&records);
        set
    }
}

/// Upgrade a single-slot accessory record into the multi-slot lists.
///
/// Returns `false` when there is nothing legacy left to migrate. An
/// existing multi-slot list is never overwritten.
pub fn migrate_legacy_record(record: &mut SaveRecord) -> bool {
    let legacy_id = record.remove(LEGACY_KEY_ACCESSORY_ID);
    let legacy_color = record.remove(LEGACY_KEY_ACCESSORY_COLOR);
    if legacy_id.is_none() && legacy_color.is_none() {
        return false;
    }

    let Some(id) = legacy_id.filter(|id| !id.is_empty() && id != "None") else {
        return true;
    };
    let has_list = record
        .get(KEY_ACCESSORY_IDS)
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .is_some_and(|ids| !ids.is_empty());
    if has_list {
        tracing::debug!("legacy accessory '{}' ignored, multi-slot list already present", id);
        return true;
    }

    let color = legacy_color
        .as_deref()
        .and_then(Color::parse)
        .map(|c| c.to_save_string())
        .unwrap_or_default();
    record.insert(
        KEY_ACCESSORY_IDS.to_string(),
        serde_json::to_string(&[id]).unwrap_or_else(|_| "[]".into()),
    );
    record.insert(
        KEY_ACCESSORY_COLORS.to_string(),
        serde_json::to_string(&[color]).unwrap_or_else(|_| "[]".into()),
    );
    true
}
