use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::config::EngineConfig;
use super::host::AppearanceHost;
use super::pack::{PackContents, PackLoadReport};
use crate::accessory::{AccessoryError, AccessoryRecord};
use crate::animation::{AnimationRuntimeState, LayerKey, TickContext};
use crate::appearance::{Frame, LayerType};
use crate::color::Color;
use crate::condition::ConditionLibrary;
use crate::entity::{EntityAppearance, EntityId, PeerId};
use crate::logging::TimingSpan;
use crate::outfit::{Outfit, OutfitColor, OutfitError, OutfitStore};
use crate::persistence::{MigrationError, MigrationReport, PersistedAppearance, SaveRecord};
use crate::registry::{AppearanceRegistry, RegistryError};
use crate::sync::{
    ApplyOutcome, ChangeEvent, ChangeKind, ChangePayload, DiscardReason, SyncBroadcaster,
    SyncInbox,
};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Accessory(#[from] AccessoryError),
    #[error(transparent)]
    Outfit(#[from] OutfitError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("entity {0} is not tracked")]
    UnknownEntity(EntityId),
    #[error("entity {entity} is owned by {owner}")]
    NotOwner { entity: EntityId, owner: PeerId },
    #[error("appearance '{0}' is not registered")]
    UnknownDefinition(String),
    #[error("'{id}' is a {found} appearance, not {expected}")]
    WrongLayerType {
        id: String,
        expected: LayerType,
        found: LayerType,
    },
    #[error("accessories are equipped through accessory slots")]
    AccessoryLayer,
    #[error("change event json: {0}")]
    Wire(#[from] serde_json::Error),
}

/// Counters for one `tick`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub remote_applied: usize,
    pub remote_discarded: usize,
    pub visual_changes: usize,
    pub triggers_completed: usize,
    /// States disabled because their definition left the registry
    pub disabled: usize,
    /// Entities the host was told to redraw
    pub entities_dirtied: usize,
}

/// Owns every appearance subsystem and drives them once per host tick.
///
/// Local mutators check ownership, change state, and queue a change event
/// for the transport. Remote events arrive through the inbox and are
/// applied at the start of the next `tick`.
pub struct AppearanceEngine {
    config: EngineConfig,
    registry: AppearanceRegistry,
    conditions: ConditionLibrary,
    outfits: OutfitStore,
    entities: BTreeMap<EntityId, EntityAppearance>,
    sync: SyncBroadcaster,
    rng: Xoshiro256PlusPlus,
    dirty_entities: BTreeSet<EntityId>,
}

fn local_entity<'a>(
    entities: &'a mut BTreeMap<EntityId, EntityAppearance>,
    local_peer: PeerId,
    id: EntityId,
) -> Result<&'a mut EntityAppearance, EngineError> {
    let entity = entities.get_mut(&id).ok_or(EngineError::UnknownEntity(id))?;
    if entity.owner != local_peer {
        return Err(EngineError::NotOwner {
            entity: id,
            owner: entity.owner,
        });
    }
    Ok(entity)
}

fn assign_layer(entity: &mut EntityAppearance, layer: LayerType, definition_id: &str) {
    entity.layers.insert(layer, definition_id.to_string());
    let key = LayerKey::Layer(layer);
    match entity.animations.get_mut(&key) {
        Some(state) => state.reassign(definition_id),
        None => {
            entity
                .animations
                .insert(key, AnimationRuntimeState::new(entity.id, key, definition_id));
        }
    }
}

fn clear_layer(entity: &mut EntityAppearance, layer: LayerType, host: &mut dyn AppearanceHost) -> bool {
    let removed = entity.layers.remove(&layer).is_some();
    if let Some(mut state) = entity.animations.remove(&LayerKey::Layer(layer)) {
        state.disable(host);
    }
    removed
}

/// Replace the accessory list, keeping the animations of surviving slots
fn assign_accessories(
    entity: &mut EntityAppearance,
    records: &[AccessoryRecord],
    host: &mut dyn AppearanceHost,
) {
    let diff = entity.accessories.assign(records);
    for handle in diff.removed {
        if let Some(mut state) = entity.animations.remove(&LayerKey::Accessory(handle)) {
            state.disable(host);
        }
    }
    for handle in diff.added {
        let Some(slot) = entity
            .accessories
            .index_of(handle)
            .and_then(|i| entity.accessories.get(i))
        else {
            continue;
        };
        let key = LayerKey::Accessory(handle);
        let state = AnimationRuntimeState::new(entity.id, key, &slot.definition_id);
        entity.animations.insert(key, state);
    }
}

fn animation_key(entity: &EntityAppearance, layer: LayerType, slot: Option<u8>) -> Option<LayerKey> {
    match layer {
        LayerType::Accessory => {
            let slot = entity.accessories.get(usize::from(slot?))?;
            Some(LayerKey::Accessory(slot.handle))
        }
        layer => Some(LayerKey::Layer(layer)),
    }
}

fn slot_byte(index: usize) -> Option<u8> {
    u8::try_from(index).ok()
}

impl AppearanceEngine {
    pub fn new(config: EngineConfig) -> Self {
        info!(
            peer = %config.local_peer,
            max_accessory_slots = config.max_accessory_slots,
            "appearance engine starting"
        );
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(config.random_seed),
            sync: SyncBroadcaster::new(config.local_peer),
            registry: AppearanceRegistry::new(),
            conditions: ConditionLibrary::new(),
            outfits: OutfitStore::new(),
            entities: BTreeMap::new(),
            dirty_entities: BTreeSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_peer(&self) -> PeerId {
        self.config.local_peer
    }

    pub fn registry(&self) -> &AppearanceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AppearanceRegistry {
        &mut self.registry
    }

    pub fn conditions(&self) -> &ConditionLibrary {
        &self.conditions
    }

    pub fn conditions_mut(&mut self) -> &mut ConditionLibrary {
        &mut self.conditions
    }

    pub fn outfits(&self) -> &OutfitStore {
        &self.outfits
    }

    pub fn outfits_mut(&mut self) -> &mut OutfitStore {
        &mut self.outfits
    }

    // ========================================================================
    // Packs
    // ========================================================================

    /// Load (or reload) one pack: its previous contents are dropped first
    /// and states showing its definitions restart on the next tick.
    pub fn load_pack(&mut self, mut pack: PackContents) -> PackLoadReport {
        let _span = TimingSpan::new("load_pack");
        pack.stamp_identity();
        self.registry.reset(Some(&pack.pack_id));
        self.conditions.reset(Some(&pack.pack_id));
        self.outfits.clear_presets(Some(&pack.pack_id));

        let mut report = PackLoadReport {
            pack_id: pack.pack_id.clone(),
            ..Default::default()
        };

        for (name, group) in pack.condition_groups {
            self.conditions.insert(&pack.pack_id, &name, group);
            report.condition_groups += 1;
        }

        let ids: HashSet<String> = pack.definitions.iter().map(|d| d.id.clone()).collect();
        let total = pack.definitions.len();
        report.rejected = self.registry.register_all(pack.definitions);
        report.registered = total - report.rejected.len();
        for error in &report.rejected {
            warn!(pack = %pack.pack_id, error = %error, "appearance rejected");
        }

        for outfit in pack.outfits {
            let name = outfit.name.clone();
            match self
                .outfits
                .add_preset(&pack.pack_id, &pack.pack_name, &pack.author, outfit)
            {
                Ok(()) => report.presets += 1,
                Err(e) => warn!(pack = %pack.pack_id, outfit = %name, error = %e, "preset skipped"),
            }
        }

        report.condition_warnings = self.conditions.validate();
        for warning in &report.condition_warnings {
            warn!(pack = %pack.pack_id, "{}", warning);
        }

        for state in self
            .entities
            .values_mut()
            .flat_map(|e| e.animations.values_mut())
            .filter(|s| ids.contains(&s.definition_id))
        {
            state.mark_dirty();
        }

        info!(
            pack = %report.pack_id,
            registered = report.registered,
            rejected = report.rejected.len(),
            groups = report.condition_groups,
            presets = report.presets,
            "pack loaded"
        );
        report
    }

    /// Full content reload: everything but the builtins is dropped and the
    /// packs load as one generation, so ids clashing across packs are
    /// rejected.
    pub fn reload_packs(&mut self, packs: Vec<PackContents>) -> Vec<PackLoadReport> {
        let _span = TimingSpan::new("reload_packs");
        self.reset_packs(None);
        self.registry.begin_generation();
        packs.into_iter().map(|pack| self.load_pack(pack)).collect()
    }

    /// Drop content of one pack (or all packs); builtins survive
    pub fn reset_packs(&mut self, pack_filter: Option<&str>) -> usize {
        let removed = self.registry.reset(pack_filter);
        self.conditions.reset(pack_filter);
        self.outfits.clear_presets(pack_filter);
        debug!(filter = ?pack_filter, removed, "packs reset");
        removed
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Start tracking an entity; re-tracking only updates the owner
    pub fn track_entity(&mut self, id: EntityId, owner: PeerId) {
        let max = self.config.max_accessory_slots;
        self.entities
            .entry(id)
            .and_modify(|e| e.owner = owner)
            .or_insert_with(|| EntityAppearance::new(id, owner, max));
        self.sync.track(id, owner);
        debug!(entity = %id, owner = %owner, "tracking entity");
    }

    /// Stop tracking an entity, detaching its lights
    pub fn untrack_entity(
        &mut self,
        id: EntityId,
        host: &mut dyn AppearanceHost,
    ) -> Option<EntityAppearance> {
        let mut entity = self.entities.remove(&id)?;
        for state in entity.animations.values_mut() {
            state.disable(host);
        }
        self.sync.untrack(id);
        self.dirty_entities.remove(&id);
        debug!(entity = %id, "untracked entity");
        Some(entity)
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityAppearance> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityAppearance> {
        self.entities.values()
    }

    /// Frame the renderer should draw for one layer
    pub fn current_frame(&self, id: EntityId, key: LayerKey) -> Option<Frame> {
        let state = self.entities.get(&id)?.animation(key)?;
        if state.is_disabled() {
            return None;
        }
        let definition = self.registry.lookup(&state.definition_id)?;
        state.current_frame(&definition).cloned()
    }

    // ========================================================================
    // Local mutation
    // ========================================================================

    pub fn equip_layer(
        &mut self,
        id: EntityId,
        layer: LayerType,
        definition_id: &str,
    ) -> Result<(), EngineError> {
        if layer == LayerType::Accessory {
            return Err(EngineError::AccessoryLayer);
        }
        let definition = self
            .registry
            .lookup(definition_id)
            .ok_or_else(|| EngineError::UnknownDefinition(definition_id.to_string()))?;
        if definition.layer != layer {
            return Err(EngineError::WrongLayerType {
                id: definition_id.to_string(),
                expected: layer,
                found: definition.layer,
            });
        }
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        assign_layer(entity, layer, definition_id);
        self.dirty_entities.insert(id);
        self.sync.record(
            id,
            ChangeKind::LayerSwap,
            layer,
            None,
            ChangePayload::Layer {
                definition_id: Some(definition_id.to_string()),
            },
        );
        debug!(entity = %id, %layer, definition = definition_id, "layer equipped");
        Ok(())
    }

    /// Clear a layer; `Ok(false)` when nothing was equipped there
    pub fn unequip_layer(
        &mut self,
        id: EntityId,
        layer: LayerType,
        host: &mut dyn AppearanceHost,
    ) -> Result<bool, EngineError> {
        if layer == LayerType::Accessory {
            return Err(EngineError::AccessoryLayer);
        }
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        if !clear_layer(entity, layer, host) {
            return Ok(false);
        }
        self.dirty_entities.insert(id);
        self.sync.record(
            id,
            ChangeKind::LayerSwap,
            layer,
            None,
            ChangePayload::Layer { definition_id: None },
        );
        Ok(true)
    }

    /// Equip an accessory, returning the slot index it landed in
    pub fn equip_accessory(
        &mut self,
        id: EntityId,
        definition_id: &str,
        slot: Option<usize>,
    ) -> Result<usize, EngineError> {
        let snapshot = self.registry.snapshot();
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        let outcome = entity.accessories.equip(&snapshot, definition_id, slot)?;
        let key = LayerKey::Accessory(outcome.handle());
        match entity.animations.get_mut(&key) {
            Some(state) => state.reassign(definition_id),
            None => {
                entity
                    .animations
                    .insert(key, AnimationRuntimeState::new(id, key, definition_id));
            }
        }
        let slots = entity.accessories.records();
        self.dirty_entities.insert(id);
        self.sync.record(
            id,
            ChangeKind::AccessoryEquip,
            LayerType::Accessory,
            slot_byte(outcome.index()),
            ChangePayload::Accessories { slots },
        );
        debug!(entity = %id, definition = definition_id, index = outcome.index(), "accessory equipped");
        Ok(outcome.index())
    }

    pub fn unequip_accessory(
        &mut self,
        id: EntityId,
        index: usize,
        host: &mut dyn AppearanceHost,
    ) -> Result<(), EngineError> {
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        let slot = entity.accessories.unequip(index)?;
        if let Some(mut state) = entity.animations.remove(&LayerKey::Accessory(slot.handle)) {
            state.disable(host);
        }
        let slots = entity.accessories.records();
        self.dirty_entities.insert(id);
        self.sync.record(
            id,
            ChangeKind::AccessoryUnequip,
            LayerType::Accessory,
            slot_byte(index),
            ChangePayload::Accessories { slots },
        );
        debug!(entity = %id, definition = %slot.definition_id, index, "accessory unequipped");
        Ok(())
    }

    /// Reorder accessories; `order[i]` is the old index of the new slot `i`
    pub fn reorder_accessories(&mut self, id: EntityId, order: &[usize]) -> Result<(), EngineError> {
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        entity.accessories.reorder(order)?;
        let slots = entity.accessories.records();
        self.dirty_entities.insert(id);
        self.sync.record(
            id,
            ChangeKind::AccessoryReorder,
            LayerType::Accessory,
            None,
            ChangePayload::Accessories { slots },
        );
        Ok(())
    }

    /// Set (or with `None` clear) a colour override. For accessories `slot`
    /// is the accessory slot index.
    pub fn set_color(
        &mut self,
        id: EntityId,
        layer: LayerType,
        slot: u8,
        color: Option<Color>,
    ) -> Result<(), EngineError> {
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        let payload = if layer == LayerType::Accessory {
            entity.accessories.set_color(usize::from(slot), color)?;
            ChangePayload::Accessories {
                slots: entity.accessories.records(),
            }
        } else {
            match color {
                Some(c) => entity.colors.set(layer, slot, c),
                None => entity.colors.clear(layer, slot),
            };
            ChangePayload::Color { color }
        };
        self.dirty_entities.insert(id);
        self.sync
            .record(id, ChangeKind::ColorChange, layer, Some(slot), payload);
        Ok(())
    }

    pub fn color(&self, id: EntityId, layer: LayerType, slot: u8) -> Option<Color> {
        let entity = self.entities.get(&id)?;
        match layer {
            LayerType::Accessory => entity.accessories.color(usize::from(slot)),
            layer => entity.colors.get(layer, slot),
        }
    }

    /// Restart one layer's animation; `slot` picks the accessory
    pub fn reset_animation(
        &mut self,
        id: EntityId,
        layer: LayerType,
        slot: Option<u8>,
    ) -> Result<bool, EngineError> {
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        let Some(state) = animation_key(entity, layer, slot).and_then(|k| entity.animations.get_mut(&k))
        else {
            return Ok(false);
        };
        state.mark_dirty();
        self.sync.record(
            id,
            ChangeKind::AnimationReset,
            layer,
            slot,
            ChangePayload::AnimationReset {
                facing: Some(state.facing),
            },
        );
        Ok(true)
    }

    /// The entity left its location: drop its lights there. They are
    /// re-attached at the new location on the next tick.
    pub fn on_warp(&mut self, id: EntityId, old_location: &str, host: &mut dyn AppearanceHost) -> usize {
        let Some(entity) = self.entities.get_mut(&id) else {
            return 0;
        };
        let mut detached = 0;
        let stale = entity
            .animations
            .values_mut()
            .filter(|s| s.light.as_ref().is_some_and(|l| l.location == old_location));
        for state in stale {
            state.detach_light(host);
            detached += 1;
        }
        trace!(entity = %id, detached, "lights detached on warp");
        detached
    }

    // ========================================================================
    // Outfits
    // ========================================================================

    pub fn capture_outfit(&self, id: EntityId, name: &str) -> Result<Outfit, EngineError> {
        let entity = self.entities.get(&id).ok_or(EngineError::UnknownEntity(id))?;
        let mut outfit = Outfit::new(name);
        outfit.layers = entity.layers.clone();
        outfit.accessories = entity.accessories.records();
        outfit.colors = entity
            .colors
            .iter()
            .map(|(key, color)| OutfitColor {
                layer: key.layer,
                slot: key.slot,
                color,
            })
            .collect();
        Ok(outfit)
    }

    pub fn save_outfit(&mut self, id: EntityId, name: &str) -> Result<(), EngineError> {
        let outfit = self.capture_outfit(id, name)?;
        self.outfits.save(outfit)?;
        info!(entity = %id, outfit = name, "outfit saved");
        Ok(())
    }

    /// Dress the entity in a stored outfit. Ids missing from the registry
    /// are skipped (the current item stays) and returned.
    pub fn apply_outfit(
        &mut self,
        id: EntityId,
        name: &str,
        host: &mut dyn AppearanceHost,
    ) -> Result<Vec<String>, EngineError> {
        let outfit = self
            .outfits
            .get(name)
            .cloned()
            .ok_or_else(|| OutfitError::NotFound(name.to_string()))?;
        local_entity(&mut self.entities, self.config.local_peer, id)?;

        let snapshot = self.registry.snapshot();
        let missing = outfit.missing_ids(&snapshot);
        if !missing.is_empty() {
            warn!(entity = %id, outfit = name, missing = ?missing, "outfit references unknown appearances");
        }

        for layer in LayerType::single_slot_layers() {
            let current = self
                .entities
                .get(&id)
                .and_then(|e| e.layer(layer))
                .map(str::to_string);
            match outfit.layers.get(&layer) {
                Some(wanted) if !snapshot.contains(wanted) => {}
                Some(wanted) if current.as_deref() == Some(wanted.as_str()) => {}
                Some(wanted) => self.equip_layer(id, layer, wanted)?,
                None if current.is_some() => {
                    self.unequip_layer(id, layer, host)?;
                }
                None => {}
            }
        }

        let records: Vec<AccessoryRecord> = outfit
            .accessories
            .iter()
            .filter(|r| snapshot.contains(&r.definition_id))
            .cloned()
            .collect();
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        if entity.accessories.records() != records {
            assign_accessories(entity, &records, host);
            let slots = entity.accessories.records();
            self.dirty_entities.insert(id);
            self.sync.record(
                id,
                ChangeKind::AccessoryEquip,
                LayerType::Accessory,
                None,
                ChangePayload::Accessories { slots },
            );
        }

        let wanted: BTreeMap<(LayerType, u8), Color> = outfit
            .colors
            .iter()
            .filter(|c| c.layer != LayerType::Accessory)
            .map(|c| ((c.layer, c.slot), c.color))
            .collect();
        let current: BTreeMap<(LayerType, u8), Color> = entity
            .colors
            .iter()
            .map(|(key, color)| ((key.layer, key.slot), color))
            .collect();
        let stale: Vec<(LayerType, u8)> = current
            .keys()
            .filter(|k| !wanted.contains_key(k))
            .copied()
            .collect();
        for (layer, slot) in stale {
            self.set_color(id, layer, slot, None)?;
        }
        for (&(layer, slot), &color) in &wanted {
            if current.get(&(layer, slot)) != Some(&color) {
                self.set_color(id, layer, slot, Some(color))?;
            }
        }

        info!(entity = %id, outfit = name, "outfit applied");
        Ok(missing)
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Handle the transport pushes remote events into
    pub fn inbox(&self) -> SyncInbox {
        self.sync.inbox()
    }

    pub fn receive(&self, event: ChangeEvent) {
        self.sync.inbox().push(event);
    }

    pub fn receive_json(&self, json: &str) -> Result<(), EngineError> {
        self.sync.inbox().push_json(json)?;
        Ok(())
    }

    /// Local change events waiting to be broadcast
    pub fn drain_outbound(&mut self) -> Vec<ChangeEvent> {
        self.sync.drain_outbound()
    }

    /// Queue events describing the entity's whole look, for a peer that
    /// just joined
    pub fn broadcast_full_state(&mut self, id: EntityId) -> Result<usize, EngineError> {
        let entity = local_entity(&mut self.entities, self.config.local_peer, id)?;
        let mut queued = 0;
        for (&layer, definition_id) in &entity.layers {
            let payload = ChangePayload::Layer {
                definition_id: Some(definition_id.clone()),
            };
            if self.sync.record(id, ChangeKind::LayerSwap, layer, None, payload).is_some() {
                queued += 1;
            }
        }
        for (key, color) in entity.colors.iter() {
            let payload = ChangePayload::Color { color: Some(color) };
            if self
                .sync
                .record(id, ChangeKind::ColorChange, key.layer, Some(key.slot), payload)
                .is_some()
            {
                queued += 1;
            }
        }
        let payload = ChangePayload::Accessories {
            slots: entity.accessories.records(),
        };
        if self
            .sync
            .record(id, ChangeKind::AccessoryEquip, LayerType::Accessory, None, payload)
            .is_some()
        {
            queued += 1;
        }
        Ok(queued)
    }

    /// Apply one remote event now. Admitted events are recorded even if
    /// their content degrades (e.g. an unknown definition is drawn as
    /// nothing until it registers).
    pub fn apply_remote(&mut self, event: ChangeEvent, host: &mut dyn AppearanceHost) -> ApplyOutcome {
        if let Err(reason) = self.sync.admit(&event) {
            return ApplyOutcome::Discarded(reason);
        }
        let Some(entity) = self.entities.get_mut(&event.entity_id) else {
            return ApplyOutcome::Discarded(DiscardReason::UnknownEntity);
        };

        match &event.payload {
            ChangePayload::Layer {
                definition_id: Some(definition_id),
            } if event.layer_type != LayerType::Accessory => {
                assign_layer(entity, event.layer_type, definition_id);
            }
            ChangePayload::Layer { definition_id: None } => {
                clear_layer(entity, event.layer_type, host);
            }
            ChangePayload::Layer { .. } => {
                warn!(entity = %event.entity_id, "layer event for the accessory layer ignored");
            }
            ChangePayload::Color { color } => {
                let slot = event.slot_index.unwrap_or(0);
                match color {
                    Some(c) => entity.colors.set(event.layer_type, slot, *c),
                    None => entity.colors.clear(event.layer_type, slot),
                };
            }
            ChangePayload::AnimationReset { .. } => {
                if let Some(state) = animation_key(entity, event.layer_type, event.slot_index)
                    .and_then(|k| entity.animations.get_mut(&k))
                {
                    state.mark_dirty();
                }
            }
            ChangePayload::Accessories { slots } => assign_accessories(entity, slots, host),
        }

        self.dirty_entities.insert(event.entity_id);
        trace!(entity = %event.entity_id, kind = ?event.kind, sequence = event.sequence, "remote change applied");
        ApplyOutcome::Applied
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn save_entity(&self, id: EntityId, record: &mut SaveRecord) -> Result<(), EngineError> {
        let entity = self.entities.get(&id).ok_or(EngineError::UnknownEntity(id))?;
        PersistedAppearance {
            layers: entity.layers.clone(),
            accessories: entity.accessories.clone(),
            colors: entity.colors.clone(),
        }
        .write_to(record);
        Ok(())
    }

    /// Restore a tracked entity from its save record. The record is
    /// upgraded to the current format in place.
    pub fn load_entity(
        &mut self,
        id: EntityId,
        record: &mut SaveRecord,
        host: &mut dyn AppearanceHost,
    ) -> Result<MigrationReport, EngineError> {
        let max = self.config.max_accessory_slots;
        let entity = self.entities.get_mut(&id).ok_or(EngineError::UnknownEntity(id))?;
        let (appearance, report) = PersistedAppearance::load(record, max)?;
        appearance.write_to(record);

        for state in entity.animations.values_mut() {
            state.disable(host);
        }
        entity.animations.clear();
        entity.layers = appearance.layers;
        entity.accessories = appearance.accessories;
        entity.colors = appearance.colors;

        for (&layer, definition_id) in &entity.layers {
            let key = LayerKey::Layer(layer);
            entity
                .animations
                .insert(key, AnimationRuntimeState::new(id, key, definition_id));
        }
        for slot in entity.accessories.iter() {
            let key = LayerKey::Accessory(slot.handle);
            entity
                .animations
                .insert(key, AnimationRuntimeState::new(id, key, &slot.definition_id));
        }

        self.dirty_entities.insert(id);
        info!(
            entity = %id,
            from = report.original_version,
            to = report.final_version,
            "appearance loaded"
        );
        Ok(report)
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance every tracked entity by `delta`.
    ///
    /// Order: remote events, registry rewrites, animation, then one
    /// `mark_appearance_dirty` per changed entity.
    pub fn tick(&mut self, delta: Duration, host: &mut dyn AppearanceHost) -> TickReport {
        let mut report = TickReport::default();

        for event in self.sync.inbox().drain() {
            match self.apply_remote(event, host) {
                ApplyOutcome::Applied => report.remote_applied += 1,
                ApplyOutcome::Discarded(reason) => {
                    trace!(?reason, "remote change discarded");
                    report.remote_discarded += 1;
                }
            }
        }

        let rewritten: HashSet<String> = self.registry.take_dirty_ids().into_iter().collect();
        if !rewritten.is_empty() {
            for state in self
                .entities
                .values_mut()
                .flat_map(|e| e.animations.values_mut())
                .filter(|s| rewritten.contains(&s.definition_id))
            {
                state.mark_dirty();
            }
        }

        let registry = self.registry.snapshot();
        let trigger_ceiling = self.config.trigger_ceiling();
        let Self {
            entities,
            conditions,
            rng,
            dirty_entities,
            ..
        } = self;

        for entity in entities.values_mut() {
            let Some(snapshot) = host.snapshot(entity.id) else {
                trace!(entity = %entity.id, "host has no snapshot, skipping");
                continue;
            };
            for state in entity.animations.values_mut() {
                let Some(definition) = registry.lookup(&state.definition_id) else {
                    if !state.is_disabled() {
                        debug!(
                            entity = %entity.id,
                            layer = %state.key,
                            definition = %state.definition_id,
                            "appearance left the registry, disabling"
                        );
                        state.disable(host);
                        report.disabled += 1;
                        dirty_entities.insert(entity.id);
                    }
                    continue;
                };
                if state.is_disabled() {
                    let definition_id = state.definition_id.clone();
                    state.reassign(&definition_id);
                }

                let mut ctx = TickContext {
                    definition: &definition,
                    snapshot: &snapshot,
                    conditions: &*conditions,
                    rng: &mut *rng,
                    trigger_ceiling,
                    host: &mut *host,
                };
                let outcome = state.tick(delta, &mut ctx);
                if outcome.visual_changed {
                    report.visual_changes += 1;
                    dirty_entities.insert(entity.id);
                }
                if outcome.trigger_completed {
                    report.triggers_completed += 1;
                }
            }
        }

        for id in std::mem::take(dirty_entities) {
            host.mark_appearance_dirty(id);
            report.entities_dirtied += 1;
        }
        report
    }
}
