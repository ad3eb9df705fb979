use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::appearance::LightSource;
use crate::condition::ConditionSnapshot;
use crate::entity::EntityId;

/// Everything the engine needs from the host game.
///
/// Only `snapshot` is required; the rest default to no-ops so a headless
/// host (tests, dedicated server) can ignore rendering and lighting.
pub trait AppearanceHost {
    /// World + player state for this tick, `None` if the host no longer
    /// knows the entity (it is skipped, not removed)
    fn snapshot(&mut self, entity: EntityId) -> Option<ConditionSnapshot>;

    /// Something the renderer composites for this entity changed
    fn mark_appearance_dirty(&mut self, _entity: EntityId) {}

    fn attach_light(&mut self, _location: &str, _light_id: &str, _light: &LightSource) {}

    fn detach_light(&mut self, _location: &str, _light_id: &str) {}

    /// A frame carrying a sound/light trigger became current
    fn frame_trigger(&mut self, _entity: EntityId, _trigger_id: &str) {}
}

/// Host that serves fixed snapshots and records every callback
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    pub snapshots: HashMap<EntityId, ConditionSnapshot>,
    pub dirty: BTreeSet<EntityId>,
    /// Attached lights keyed by (location, light id)
    pub lights: BTreeMap<(String, String), LightSource>,
    pub triggers: Vec<(EntityId, String)>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, entity: EntityId, snapshot: ConditionSnapshot) -> Self {
        self.snapshots.insert(entity, snapshot);
        self
    }

    pub fn snapshot_mut(&mut self, entity: EntityId) -> &mut ConditionSnapshot {
        self.snapshots.entry(entity).or_default()
    }

    pub fn take_dirty(&mut self) -> BTreeSet<EntityId> {
        std::mem::take(&mut self.dirty)
    }
}

impl AppearanceHost for RecordingHost {
    fn snapshot(&mut self, entity: EntityId) -> Option<ConditionSnapshot> {
        self.snapshots.get(&entity).cloned()
    }

    fn mark_appearance_dirty(&mut self, entity: EntityId) {
        self.dirty.insert(entity);
    }

    fn attach_light(&mut self, location: &str, light_id: &str, light: &LightSource) {
        self.lights
            .insert((location.to_string(), light_id.to_string()), light.clone());
    }

    fn detach_light(&mut self, location: &str, light_id: &str) {
        self.lights.remove(&(location.to_string(), light_id.to_string()));
    }

    fn frame_trigger(&mut self, entity: EntityId, trigger_id: &str) {
        self.triggers.push((entity, trigger_id.to_string()));
    }
}
