//! Animation State Machine
//!
//! One `AnimationRuntimeState` per (entity, layer slot). Each tick:
//! 1. Resolve the directional variant from the entity's facing
//! 2. Pick the first frame set whose condition holds
//! 3. If either changed (or the state is dirty) reset into `Transitioning`
//!    and swap the frame set's light; that tick consumes no time
//! 4. Otherwise advance frames by elapsed time, carrying the remainder
//!
//! The state refers to its entity by id only and never owns it.

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::accessory::SlotHandle;
use crate::appearance::{
    AnimationType, AppearanceDefinition, DirectionalVariant, Facing, Frame, FrameSet, LayerType,
};
use crate::condition::{ConditionLibrary, ConditionSnapshot};
use crate::engine::host::AppearanceHost;
use crate::entity::EntityId;

/// Which slot of an entity a runtime state animates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerKey {
    Layer(LayerType),
    /// Accessory slots are keyed by a stable handle so reordering never
    /// touches their animation state
    Accessory(SlotHandle),
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKey::Layer(layer) => f.write_str(layer.as_str()),
            LayerKey::Accessory(handle) => write!(f, "Accessory#{}", handle.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationPhase {
    Idle,
    /// Variant or frame set just changed; the next tick settles
    Transitioning,
    TriggerPlaying { remaining_loops: u32 },
    /// Unequipped, or the definition left the registry
    Disabled,
}

/// Light currently registered with a location on behalf of this state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedLight {
    pub id: String,
    pub location: String,
}

/// Everything a tick needs besides the state itself
pub struct TickContext<'a> {
    pub definition: &'a AppearanceDefinition,
    pub snapshot: &'a ConditionSnapshot,
    pub conditions: &'a ConditionLibrary,
    pub rng: &'a mut Xoshiro256PlusPlus,
    pub trigger_ceiling: Duration,
    pub host: &'a mut dyn AppearanceHost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Something the renderer draws changed
    pub visual_changed: bool,
    pub trigger_completed: bool,
}

/// Index of the first frame set whose condition holds, in declaration order
pub fn select_frame_set(
    variant: &DirectionalVariant,
    conditions: &ConditionLibrary,
    pack_id: &str,
    snapshot: &ConditionSnapshot,
) -> Option<usize> {
    variant
        .frame_sets
        .iter()
        .position(|set| conditions.evaluate(set.condition.as_ref(), pack_id, snapshot))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRuntimeState {
    pub entity: EntityId,
    pub key: LayerKey,
    pub definition_id: String,
    pub phase: AnimationPhase,
    /// Facing requested by the entity
    pub facing: Facing,
    /// Facing of the variant actually drawn after fallback
    pub variant_facing: Option<Facing>,
    pub frame_set: Option<usize>,
    pub frame_index: usize,
    pub elapsed_in_frame: Duration,
    pub elapsed_in_trigger: Duration,
    pub light: Option<AttachedLight>,
    pub dirty: bool,
    pub trigger_completed: bool,
    light_serial: u32,
}

impl AnimationRuntimeState {
    /// Fresh state; the first tick resolves the frame set
    pub fn new(entity: EntityId, key: LayerKey, definition_id: &str) -> Self {
        Self {
            entity,
            key,
            definition_id: definition_id.to_string(),
            phase: AnimationPhase::Transitioning,
            facing: Facing::Front,
            variant_facing: None,
            frame_set: None,
            frame_index: 0,
            elapsed_in_frame: Duration::ZERO,
            elapsed_in_trigger: Duration::ZERO,
            light: None,
            dirty: true,
            trigger_completed: false,
            light_serial: 0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.phase == AnimationPhase::Disabled
    }

    /// Force re-selection on the next tick
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Point the state at another definition. Any attached light stays
    /// until the next tick's transition detaches it.
    pub fn reassign(&mut self, definition_id: &str) {
        self.definition_id = definition_id.to_string();
        self.phase = AnimationPhase::Transitioning;
        self.frame_set = None;
        self.variant_facing = None;
        self.zero_counters();
        self.dirty = true;
    }

    /// Tear down: detach the light and stop animating
    pub fn disable(&mut self, host: &mut dyn AppearanceHost) {
        self.detach_light(host);
        self.phase = AnimationPhase::Disabled;
        self.frame_set = None;
        self.variant_facing = None;
        self.zero_counters();
        self.dirty = false;
    }

    /// Remove the light from its location; the next tick re-attaches it
    /// wherever the entity is by then
    pub fn detach_light(&mut self, host: &mut dyn AppearanceHost) {
        if let Some(light) = self.light.take() {
            host.detach_light(&light.location, &light.id);
        }
    }

    pub fn active_frame_set<'d>(&self, definition: &'d AppearanceDefinition) -> Option<&'d FrameSet> {
        let variant = definition.variant(self.variant_facing?)?;
        variant.frame_sets.get(self.frame_set?)
    }

    /// Frame the renderer should draw
    pub fn current_frame<'d>(&self, definition: &'d AppearanceDefinition) -> Option<&'d Frame> {
        if self.is_disabled() {
            return None;
        }
        self.active_frame_set(definition)?.frames.get(self.frame_index)
    }

    fn zero_counters(&mut self) {
        self.frame_index = 0;
        self.elapsed_in_frame = Duration::ZERO;
        self.elapsed_in_trigger = Duration::ZERO;
        self.trigger_completed = false;
    }

    pub fn tick(&mut self, delta: Duration, ctx: &mut TickContext<'_>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.is_disabled() {
            return outcome;
        }

        let definition = ctx.definition;
        self.facing = ctx.snapshot.facing;
        let variant_facing = definition.resolve_facing(ctx.snapshot.facing);
        let selected = variant_facing
            .and_then(|facing| definition.variant(facing))
            .and_then(|variant| {
                select_frame_set(variant, ctx.conditions, &definition.pack_id, ctx.snapshot)
            });

        if self.dirty || variant_facing != self.variant_facing || selected != self.frame_set {
            self.begin_transition(variant_facing, selected, ctx);
            outcome.visual_changed = true;
            return outcome;
        }

        let Some(frame_set) = self.active_frame_set(definition) else {
            self.phase = AnimationPhase::Idle;
            return outcome;
        };

        // definition rewritten underneath us with fewer frames
        if self.frame_index >= frame_set.frames.len() {
            self.begin_transition(variant_facing, selected, ctx);
            outcome.visual_changed = true;
            return outcome;
        }

        self.sync_light(frame_set, ctx);

        if self.phase == AnimationPhase::Transitioning {
            self.phase = match frame_set.animation_type {
                AnimationType::TriggerOnce => AnimationPhase::TriggerPlaying { remaining_loops: 1 },
                _ => AnimationPhase::Idle,
            };
            self.fire_frame_trigger(frame_set, ctx);
        }

        self.elapsed_in_trigger = (self.elapsed_in_trigger + delta).min(ctx.trigger_ceiling);
        self.advance(frame_set, delta, ctx, &mut outcome);
        outcome
    }

    fn begin_transition(
        &mut self,
        variant_facing: Option<Facing>,
        selected: Option<usize>,
        ctx: &mut TickContext<'_>,
    ) {
        tracing::trace!(
            entity = %self.entity,
            layer = %self.key,
            from = ?self.frame_set,
            to = ?selected,
            "frame set transition"
        );
        self.detach_light(ctx.host);
        self.variant_facing = variant_facing;
        self.frame_set = selected;
        self.phase = AnimationPhase::Transitioning;
        self.zero_counters();
        self.dirty = false;

        if let Some(frame_set) = self.active_frame_set(ctx.definition) {
            self.attach_light(frame_set, ctx);
        }
    }

    fn attach_light(&mut self, frame_set: &FrameSet, ctx: &mut TickContext<'_>) {
        let Some(source) = &frame_set.light else {
            return;
        };
        self.light_serial = self.light_serial.wrapping_add(1);
        let light = AttachedLight {
            id: format!("{}/{}/{}", self.entity, self.key, self.light_serial),
            location: ctx.snapshot.location.clone(),
        };
        ctx.host.attach_light(&light.location, &light.id, source);
        self.light = Some(light);
    }

    /// Re-attach after a warp or a location change
    fn sync_light(&mut self, frame_set: &FrameSet, ctx: &mut TickContext<'_>) {
        if frame_set.light.is_none() {
            return;
        }
        let stale = self
            .light
            .as_ref()
            .map_or(true, |light| light.location != ctx.snapshot.location);
        if stale {
            self.detach_light(ctx.host);
            self.attach_light(frame_set, ctx);
        }
    }

    fn fire_frame_trigger(&self, frame_set: &FrameSet, ctx: &mut TickContext<'_>) {
        if let Some(trigger) = frame_set
            .frames
            .get(self.frame_index)
            .and_then(|frame| frame.trigger.as_deref())
        {
            ctx.host.frame_trigger(self.entity, trigger);
        }
    }

    fn advance(
        &mut self,
        frame_set: &FrameSet,
        delta: Duration,
        ctx: &mut TickContext<'_>,
        outcome: &mut TickOutcome,
    ) {
        let count = frame_set.frames.len();
        if count == 0 {
            return;
        }

        match frame_set.animation_type {
            AnimationType::Static => {}
            AnimationType::SyncedToBase => {
                let index = ctx.snapshot.base_frame as usize % count;
                if index != self.frame_index {
                    self.frame_index = index;
                    outcome.visual_changed = true;
                    self.fire_frame_trigger(frame_set, ctx);
                }
            }
            AnimationType::Loop | AnimationType::Randomized | AnimationType::TriggerOnce => {
                if self.trigger_completed {
                    return;
                }
                self.elapsed_in_frame += delta;
                loop {
                    let Some(frame) = frame_set.frames.get(self.frame_index) else {
                        break;
                    };
                    let duration = frame.duration();
                    if duration.is_zero() || self.elapsed_in_frame < duration {
                        break;
                    }
                    self.elapsed_in_frame -= duration;

                    match frame_set.animation_type {
                        AnimationType::Randomized => {
                            self.frame_index = random_successor(self.frame_index, count, ctx.rng);
                        }
                        AnimationType::TriggerOnce if self.frame_index + 1 >= count => {
                            self.complete_trigger(outcome);
                            return;
                        }
                        AnimationType::TriggerOnce => self.frame_index += 1,
                        _ => self.frame_index = (self.frame_index + 1) % count,
                    }
                    outcome.visual_changed = true;
                    self.fire_frame_trigger(frame_set, ctx);
                }
            }
        }
    }

    fn complete_trigger(&mut self, outcome: &mut TickOutcome) {
        self.elapsed_in_frame = Duration::ZERO;
        self.trigger_completed = true;
        self.phase = AnimationPhase::Idle;
        outcome.trigger_completed = true;
        tracing::trace!(entity = %self.entity, layer = %self.key, "trigger animation completed");
    }
}

/// Uniform pick among every index except `current`
fn random_successor(current: usize, count: usize, rng: &mut Xoshiro256PlusPlus) -> usize {
    if count < 2 {
        return 0;
    }
    let next = rng.gen_range(0..count - 1);
    if next >= current {
        next + 1
    } else {
        next
    }
}
