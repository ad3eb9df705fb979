//! Appearance Core - layered character appearance library
//!
//! This crate resolves and animates what a character looks like:
//! - Appearance registry (pack-supplied definitions, copy-then-swap tables)
//! - Condition evaluator (named, nestable condition groups)
//! - Animation state machine (frame sets, triggers, lights)
//! - Accessory slots (ordered, bounded, stable handles)
//! - Colour overrides and saved/preset outfits
//! - Save record persistence with format migration
//! - Owner-authoritative change sync between peers
//! - Engine driver and Bevy plugin tying it together per tick

pub mod accessory;
pub mod animation;
pub mod appearance;
pub mod color;
pub mod condition;
pub mod constants;
pub mod engine;
pub mod entity;
pub mod logging;
pub mod outfit;
pub mod persistence;
pub mod registry;
pub mod sync;

pub use accessory::{AccessoryError, AccessoryRecord, AccessorySlotSet, SlotHandle};
pub use animation::{AnimationPhase, AnimationRuntimeState, LayerKey};
pub use appearance::{
    AnimationType, AppearanceDefinition, DirectionalVariant, Facing, Frame, FrameSet, LayerType,
    LightSource,
};
pub use color::Color;
pub use condition::{Condition, ConditionGroup, ConditionLibrary, ConditionSnapshot};
pub use engine::{
    AppearanceEngine, AppearanceHost, AppearancePlugin, EngineConfig, EngineError, PackContents,
    PackLoadReport, RecordingHost, TickReport,
};
pub use entity::{EntityAppearance, EntityId, PeerId};
pub use outfit::{Outfit, OutfitStore};
pub use persistence::SaveRecord;
pub use registry::{AppearanceRegistry, RegistryError, RegistrySnapshot};
pub use sync::{ChangeEvent, ChangeKind, ChangePayload};
