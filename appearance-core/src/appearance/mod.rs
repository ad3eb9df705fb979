//! Appearance Definitions
//!
//! Immutable, validated layer definitions supplied by appearance packs:
//! - One definition per (owner, layer type, name)
//! - Up to four directional variants (front/back/left/right)
//! - Each variant is a prioritized list of condition-gated frame sets
//! - Optional shop metadata and a free-form tag set
//!
//! Parsing pack files is the loader's job; this module only models and
//! validates what the loader hands over.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::condition::ConditionGroup;
use crate::constants::FACING_FALLBACK_ORDER;

/// Visual slot of a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerType {
    Hair,
    Body,
    Hat,
    Shirt,
    Sleeves,
    Pants,
    Shoes,
    Accessory,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hair => "Hair",
            Self::Body => "Body",
            Self::Hat => "Hat",
            Self::Shirt => "Shirt",
            Self::Sleeves => "Sleeves",
            Self::Pants => "Pants",
            Self::Shoes => "Shoes",
            Self::Accessory => "Accessory",
        }
    }

    /// Case-insensitive parse, used for save-record keys
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s))
    }

    pub fn all() -> [LayerType; 8] {
        [
            Self::Hair,
            Self::Body,
            Self::Hat,
            Self::Shirt,
            Self::Sleeves,
            Self::Pants,
            Self::Shoes,
            Self::Accessory,
        ]
    }

    /// Layers that hold exactly one definition per entity
    pub fn single_slot_layers() -> [LayerType; 7] {
        [
            Self::Hair,
            Self::Body,
            Self::Hat,
            Self::Shirt,
            Self::Sleeves,
            Self::Pants,
            Self::Shoes,
        ]
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facing direction of an entity, one per directional variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Facing {
    Front,
    Back,
    Left,
    Right,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Front => "Front",
            Self::Back => "Back",
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Front, Self::Back, Self::Left, Self::Right]
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Source rectangle of a frame on the pack's sprite sheet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// How a frame set advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnimationType {
    #[default]
    Loop,
    /// Plays once, holds the last frame
    TriggerOnce,
    /// Never advances
    Static,
    /// Random successor at every frame boundary
    Randomized,
    /// Frame index follows the host entity's own animation frame
    SyncedToBase,
}

impl AnimationType {
    /// Whether frames are advanced by elapsed time
    pub fn is_timed(&self) -> bool {
        matches!(self, Self::Loop | Self::TriggerOnce | Self::Randomized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub sprite: SpriteRect,
    pub duration_ms: u32,
    /// One-shot sound/light trigger fired when the frame becomes current
    #[serde(default)]
    pub trigger: Option<String>,
}

impl Frame {
    pub fn new(sprite: SpriteRect, duration_ms: u32) -> Self {
        Self {
            sprite,
            duration_ms,
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, trigger: &str) -> Self {
        self.trigger = Some(trigger.to_string());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.duration_ms))
    }
}

/// Light emitted while a frame set is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSource {
    pub radius: f32,
    /// Packed RGBA
    pub color: u32,
    #[serde(default)]
    pub texture: Option<String>,
}

/// Condition-gated animation sequence inside a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSet {
    #[serde(default)]
    pub name: Option<String>,
    /// `None` marks the default frame set, which must sort last
    #[serde(default)]
    pub condition: Option<ConditionGroup>,
    #[serde(default)]
    pub animation_type: AnimationType,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub light: Option<LightSource>,
}

impl FrameSet {
    pub fn new(animation_type: AnimationType, frames: Vec<Frame>) -> Self {
        Self {
            name: None,
            condition: None,
            animation_type,
            frames,
            light: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn when(mut self, condition: ConditionGroup) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_light(mut self, light: LightSource) -> Self {
        self.light = Some(light);
        self
    }

    pub fn is_default(&self) -> bool {
        self.condition.is_none()
    }
}

/// Sprite data for one facing direction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionalVariant {
    /// Bounding size; required, `None` fails validation
    #[serde(default)]
    pub size: Option<Size>,
    /// Declaration order is priority order
    #[serde(default)]
    pub frame_sets: Vec<FrameSet>,
}

impl DirectionalVariant {
    pub fn new(size: Size, frame_sets: Vec<FrameSet>) -> Self {
        Self {
            size: Some(size),
            frame_sets,
        }
    }
}

/// Shop integration metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: u32,
}

/// A validated, immutable appearance layer definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppearanceDefinition {
    /// `"{owner}/{layer}/{name}"`
    pub id: String,
    pub owner: String,
    pub name: String,
    pub layer: LayerType,
    /// Unique id of the source pack
    pub pack_id: String,
    #[serde(default)]
    pub pack_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub front: Option<DirectionalVariant>,
    #[serde(default)]
    pub back: Option<DirectionalVariant>,
    #[serde(default)]
    pub left: Option<DirectionalVariant>,
    #[serde(default)]
    pub right: Option<DirectionalVariant>,
    #[serde(default)]
    pub item: Option<ItemMetadata>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Build the owner-namespaced id of a definition
pub fn definition_id(owner: &str, layer: LayerType, name: &str) -> String {
    format!("{}/{}/{}", owner, layer.as_str(), name)
}

/// Why a definition was rejected at register time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("definition '{id}' has no directional variants")]
    NoVariants { id: String },
    #[error("definition '{id}' {facing:?} variant is missing its size")]
    MissingSize { id: String, facing: Facing },
    #[error("definition '{id}' {facing:?} frame set {index} has no frames")]
    EmptyFrameSet {
        id: String,
        facing: Facing,
        index: usize,
    },
    #[error("definition '{id}' {facing:?} frame set {index} has a zero-length frame")]
    ZeroDuration {
        id: String,
        facing: Facing,
        index: usize,
    },
    #[error("definition '{id}' {facing:?} default frame set {index} is not declared last")]
    DefaultNotLast {
        id: String,
        facing: Facing,
        index: usize,
    },
    #[error("definition id '{id}' does not match owner/layer/name '{expected}'")]
    IdMismatch { id: String, expected: String },
}

impl AppearanceDefinition {
    /// Empty definition with a derived id; variants are added with the `with_*` builders
    pub fn new(owner: &str, layer: LayerType, name: &str, pack_id: &str) -> Self {
        Self {
            id: definition_id(owner, layer, name),
            owner: owner.to_string(),
            name: name.to_string(),
            layer,
            pack_id: pack_id.to_string(),
            pack_name: pack_id.to_string(),
            author: owner.to_string(),
            front: None,
            back: None,
            left: None,
            right: None,
            item: None,
            tags: Vec::new(),
        }
    }

    pub fn with_variant(mut self, facing: Facing, variant: DirectionalVariant) -> Self {
        *self.variant_slot_mut(facing) = Some(variant);
        self
    }

    /// Same variant on all four facings
    pub fn with_all_variants(self, variant: DirectionalVariant) -> Self {
        self.with_variant(Facing::Front, variant.clone())
            .with_variant(Facing::Back, variant.clone())
            .with_variant(Facing::Left, variant.clone())
            .with_variant(Facing::Right, variant)
    }

    pub fn with_item(mut self, item: ItemMetadata) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn variant(&self, facing: Facing) -> Option<&DirectionalVariant> {
        match facing {
            Facing::Front => self.front.as_ref(),
            Facing::Back => self.back.as_ref(),
            Facing::Left => self.left.as_ref(),
            Facing::Right => self.right.as_ref(),
        }
    }

    fn variant_slot_mut(&mut self, facing: Facing) -> &mut Option<DirectionalVariant> {
        match facing {
            Facing::Front => &mut self.front,
            Facing::Back => &mut self.back,
            Facing::Left => &mut self.left,
            Facing::Right => &mut self.right,
        }
    }

    /// Facing of the variant to draw: the requested one if present, else
    /// the first present in Front, Right, Left, Back order
    pub fn resolve_facing(&self, requested: Facing) -> Option<Facing> {
        if self.variant(requested).is_some() {
            return Some(requested);
        }
        FACING_FALLBACK_ORDER
            .into_iter()
            .find(|facing| self.variant(*facing).is_some())
    }

    pub fn variants(&self) -> impl Iterator<Item = (Facing, &DirectionalVariant)> {
        [Facing::Front, Facing::Back, Facing::Left, Facing::Right]
            .into_iter()
            .filter_map(move |facing| self.variant(facing).map(|v| (facing, v)))
    }

    /// Case-insensitive substring match over the tag set
    pub fn has_tag(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&keyword))
    }

    /// Fill in missing item metadata from the definition itself
    pub fn normalize_item(&mut self) {
        let Some(item) = self.item.as_mut() else {
            return;
        };
        if item.id.as_deref().map_or(true, str::is_empty) {
            item.id = Some(format!("{}/Item", self.id));
        }
        if item.display_name.as_deref().map_or(true, str::is_empty) {
            item.display_name = Some(self.name.clone());
        }
        if item.description.as_deref().map_or(true, str::is_empty) {
            item.description = Some(format!(
                "Added via appearance pack: {}.",
                self.pack_name
            ));
        }
    }

    /// Structural checks; the first violation wins
    pub fn validate(&self) -> Result<(), ValidationError> {
        let expected = definition_id(&self.owner, self.layer, &self.name);
        if self.id != expected {
            return Err(ValidationError::IdMismatch {
                id: self.id.clone(),
                expected,
            });
        }

        let mut any = false;
        for (facing, variant) in self.variants() {
            any = true;
            if variant.size.is_none() {
                return Err(ValidationError::MissingSize {
                    id: self.id.clone(),
                    facing,
                });
            }

            let last = variant.frame_sets.len().saturating_sub(1);
            for (index, frame_set) in variant.frame_sets.iter().enumerate() {
                if frame_set.is_default() && index != last {
                    return Err(ValidationError::DefaultNotLast {
                        id: self.id.clone(),
                        facing,
                        index,
                    });
                }
                if frame_set.frames.is_empty() {
                    return Err(ValidationError::EmptyFrameSet {
                        id: self.id.clone(),
                        facing,
                        index,
                    });
                }
                if frame_set.animation_type.is_timed()
                    && frame_set.frames.iter().any(|f| f.duration_ms == 0)
                {
                    return Err(ValidationError::ZeroDuration {
                        id: self.id.clone(),
                        facing,
                        index,
                    });
                }
            }
        }

        if !any {
            return Err(ValidationError::NoVariants {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionField, ConditionValue, Operator};

    pub(crate) fn frames(count: usize, duration_ms: u32) -> Vec<Frame> {
        (0..count)
            .map(|i| {
                Frame::new(
                    SpriteRect {
                        x: i as u32 * 16,
                        y: 0,
                        width: 16,
                        height: 32,
                    },
                    duration_ms,
                )
            })
            .collect()
    }

    pub(crate) fn looping_hair(name: &str) -> AppearanceDefinition {
        AppearanceDefinition::new("alice", LayerType::Hair, name, "alice.hairpack").with_all_variants(
            DirectionalVariant::new(
                Size {
                    width: 16,
                    height: 32,
                },
                vec![FrameSet::new(AnimationType::Loop, frames(4, 100))],
            ),
        )
    }

    #[test]
    fn test_definition_id_format() {
        assert_eq!(definition_id("alice", LayerType::Hat, "beret"), "alice/Hat/beret");
        let def = AppearanceDefinition::new("alice", LayerType::Hat, "beret", "pack");
        assert_eq!(def.id, "alice/Hat/beret");
    }

    #[test]
    fn test_valid_definition() {
        assert!(looping_hair("bob").validate().is_ok());
    }

    #[test]
    fn test_no_variants_rejected() {
        let def = AppearanceDefinition::new("alice", LayerType::Hair, "bald", "pack");
        assert!(matches!(def.validate(), Err(ValidationError::NoVariants { .. })));
    }

    #[test]
    fn test_missing_size_rejected() {
        let def = AppearanceDefinition::new("alice", LayerType::Hair, "x", "pack").with_variant(
            Facing::Left,
            DirectionalVariant {
                size: None,
                frame_sets: vec![FrameSet::new(AnimationType::Static, frames(1, 0))],
            },
        );
        assert_eq!(
            def.validate(),
            Err(ValidationError::MissingSize {
                id: "alice/Hair/x".into(),
                facing: Facing::Left
            })
        );
    }

    #[test]
    fn test_default_frame_set_must_be_last() {
        let winter = ConditionGroup::all(vec![Condition::new(
            ConditionField::Season,
            Operator::Equals,
            ConditionValue::Text("winter".into()),
        )]);
        let def = AppearanceDefinition::new("alice", LayerType::Hat, "toque", "pack").with_variant(
            Facing::Front,
            DirectionalVariant::new(
                Size::default(),
                vec![
                    FrameSet::new(AnimationType::Loop, frames(2, 50)),
                    FrameSet::new(AnimationType::Loop, frames(2, 50)).when(winter),
                ],
            ),
        );
        assert!(matches!(
            def.validate(),
            Err(ValidationError::DefaultNotLast { index: 0, .. })
        ));
    }

    #[test]
    fn test_zero_duration_only_matters_for_timed_sets() {
        let def = AppearanceDefinition::new("alice", LayerType::Shoes, "clogs", "pack")
            .with_variant(
                Facing::Front,
                DirectionalVariant::new(
                    Size::default(),
                    vec![FrameSet::new(AnimationType::Static, frames(1, 0))],
                ),
            );
        assert!(def.validate().is_ok());

        let def = AppearanceDefinition::new("alice", LayerType::Shoes, "clogs", "pack")
            .with_variant(
                Facing::Front,
                DirectionalVariant::new(
                    Size::default(),
                    vec![FrameSet::new(AnimationType::Loop, frames(2, 0))],
                ),
            );
        assert!(matches!(def.validate(), Err(ValidationError::ZeroDuration { .. })));
    }

    #[test]
    fn test_facing_fallback_order() {
        let variant = DirectionalVariant::new(Size::default(), vec![]);
        let def = AppearanceDefinition::new("a", LayerType::Hat, "h", "p")
            .with_variant(Facing::Left, variant.clone())
            .with_variant(Facing::Back, variant.clone());
        assert_eq!(def.resolve_facing(Facing::Back), Some(Facing::Back));
        // Front and Right missing: Left wins before Back
        assert_eq!(def.resolve_facing(Facing::Front), Some(Facing::Left));

        let def = def.with_variant(Facing::Right, variant);
        assert_eq!(def.resolve_facing(Facing::Front), Some(Facing::Right));
    }

    #[test]
    fn test_has_tag_case_insensitive_substring() {
        let def = looping_hair("curly").with_tags(&["Winter-Collection", "festive"]);
        assert!(def.has_tag("winter"));
        assert!(def.has_tag("FEST"));
        assert!(!def.has_tag("summer"));
    }

    #[test]
    fn test_normalize_item_fills_defaults() {
        let mut def = looping_hair("curly").with_item(ItemMetadata {
            price: 250,
            ..Default::default()
        });
        def.pack_name = "Curly Pack".into();
        def.normalize_item();
        let item = def.item.unwrap();
        assert_eq!(item.id.as_deref(), Some("alice/Hair/curly/Item"));
        assert_eq!(item.display_name.as_deref(), Some("curly"));
        assert_eq!(
            item.description.as_deref(),
            Some("Added via appearance pack: Curly Pack.")
        );
        assert_eq!(item.price, 250);
    }

    #[test]
    fn test_layer_parse() {
        assert_eq!(LayerType::parse("sleeves"), Some(LayerType::Sleeves));
        assert_eq!(LayerType::parse("cape"), None);
        assert_eq!(Facing::parse("RIGHT"), Some(Facing::Right));
    }
}
