//! Centralized constants for the appearance core.
//!
//! Save-record key names live here so the persistence layer, the migration
//! steps and the tests agree on one spelling.

use crate::appearance::Facing;

// =====================================================
// Accessories
// =====================================================

/// Default number of concurrent accessory slots per entity
pub const DEFAULT_MAX_ACCESSORY_SLOTS: usize = 3;

// =====================================================
// Animation
// =====================================================

/// Default ceiling for `elapsed_in_trigger` (one hour of game time, in ms)
pub const DEFAULT_TRIGGER_CEILING_MS: u64 = 3_600_000;

/// Default seed for the Randomized frame picker
pub const DEFAULT_RANDOM_SEED: u64 = 0x5EED_A11C;

/// Variant fallback order when the requested facing has no variant
pub const FACING_FALLBACK_ORDER: [Facing; 4] =
    [Facing::Front, Facing::Right, Facing::Left, Facing::Back];

// =====================================================
// Registry
// =====================================================

/// Owner of the built-in colour-override definitions
pub const BUILTIN_OWNER: &str = "builtin";

/// Name of the built-in shoe recolour definition
pub const BUILTIN_SHOES_COLOR_OVERRIDE: &str = "shoes_color_override";

/// Name of the built-in body recolour definition
pub const BUILTIN_BODY_COLOR_OVERRIDE: &str = "body_color_override";

// =====================================================
// Save record keys
// =====================================================

/// Save format version key
pub const KEY_FORMAT_VERSION: &str = "appearance/format_version";

/// Prefix for per-layer selection keys: `appearance/layer/{layer}`
pub const KEY_LAYER_PREFIX: &str = "appearance/layer/";

/// Prefix for colour keys: `appearance/color/{layer}/{slot}`
pub const KEY_COLOR_PREFIX: &str = "appearance/color/";

/// JSON array of accessory ids, in draw order
pub const KEY_ACCESSORY_IDS: &str = "appearance/accessories";

/// JSON array of packed accessory colours (empty string = default)
pub const KEY_ACCESSORY_COLORS: &str = "appearance/accessory_colors";

/// v1 single-slot accessory id
pub const LEGACY_KEY_ACCESSORY_ID: &str = "appearance/accessory";

/// v1 single-slot accessory colour
pub const LEGACY_KEY_ACCESSORY_COLOR: &str = "appearance/accessory_color";

/// Prefix of v1 per-layer colour keys: `appearance/ui_color/{layer}`
pub const LEGACY_KEY_UI_COLOR_PREFIX: &str = "appearance/ui_color/";
