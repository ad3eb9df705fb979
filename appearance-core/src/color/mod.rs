//! Color Store
//!
//! Per-entity recolour state keyed by `(layer, slot)`. The store does no
//! colour math; it is the value the render collaborator reads when
//! compositing mask-channel recolours. A missing entry means "definition
//! default" and is never an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::appearance::LayerType;
use crate::constants::KEY_COLOR_PREFIX;
use crate::persistence::SaveRecord;

/// Packed `0xRRGGBBAA`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Color = Color(0xFFFF_FFFF);

    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(u32::from_be_bytes([r, g, b, a]))
    }

    pub fn channels(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Persisted form: the packed value in decimal
    pub fn to_save_string(&self) -> String {
        self.0.to_string()
    }

    /// Accepts the decimal form or `#RRGGBBAA` / `#RRGGBB`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            return match hex.len() {
                8 => u32::from_str_radix(hex, 16).ok().map(Color),
                6 => u32::from_str_radix(hex, 16).ok().map(|rgb| Color((rgb << 8) | 0xFF)),
                _ => None,
            };
        }
        s.parse::<u32>().ok().map(Color)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColorKey {
    pub layer: LayerType,
    pub slot: u8,
}

impl ColorKey {
    pub fn new(layer: LayerType, slot: u8) -> Self {
        Self { layer, slot }
    }

    pub fn save_key(&self) -> String {
        format!("{}{}/{}", KEY_COLOR_PREFIX, self.layer.as_str(), self.slot)
    }

    /// Inverse of `save_key`; `None` for keys outside the colour namespace
    pub fn from_save_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(KEY_COLOR_PREFIX)?;
        let (layer, slot) = rest.split_once('/')?;
        Some(Self {
            layer: LayerType::parse(layer)?,
            slot: slot.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorStore {
    entries: BTreeMap<ColorKey, Color>,
}

impl ColorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous value
    pub fn set(&mut self, layer: LayerType, slot: u8, color: Color) -> Option<Color> {
        self.entries.insert(ColorKey::new(layer, slot), color)
    }

    pub fn get(&self, layer: LayerType, slot: u8) -> Option<Color> {
        self.entries.get(&ColorKey::new(layer, slot)).copied()
    }

    /// Back to the definition default
    pub fn clear(&mut self, layer: LayerType, slot: u8) -> Option<Color> {
        self.entries.remove(&ColorKey::new(layer, slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColorKey, Color)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, record: &mut SaveRecord) {
        record.retain(|key, _| !key.starts_with(KEY_COLOR_PREFIX));
        for (key, color) in &self.entries {
            record.insert(key.save_key(), color.to_save_string());
        }
    }

    /// Unparseable entries are skipped and fall back to the default colour
    pub fn read_from(record: &SaveRecord) -> Self {
        let mut store = Self::new();
        for (key, value) in record.range(KEY_COLOR_PREFIX.to_string()..) {
            if !key.starts_with(KEY_COLOR_PREFIX) {
                break;
            }
            match (ColorKey::from_save_key(key), Color::parse(value)) {
                (Some(color_key), Some(color)) => {
                    store.entries.insert(color_key, color);
                }
                _ => tracing::warn!(key = %key, value = %value, "ignoring malformed colour entry"),
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entry_is_default() {
        let store = ColorStore::new();
        assert_eq!(store.get(LayerType::Hair, 0), None);
    }

    #[test]
    fn test_set_get_clear() {
        let mut store = ColorStore::new();
        let red = Color::rgba(255, 0, 0, 255);
        assert_eq!(store.set(LayerType::Shirt, 1, red), None);
        assert_eq!(store.get(LayerType::Shirt, 1), Some(red));
        assert_eq!(store.get(LayerType::Shirt, 0), None);
        assert_eq!(store.clear(LayerType::Shirt, 1), Some(red));
        assert!(store.is_empty());
    }

    #[test]
    fn test_color_parse_forms() {
        assert_eq!(Color::parse("#FF000080"), Some(Color(0xFF00_0080)));
        assert_eq!(Color::parse("#00FF00"), Some(Color(0x00FF_00FF)));
        assert_eq!(Color::parse("4278190335"), Some(Color(0xFF00_00FF)));
        assert_eq!(Color::parse("red"), None);
        assert_eq!(Color::rgba(1, 2, 3, 4).channels(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_save_key_roundtrip() {
        let key = ColorKey::new(LayerType::Pants, 2);
        assert_eq!(key.save_key(), "appearance/color/Pants/2");
        assert_eq!(ColorKey::from_save_key(&key.save_key()), Some(key));
        assert_eq!(ColorKey::from_save_key("appearance/color/Cape/0"), None);
    }

    #[test]
    fn test_record_roundtrip_skips_garbage() {
        let mut store = ColorStore::new();
        store.set(LayerType::Hair, 0, Color(0x1122_33FF));
        store.set(LayerType::Shoes, 0, Color(0x4455_66FF));

        let mut record = SaveRecord::new();
        record.insert("appearance/color/Hat/0".into(), "not a colour".into());
        record.insert("appearance/layer/Hair".into(), "alice/Hair/curly".into());
        store.write_to(&mut record);
        // Stale colour entries are replaced wholesale
        assert!(!record.contains_key("appearance/color/Hat/0"));
        assert_eq!(
            record.get("appearance/layer/Hair").map(String::as_str),
            Some("alice/Hair/curly")
        );

        record.insert("appearance/color/Hat/0".into(), "garbage".into());
        let restored = ColorStore::read_from(&record);
        assert_eq!(restored, store);
    }
}
