//! Save Record Migration
//!
//! Versioned, forward-only upgrades of a save record:
//! - The record carries `appearance/format_version`; a record without it
//!   predates versioning and is treated as v1
//! - Steps transform v(N) into v(N+1) until the current version
//! - Future versions are rejected (no downgrade)
//! - Re-running on a current record changes nothing

use crate::accessory::migrate_legacy_record;
use crate::appearance::LayerType;
use crate::color::{Color, ColorKey};
use crate::constants::{KEY_FORMAT_VERSION, LEGACY_KEY_UI_COLOR_PREFIX};

use super::SaveRecord;

/// Current save format version
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// Oldest version that can still be migrated
pub const MIN_SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("save format v{save_version} is newer than supported v{max_supported}")]
    FutureVersion { save_version: u32, max_supported: u32 },
    #[error("save format v{save_version} is older than the oldest supported v{min_supported}")]
    TooOldVersion { save_version: u32, min_supported: u32 },
    #[error("unreadable save format version '{value}'")]
    InvalidVersion { value: String },
    #[error("migration from v{from_version} failed: {detail}")]
    StepFailed { from_version: u32, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub original_version: u32,
    pub final_version: u32,
    pub steps_applied: Vec<String>,
}

/// Bring `record` up to `CURRENT_FORMAT_VERSION` in place
pub fn migrate_record(record: &mut SaveRecord) -> Result<MigrationReport, MigrationError> {
    let version = match record.get(KEY_FORMAT_VERSION) {
        None => MIN_SUPPORTED_VERSION,
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| MigrationError::InvalidVersion { value: raw.clone() })?,
    };

    if version > CURRENT_FORMAT_VERSION {
        return Err(MigrationError::FutureVersion {
            save_version: version,
            max_supported: CURRENT_FORMAT_VERSION,
        });
    }
    if version < MIN_SUPPORTED_VERSION {
        return Err(MigrationError::TooOldVersion {
            save_version: version,
            min_supported: MIN_SUPPORTED_VERSION,
        });
    }

    let mut current = version;
    let mut steps = Vec::new();
    while current < CURRENT_FORMAT_VERSION {
        let description = apply_migration_step(record, current)
            .map_err(|detail| MigrationError::StepFailed {
                from_version: current,
                detail,
            })?;
        steps.push(description);
        current += 1;
        record.insert(KEY_FORMAT_VERSION.to_string(), current.to_string());
    }

    if !steps.is_empty() {
        tracing::info!(from = version, to = current, "migrated appearance save record");
    }
    Ok(MigrationReport {
        original_version: version,
        final_version: current,
        steps_applied: steps,
    })
}

fn apply_migration_step(record: &mut SaveRecord, from_version: u32) -> Result<String, String> {
    match from_version {
        1 => migrate_v1_to_v2(record),
        _ => Err(format!("no migration path from version {}", from_version)),
    }
}

/// Migration v1 → v2:
/// - Single accessory id/colour → multi-slot JSON lists
/// - `ui_color/{layer}` → `color/{layer}/0`
fn migrate_v1_to_v2(record: &mut SaveRecord) -> Result<String, String> {
    let accessory_migrated = migrate_legacy_record(record);

    let legacy_keys: Vec<String> = record
        .keys()
        .filter(|k| k.starts_with(LEGACY_KEY_UI_COLOR_PREFIX))
        .cloned()
        .collect();
    let mut colors_moved = 0;
    for old_key in legacy_keys {
        let Some(value) = record.remove(&old_key) else {
            continue;
        };
        let layer_name = &old_key[LEGACY_KEY_UI_COLOR_PREFIX.len()..];
        let (Some(layer), Some(color)) = (LayerType::parse(layer_name), Color::parse(&value)) else {
            tracing::warn!(key = %old_key, "dropping unreadable legacy colour entry");
            continue;
        };
        let new_key = ColorKey::new(layer, 0).save_key();
        if !record.contains_key(&new_key) {
            record.insert(new_key, color.to_save_string());
            colors_moved += 1;
        }
    }

    Ok(format!(
        "v1→v2: accessory list {}, {} legacy colour key(s) moved",
        if accessory_migrated { "upgraded" } else { "unchanged" },
        colors_moved
    ))
}
