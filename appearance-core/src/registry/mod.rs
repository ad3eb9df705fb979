//! Appearance Registry
//!
//! Owns every validated `AppearanceDefinition`, keyed by
//! `"{owner}/{layer}/{name}"`.
//!
//! - Readers take a cheap `RegistrySnapshot` (an `Arc` of the table)
//! - Writers copy the table, mutate the copy and swap it in, so a snapshot
//!   taken mid-tick never sees a half-replaced layer
//! - Load generations scope DuplicateId: a second registration of the same
//!   id inside one pack-load pass is rejected, a registration in a later
//!   pass rewrites the definition and queues its id as dirty

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::appearance::{
    AnimationType, AppearanceDefinition, DirectionalVariant, Frame, FrameSet, LayerType, Size,
    SpriteRect, ValidationError,
};
use crate::constants::{BUILTIN_BODY_COLOR_OVERRIDE, BUILTIN_OWNER, BUILTIN_SHOES_COLOR_OVERRIDE};
use crate::logging::TimingSpan;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("appearance id '{0}' is already registered in this load")]
    DuplicateId(String),
    #[error("definition '{id}' is a {found} layer, expected {expected}")]
    WrongLayer {
        id: String,
        expected: LayerType,
        found: LayerType,
    },
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    definition: Arc<AppearanceDefinition>,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
struct RegistryTable {
    entries: HashMap<String, RegistryEntry>,
    /// Registration order per layer
    order: HashMap<LayerType, Vec<String>>,
}

impl RegistryTable {
    fn insert(&mut self, definition: AppearanceDefinition, generation: u64) {
        let id = definition.id.clone();
        let layer = definition.layer;
        let previous = self.entries.insert(
            id.clone(),
            RegistryEntry {
                definition: Arc::new(definition),
                generation,
            },
        );
        if previous.is_none() {
            self.order.entry(layer).or_default().push(id);
        }
    }

    fn remove_where(&mut self, predicate: impl Fn(&AppearanceDefinition) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !predicate(&entry.definition));
        let entries = &self.entries;
        for ids in self.order.values_mut() {
            ids.retain(|id| entries.contains_key(id));
        }
        before - self.entries.len()
    }
}

/// Immutable view of the registry at one point in time
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot(Arc<RegistryTable>);

impl RegistrySnapshot {
    pub fn lookup(&self, id: &str) -> Option<Arc<AppearanceDefinition>> {
        self.0.entries.get(id).map(|e| Arc::clone(&e.definition))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.entries.contains_key(id)
    }

    /// Definitions of one layer in registration order
    pub fn lookup_all(&self, layer: LayerType) -> Vec<Arc<AppearanceDefinition>> {
        self.0
            .order
            .get(&layer)
            .map(|ids| ids.iter().filter_map(|id| self.lookup(id)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct AppearanceRegistry {
    table: Arc<RegistryTable>,
    generation: u64,
    dirty: Vec<String>,
    /// Ids dropped by `reset`; registering one again marks it dirty
    reset_ids: HashSet<String>,
}

impl Default for AppearanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AppearanceRegistry {
    /// Registry seeded with the built-in colour-override definitions
    pub fn new() -> Self {
        let mut registry = Self {
            table: Arc::new(RegistryTable::default()),
            generation: 0,
            dirty: Vec::new(),
            reset_ids: HashSet::new(),
        };
        registry.register_builtin_overrides();
        registry
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a new pack-load pass
    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        tracing::debug!(generation = self.generation, "registry load generation started");
        self.generation
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(Arc::clone(&self.table))
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<AppearanceDefinition>> {
        self.snapshot().lookup(id)
    }

    pub fn lookup_all(&self, layer: LayerType) -> Vec<Arc<AppearanceDefinition>> {
        self.snapshot().lookup_all(layer)
    }

    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty()
    }

    /// Validate and add one definition.
    ///
    /// A duplicate within the current generation keeps the original and
    /// reports `DuplicateId`. Rewriting a definition from an earlier
    /// generation queues its id in the dirty list.
    pub fn register(&mut self, mut definition: AppearanceDefinition) -> Result<(), RegistryError> {
        if let Err(e) = definition.validate() {
            tracing::warn!(pack = %definition.pack_id, "rejected appearance definition: {}", e);
            return Err(e.into());
        }
        definition.normalize_item();

        if let Some(existing) = self.table.entries.get(&definition.id) {
            if existing.generation == self.generation {
                tracing::warn!(
                    id = %definition.id,
                    pack = %definition.pack_id,
                    kept_from = %existing.definition.pack_id,
                    "duplicate appearance id, keeping the original"
                );
                return Err(RegistryError::DuplicateId(definition.id));
            }
            self.dirty.push(definition.id.clone());
        } else if self.reset_ids.remove(&definition.id) {
            self.dirty.push(definition.id.clone());
        }

        let generation = self.generation;
        Arc::make_mut(&mut self.table).insert(definition, generation);
        Ok(())
    }

    /// Register a batch; a bad definition never aborts the rest
    pub fn register_all(
        &mut self,
        definitions: impl IntoIterator<Item = AppearanceDefinition>,
    ) -> Vec<RegistryError> {
        definitions
            .into_iter()
            .filter_map(|d| self.register(d).err())
            .collect()
    }

    /// Drop every definition from one pack, or all definitions.
    ///
    /// The built-in overrides survive a filtered reset and are re-seeded
    /// after a full one.
    pub fn reset(&mut self, pack_filter: Option<&str>) -> usize {
        let _span = TimingSpan::new("registry_reset");
        let removed = match pack_filter {
            Some(pack_id) => {
                let mut next = (*self.table).clone();
                self.reset_ids.extend(
                    next.entries
                        .values()
                        .filter(|e| {
                            e.definition.owner != BUILTIN_OWNER
                                && e.definition.pack_id.eq_ignore_ascii_case(pack_id)
                        })
                        .map(|e| e.definition.id.clone()),
                );
                let removed = next.remove_where(|d| {
                    d.owner != BUILTIN_OWNER && d.pack_id.eq_ignore_ascii_case(pack_id)
                });
                self.table = Arc::new(next);
                removed
            }
            None => {
                let removed = self.table.entries.len();
                self.reset_ids.extend(self.table.entries.keys().cloned());
                self.table = Arc::new(RegistryTable::default());
                self.register_builtin_overrides();
                removed
            }
        };
        tracing::info!(pack = ?pack_filter, removed, "registry reset");
        removed
    }

    /// Replace every definition of `layer` with `definitions` in one swap.
    ///
    /// Invalid entries and entries of another layer are skipped and
    /// returned; everything else becomes the layer's complete new set.
    pub fn sync(
        &mut self,
        definitions: Vec<AppearanceDefinition>,
        layer: LayerType,
    ) -> Vec<RegistryError> {
        let _span = TimingSpan::new("registry_sync");
        let mut rejected = Vec::new();
        let mut next = (*self.table).clone();
        let previous: Vec<String> = next.order.get(&layer).cloned().unwrap_or_default();
        next.remove_where(|d| d.layer == layer);

        for mut definition in definitions {
            if definition.layer != layer {
                rejected.push(RegistryError::WrongLayer {
                    id: definition.id,
                    expected: layer,
                    found: definition.layer,
                });
                continue;
            }
            if let Err(e) = definition.validate() {
                rejected.push(e.into());
                continue;
            }
            if next.entries.contains_key(&definition.id) {
                rejected.push(RegistryError::DuplicateId(definition.id));
                continue;
            }
            definition.normalize_item();
            if self.reset_ids.remove(&definition.id) || previous.contains(&definition.id) {
                self.dirty.push(definition.id.clone());
            }
            next.insert(definition, self.generation);
        }

        for e in &rejected {
            tracing::warn!(layer = %layer, "sync skipped definition: {}", e);
        }
        self.table = Arc::new(next);
        rejected
    }

    /// Ids rewritten since the last call, for the engine to mark dirty
    pub fn take_dirty_ids(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dirty)
    }

    /// Definitions of a layer whose tags contain `keyword`
    pub fn search_tags(&self, layer: LayerType, keyword: &str) -> Vec<Arc<AppearanceDefinition>> {
        self.lookup_all(layer)
            .into_iter()
            .filter(|d| d.has_tag(keyword))
            .collect()
    }

    /// Seed the built-in Shoes and Body recolour targets
    pub fn register_builtin_overrides(&mut self) {
        let generation = self.generation;
        let table = Arc::make_mut(&mut self.table);
        for (layer, name) in [
            (LayerType::Shoes, BUILTIN_SHOES_COLOR_OVERRIDE),
            (LayerType::Body, BUILTIN_BODY_COLOR_OVERRIDE),
        ] {
            let variant = DirectionalVariant::new(
                Size::default(),
                vec![FrameSet::new(
                    AnimationType::Static,
                    vec![Frame::new(SpriteRect::default(), 0)],
                )],
            );
            let definition = AppearanceDefinition::new(BUILTIN_OWNER, layer, name, BUILTIN_OWNER)
                .with_all_variants(variant);
            table.insert(definition, generation);
        }
    }
}
