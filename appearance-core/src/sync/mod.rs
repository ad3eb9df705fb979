//! Sync Broadcaster
//!
//! Every local mutation that changes what peers see becomes a `ChangeEvent`
//! stamped with the entity's next sequence number. Remote events are queued
//! in a `SyncInbox` (safe to push from a network thread) and only applied
//! when the tick drains it.
//!
//! Admission rules for a remote event:
//! 1. The integrity hash must match
//! 2. The entity must be tracked and owned by another peer
//! 3. The event must come from that owning peer
//! 4. Its sequence must be greater than the last one applied for the same
//!    (entity, layer, slot); anything else is stale and dropped silently

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::accessory::AccessoryRecord;
use crate::appearance::{Facing, LayerType};
use crate::color::Color;
use crate::entity::{EntityId, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    LayerSwap,
    ColorChange,
    AnimationReset,
    AccessoryEquip,
    AccessoryUnequip,
    AccessoryReorder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangePayload {
    /// `None` unequips the layer
    Layer { definition_id: Option<String> },
    /// `None` restores the definition default
    Color { color: Option<Color> },
    AnimationReset { facing: Option<Facing> },
    /// Complete accessory list in draw order
    Accessories { slots: Vec<AccessoryRecord> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: EntityId,
    /// Peer that produced the event
    pub origin: PeerId,
    pub kind: ChangeKind,
    pub layer_type: LayerType,
    #[serde(default)]
    pub slot_index: Option<u8>,
    pub payload: ChangePayload,
    pub sequence: u64,
    /// Integrity hash over every other field
    pub hash: u64,
}

impl ChangeEvent {
    pub fn new(
        entity_id: EntityId,
        origin: PeerId,
        kind: ChangeKind,
        layer_type: LayerType,
        slot_index: Option<u8>,
        payload: ChangePayload,
        sequence: u64,
    ) -> Self {
        let mut event = Self {
            entity_id,
            origin,
            kind,
            layer_type,
            slot_index,
            payload,
            sequence,
            hash: 0,
        };
        event.hash = event.compute_hash();
        event
    }

    fn compute_hash(&self) -> u64 {
        let mut hasher = Sha3_256::new();
        hasher.update(self.entity_id.0.to_le_bytes());
        hasher.update(self.origin.0.to_le_bytes());
        hasher.update((self.kind as u32).to_le_bytes());
        hasher.update((self.layer_type as u32).to_le_bytes());
        hasher.update(self.slot_index.map_or(u16::MAX, u16::from).to_le_bytes());
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(serde_json::to_vec(&self.payload).unwrap_or_default());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }

    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Key under which the last applied sequence is tracked
    pub fn track_key(&self) -> (EntityId, LayerType, Option<u8>) {
        match self.layer_type {
            // Accessory list events always carry the whole list
            LayerType::Accessory if matches!(self.payload, ChangePayload::Accessories { .. }) => {
                (self.entity_id, LayerType::Accessory, None)
            }
            layer => (self.entity_id, layer, self.slot_index),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Why a remote event was dropped. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Sequence not greater than the last applied one
    Stale,
    /// This peer owns the entity; its own stream is authoritative
    LocallyOwned,
    /// Sent by a peer that does not own the entity
    WrongOrigin,
    UnknownEntity,
    /// Integrity hash mismatch
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Discarded(DiscardReason),
}

/// Thread-safe queue between the network transport and the tick loop
#[derive(Debug, Clone, Default)]
pub struct SyncInbox(Arc<Mutex<VecDeque<ChangeEvent>>>);

impl SyncInbox {
    pub fn push(&self, event: ChangeEvent) {
        self.0.lock().push_back(event);
    }

    pub fn push_json(&self, json: &str) -> Result<(), serde_json::Error> {
        self.push(ChangeEvent::from_json(json)?);
        Ok(())
    }

    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.0.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Debug)]
pub struct SyncBroadcaster {
    local_peer: PeerId,
    owners: HashMap<EntityId, PeerId>,
    next_sequence: HashMap<EntityId, u64>,
    last_applied: HashMap<(EntityId, LayerType, Option<u8>), u64>,
    outbound: Vec<ChangeEvent>,
    inbox: SyncInbox,
}

impl SyncBroadcaster {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            owners: HashMap::new(),
            next_sequence: HashMap::new(),
            last_applied: HashMap::new(),
            outbound: Vec::new(),
            inbox: SyncInbox::default(),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn track(&mut self, entity: EntityId, owner: PeerId) {
        self.owners.insert(entity, owner);
    }

    /// Forget an entity and the remote sequences applied to it. Local
    /// sequence counters survive so a re-tracked entity never reuses one.
    pub fn untrack(&mut self, entity: EntityId) {
        self.owners.remove(&entity);
        self.last_applied.retain(|(e, _, _), _| *e != entity);
    }

    pub fn owner(&self, entity: EntityId) -> Option<PeerId> {
        self.owners.get(&entity).copied()
    }

    pub fn is_local(&self, entity: EntityId) -> bool {
        self.owner(entity) == Some(self.local_peer)
    }

    /// Stamp and queue a local change. `None` when this peer does not own
    /// the entity.
    pub fn record(
        &mut self,
        entity: EntityId,
        kind: ChangeKind,
        layer_type: LayerType,
        slot_index: Option<u8>,
        payload: ChangePayload,
    ) -> Option<u64> {
        if !self.is_local(entity) {
            return None;
        }
        let next = self.next_sequence.entry(entity).or_insert(0);
        *next += 1;
        let sequence = *next;
        let event = ChangeEvent::new(
            entity,
            self.local_peer,
            kind,
            layer_type,
            slot_index,
            payload,
            sequence,
        );
        tracing::debug!(entity = %entity, ?kind, sequence, "queued change event");
        self.outbound.push(event);
        Some(sequence)
    }

    /// Events for the transport to broadcast
    pub fn drain_outbound(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.outbound)
    }

    pub fn inbox(&self) -> SyncInbox {
        self.inbox.clone()
    }

    /// Decide whether a remote event may be applied, recording its sequence
    /// when it may
    pub fn admit(&mut self, event: &ChangeEvent) -> Result<(), DiscardReason> {
        if !event.verify() {
            tracing::warn!(entity = %event.entity_id, sequence = event.sequence, "corrupt change event");
            return Err(DiscardReason::Corrupt);
        }
        let owner = self
            .owner(event.entity_id)
            .ok_or(DiscardReason::UnknownEntity)?;
        if owner == self.local_peer {
            return Err(DiscardReason::LocallyOwned);
        }
        if event.origin != owner {
            tracing::debug!(
                entity = %event.entity_id,
                origin = %event.origin,
                owner = %owner,
                "change event from non-owning peer"
            );
            return Err(DiscardReason::WrongOrigin);
        }

        let key = event.track_key();
        if let Some(&last) = self.last_applied.get(&key) {
            if event.sequence <= last {
                tracing::trace!(entity = %event.entity_id, sequence = event.sequence, last, "stale change event");
                return Err(DiscardReason::Stale);
            }
        }
        self.last_applied.insert(key, event.sequence);
        Ok(())
    }

    pub fn last_applied(&self, entity: EntityId, layer: LayerType, slot: Option<u8>) -> Option<u64> {
        self.last_applied.get(&(entity, layer, slot)).copied()
    }
}
