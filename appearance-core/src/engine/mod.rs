//! Appearance engine: the per-tick driver that ties the registry, condition
//! library, animation states, accessory slots, colours, outfits and sync
//! together for every tracked entity.
//!
//! The host game talks to it through two seams:
//!   - `AppearanceHost`: snapshots in, dirty/light/trigger callbacks out
//!   - `ChangeEvent` JSON: outbound via `drain_outbound`, inbound via `inbox`

pub mod config;
pub mod driver;
pub mod host;
pub mod pack;
pub mod plugin;

pub use config::{ConfigError, EngineConfig};
pub use driver::{AppearanceEngine, EngineError, TickReport};
pub use host::{AppearanceHost, RecordingHost};
pub use pack::{PackContents, PackLoadReport};
pub use plugin::{AppearanceEngineResource, AppearancePlugin, HostBridge};

// =====================================================
// Tests
// =====================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::AccessoryError;
    use crate::animation::{AnimationPhase, AnimationRuntimeState, LayerKey};
    use crate::appearance::tests::{frames, looping_hair};
    use crate::appearance::{
        AnimationType, AppearanceDefinition, DirectionalVariant, FrameSet, LayerType, LightSource,
        Size,
    };
    use crate::color::Color;
    use crate::constants::{
        KEY_ACCESSORY_IDS, LEGACY_KEY_ACCESSORY_COLOR, LEGACY_KEY_ACCESSORY_ID,
    };
    use crate::entity::{EntityId, PeerId};
    use crate::outfit::Outfit;
    use crate::persistence::SaveRecord;
    use crate::sync::ChangeKind;
    use std::time::Duration;

    const LOCAL: PeerId = PeerId(1);
    const REMOTE: PeerId = PeerId(2);
    const FARMER: EntityId = EntityId(10);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn accessory(name: &str, light: bool) -> AppearanceDefinition {
        let mut set = FrameSet::new(AnimationType::Loop, frames(2, 100));
        if light {
            set = set.with_light(LightSource {
                radius: 3.0,
                color: 0xFFD0_80FF,
                texture: None,
            });
        }
        AppearanceDefinition::new("carol", LayerType::Accessory, name, "carol.trinkets")
            .with_all_variants(DirectionalVariant::new(
                Size {
                    width: 16,
                    height: 16,
                },
                vec![set],
            ))
    }

    fn hair_pack() -> PackContents {
        let mut pack = PackContents::new("alice.hairpack", "Alice's Hair", "alice");
        pack.definitions = vec![looping_hair("bob"), looping_hair("braid")];
        pack
    }

    fn trinket_pack() -> PackContents {
        let mut pack = PackContents::new("carol.trinkets", "Trinkets", "carol");
        pack.definitions = vec![
            accessory("lantern", true),
            accessory("bow", false),
            accessory("pin", false),
            accessory("scarf", false),
        ];
        pack
    }

    fn hair(name: &str) -> String {
        format!("alice/Hair/{}", name)
    }

    fn trinket(name: &str) -> String {
        format!("carol/Accessory/{}", name)
    }

    fn engine_for(peer: PeerId) -> AppearanceEngine {
        let mut engine = AppearanceEngine::new(EngineConfig::for_peer(peer));
        assert!(engine.load_pack(hair_pack()).is_clean());
        assert!(engine.load_pack(trinket_pack()).is_clean());
        engine
    }

    fn local_farmer() -> AppearanceEngine {
        let mut engine = engine_for(LOCAL);
        engine.track_entity(FARMER, LOCAL);
        engine
    }

    fn host_at(location: &str) -> RecordingHost {
        let mut host = RecordingHost::new();
        host.snapshot_mut(FARMER).location = location.to_string();
        host
    }

    fn hair_state(engine: &AppearanceEngine) -> &AnimationRuntimeState {
        engine
            .entity(FARMER)
            .and_then(|e| e.animation(LayerKey::Layer(LayerType::Hair)))
            .unwrap()
    }

    // --- local mutation ---

    #[test]
    fn test_equip_layer_queues_event() {
        let mut engine = local_farmer();
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();

        assert_eq!(engine.entity(FARMER).unwrap().layer(LayerType::Hair), Some(hair("bob").as_str()));
        let events = engine.drain_outbound();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::LayerSwap);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[0].origin, LOCAL);
        assert!(engine.drain_outbound().is_empty());
    }

    #[test]
    fn test_equip_layer_rejections() {
        let mut engine = local_farmer();
        assert!(matches!(
            engine.equip_layer(FARMER, LayerType::Hat, &hair("bob")),
            Err(EngineError::WrongLayerType { expected: LayerType::Hat, found: LayerType::Hair, .. })
        ));
        assert!(matches!(
            engine.equip_layer(FARMER, LayerType::Hair, "nobody/Hair/none"),
            Err(EngineError::UnknownDefinition(_))
        ));
        assert!(matches!(
            engine.equip_layer(FARMER, LayerType::Accessory, &trinket("bow")),
            Err(EngineError::AccessoryLayer)
        ));
        assert!(matches!(
            engine.equip_layer(EntityId(99), LayerType::Hair, &hair("bob")),
            Err(EngineError::UnknownEntity(EntityId(99)))
        ));
        assert!(engine.drain_outbound().is_empty());
    }

    #[test]
    fn test_remote_owned_entity_is_read_only() {
        let mut engine = engine_for(LOCAL);
        engine.track_entity(FARMER, REMOTE);
        assert!(matches!(
            engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")),
            Err(EngineError::NotOwner { owner: REMOTE, .. })
        ));
        assert!(matches!(
            engine.set_color(FARMER, LayerType::Hair, 0, Some(Color::WHITE)),
            Err(EngineError::NotOwner { .. })
        ));
    }

    #[test]
    fn test_unequip_layer_reports_change() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        assert!(!engine.unequip_layer(FARMER, LayerType::Hair, &mut host).unwrap());
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        assert!(engine.unequip_layer(FARMER, LayerType::Hair, &mut host).unwrap());
        let entity = engine.entity(FARMER).unwrap();
        assert!(entity.layer(LayerType::Hair).is_none());
        assert!(entity.animation(LayerKey::Layer(LayerType::Hair)).is_none());
        assert_eq!(engine.drain_outbound().len(), 2);
    }

    #[test]
    fn test_accessory_slot_limit() {
        let mut engine = local_farmer();
        for (i, name) in ["bow", "pin", "scarf"].iter().enumerate() {
            assert_eq!(engine.equip_accessory(FARMER, &trinket(name), None).unwrap(), i);
        }
        assert!(matches!(
            engine.equip_accessory(FARMER, &trinket("lantern"), None),
            Err(EngineError::Accessory(AccessoryError::SlotLimitExceeded { max: 3 }))
        ));
        let entity = engine.entity(FARMER).unwrap();
        assert_eq!(entity.accessories.len(), 3);
        assert_eq!(entity.animations.len(), 3);
    }

    #[test]
    fn test_reorder_keeps_animation_progress() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_accessory(FARMER, &trinket("bow"), None).unwrap();
        engine.equip_accessory(FARMER, &trinket("pin"), None).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        engine.tick(ms(150), &mut host);
        engine.equip_accessory(FARMER, &trinket("scarf"), None).unwrap();

        engine.reorder_accessories(FARMER, &[2, 0, 1]).unwrap();
        let entity = engine.entity(FARMER).unwrap();
        assert_eq!(entity.accessories.ids(), vec![trinket("scarf"), trinket("bow"), trinket("pin")]);
        let bow = entity.accessory_animation(1).unwrap();
        assert_eq!(bow.definition_id, trinket("bow"));
        assert_eq!(bow.frame_index, 1);

        let last = engine.drain_outbound().pop().unwrap();
        assert_eq!(last.kind, ChangeKind::AccessoryReorder);
    }

    #[test]
    fn test_accessory_color_lives_on_the_slot() {
        let mut engine = local_farmer();
        engine.equip_accessory(FARMER, &trinket("bow"), None).unwrap();
        let red = Color::rgba(255, 0, 0, 255);
        engine.set_color(FARMER, LayerType::Accessory, 0, Some(red)).unwrap();
        engine.set_color(FARMER, LayerType::Hair, 0, Some(Color::WHITE)).unwrap();

        assert_eq!(engine.color(FARMER, LayerType::Accessory, 0), Some(red));
        assert_eq!(engine.color(FARMER, LayerType::Hair, 0), Some(Color::WHITE));
        assert!(matches!(
            engine.set_color(FARMER, LayerType::Accessory, 2, Some(red)),
            Err(EngineError::Accessory(_))
        ));

        engine.set_color(FARMER, LayerType::Hair, 0, None).unwrap();
        assert_eq!(engine.color(FARMER, LayerType::Hair, 0), None);
    }

    // --- tick ---

    #[test]
    fn test_tick_flushes_dirty_once_per_entity() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.set_color(FARMER, LayerType::Hair, 0, Some(Color::WHITE)).unwrap();
        engine.set_color(FARMER, LayerType::Hair, 1, Some(Color::WHITE)).unwrap();

        let report = engine.tick(ms(16), &mut host);
        assert_eq!(report.entities_dirtied, 1);
        assert_eq!(host.take_dirty().into_iter().collect::<Vec<_>>(), vec![FARMER]);

        let report = engine.tick(ms(16), &mut host);
        assert_eq!(report.entities_dirtied, 0);
        assert!(host.take_dirty().is_empty());
    }

    #[test]
    fn test_missing_snapshot_skips_entity() {
        let mut engine = local_farmer();
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        let mut host = RecordingHost::new();
        engine.tick(ms(16), &mut host);
        assert!(hair_state(&engine).dirty);
        assert!(hair_state(&engine).frame_set.is_none());
    }

    #[test]
    fn test_priming_tick_then_frames_advance() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();

        let report = engine.tick(ms(250), &mut host);
        assert_eq!(report.visual_changes, 1);
        assert_eq!(hair_state(&engine).frame_index, 0);

        engine.tick(ms(250), &mut host);
        let state = hair_state(&engine);
        assert_eq!(state.phase, AnimationPhase::Idle);
        assert_eq!(state.frame_index, 2);
        assert_eq!(state.elapsed_in_frame, ms(50));
        assert!(engine.current_frame(FARMER, LayerKey::Layer(LayerType::Hair)).is_some());
    }

    #[test]
    fn test_lights_follow_warps() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_accessory(FARMER, &trinket("lantern"), None).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        assert_eq!(host.lights.len(), 1);
        assert!(host.lights.keys().all(|(location, _)| location == "Farm"));

        assert_eq!(engine.on_warp(FARMER, "Town", &mut host), 0);
        assert_eq!(engine.on_warp(FARMER, "Farm", &mut host), 1);
        assert!(host.lights.is_empty());

        host.snapshot_mut(FARMER).location = "Town".into();
        engine.tick(ms(16), &mut host);
        assert_eq!(host.lights.len(), 1);
        assert!(host.lights.keys().all(|(location, _)| location == "Town"));
    }

    #[test]
    fn test_unequip_and_untrack_detach_lights() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_accessory(FARMER, &trinket("lantern"), None).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        engine.unequip_accessory(FARMER, 0, &mut host).unwrap();
        assert!(host.lights.is_empty());

        engine.equip_accessory(FARMER, &trinket("lantern"), None).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        assert_eq!(host.lights.len(), 1);
        let gone = engine.untrack_entity(FARMER, &mut host).unwrap();
        assert_eq!(gone.accessories.len(), 1);
        assert!(host.lights.is_empty());
        assert!(engine.entity(FARMER).is_none());
    }

    #[test]
    fn test_reset_animation_restarts() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        engine.tick(ms(120), &mut host);
        assert_eq!(hair_state(&engine).frame_index, 1);

        assert!(engine.reset_animation(FARMER, LayerType::Hair, None).unwrap());
        assert!(!engine.reset_animation(FARMER, LayerType::Hat, None).unwrap());
        engine.tick(ms(16), &mut host);
        assert_eq!(hair_state(&engine).frame_index, 0);
        let kinds: Vec<ChangeKind> = engine.drain_outbound().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::LayerSwap, ChangeKind::AnimationReset]);
    }

    // --- packs ---

    #[test]
    fn test_definition_leaving_registry_disables_until_it_returns() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.tick(Duration::ZERO, &mut host);

        engine.reset_packs(Some("alice.hairpack"));
        let report = engine.tick(ms(16), &mut host);
        assert_eq!(report.disabled, 1);
        assert!(hair_state(&engine).is_disabled());
        assert!(engine.entity(FARMER).unwrap().render_layers().is_empty());
        assert_eq!(engine.entity(FARMER).unwrap().layer(LayerType::Hair), Some(hair("bob").as_str()));

        engine.load_pack(hair_pack());
        engine.tick(ms(16), &mut host);
        assert!(!hair_state(&engine).is_disabled());
        assert_eq!(engine.entity(FARMER).unwrap().render_layers().len(), 1);
    }

    #[test]
    fn test_pack_reload_restarts_its_animations() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        engine.tick(ms(150), &mut host);
        assert_eq!(hair_state(&engine).frame_index, 1);

        engine.load_pack(hair_pack());
        engine.tick(Duration::ZERO, &mut host);
        let state = hair_state(&engine);
        assert_eq!(state.frame_index, 0);
        assert!(!state.dirty);
    }

    #[test]
    fn test_reset_then_register_shorter_definition_restarts() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.tick(Duration::ZERO, &mut host);
        engine.tick(ms(350), &mut host);
        assert_eq!(hair_state(&engine).frame_index, 3);

        engine.registry_mut().reset(Some("alice.hairpack"));
        let short = AppearanceDefinition::new("alice", LayerType::Hair, "bob", "alice.hairpack")
            .with_all_variants(DirectionalVariant::new(
                Size {
                    width: 16,
                    height: 32,
                },
                vec![FrameSet::new(AnimationType::Loop, frames(1, 100))],
            ));
        engine.registry_mut().register(short).unwrap();

        let report = engine.tick(ms(16), &mut host);
        assert_eq!(report.disabled, 0);
        let state = hair_state(&engine);
        assert_eq!(state.frame_index, 0);
        assert_eq!(state.phase, AnimationPhase::Transitioning);
        assert!(!state.dirty);

        engine.tick(ms(250), &mut host);
        assert_eq!(hair_state(&engine).frame_index, 0);
        assert!(engine.current_frame(FARMER, LayerKey::Layer(LayerType::Hair)).is_some());
    }

    #[test]
    fn test_reload_rejects_ids_shared_across_packs() {
        let mut engine = AppearanceEngine::new(EngineConfig::default());
        let mut copycat = PackContents::new("mallory.hair", "Copies", "mallory");
        copycat.definitions = vec![looping_hair("bob")];

        let reports = engine.reload_packs(vec![hair_pack(), copycat]);
        assert_eq!(reports[0].registered, 2);
        assert_eq!(reports[1].registered, 0);
        assert_eq!(reports[1].rejected.len(), 1);
        let bob = engine.registry().lookup(&hair("bob")).unwrap();
        assert_eq!(bob.pack_id, "alice.hairpack");
    }

    #[test]
    fn test_pack_presets_and_reset() {
        let mut engine = engine_for(LOCAL);
        let mut pack = hair_pack();
        pack.outfits.push(Outfit::new("Braided").with_layer(LayerType::Hair, &hair("braid")));
        let report = engine.load_pack(pack);
        assert_eq!(report.presets, 1);
        assert_eq!(engine.outfits().get("Braided").unwrap().author, "alice");

        engine.reset_packs(Some("alice.hairpack"));
        assert!(engine.outfits().get("Braided").is_none());
        assert!(engine.registry().lookup(&hair("braid")).is_none());
        assert!(engine.registry().lookup(&trinket("bow")).is_some());
    }

    // --- outfits ---

    #[test]
    fn test_outfit_capture_and_apply() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.equip_accessory(FARMER, &trinket("bow"), None).unwrap();
        engine.set_color(FARMER, LayerType::Hair, 0, Some(Color(0x3366_99FF))).unwrap();
        engine.save_outfit(FARMER, "Sunday").unwrap();

        engine.equip_layer(FARMER, LayerType::Hair, &hair("braid")).unwrap();
        engine.unequip_accessory(FARMER, 0, &mut host).unwrap();
        engine.set_color(FARMER, LayerType::Hair, 0, None).unwrap();
        engine.drain_outbound();

        let missing = engine.apply_outfit(FARMER, "Sunday", &mut host).unwrap();
        assert!(missing.is_empty());
        let entity = engine.entity(FARMER).unwrap();
        assert_eq!(entity.layer(LayerType::Hair), Some(hair("bob").as_str()));
        assert_eq!(entity.accessories.ids(), vec![trinket("bow")]);
        assert_eq!(engine.color(FARMER, LayerType::Hair, 0), Some(Color(0x3366_99FF)));
        assert_eq!(engine.drain_outbound().len(), 3);
    }

    #[test]
    fn test_apply_outfit_skips_missing_items() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("braid")).unwrap();
        let outfit = Outfit::new("Gone")
            .with_layer(LayerType::Hair, "mallory/Hair/mohawk")
            .with_accessory(&trinket("pin"), None)
            .with_accessory("mallory/Accessory/cape", None);
        engine.outfits_mut().save(outfit).unwrap();

        let missing = engine.apply_outfit(FARMER, "Gone", &mut host).unwrap();
        assert_eq!(missing.len(), 2);
        let entity = engine.entity(FARMER).unwrap();
        assert_eq!(entity.layer(LayerType::Hair), Some(hair("braid").as_str()));
        assert_eq!(entity.accessories.ids(), vec![trinket("pin")]);

        assert!(matches!(
            engine.apply_outfit(FARMER, "Nope", &mut host),
            Err(EngineError::Outfit(_))
        ));
    }

    // --- sync ---

    #[test]
    fn test_remote_events_converge() {
        let mut owner = local_farmer();
        let mut viewer = engine_for(REMOTE);
        viewer.track_entity(FARMER, LOCAL);
        let mut host = host_at("Farm");

        owner.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        owner.equip_accessory(FARMER, &trinket("lantern"), None).unwrap();
        owner.set_color(FARMER, LayerType::Hair, 0, Some(Color::WHITE)).unwrap();
        let wire: Vec<String> = owner.drain_outbound().iter().map(|e| e.to_json()).collect();
        for json in &wire {
            viewer.receive_json(json).unwrap();
        }

        let report = viewer.tick(Duration::ZERO, &mut host);
        assert_eq!(report.remote_applied, 3);
        let seen = viewer.entity(FARMER).unwrap();
        assert_eq!(seen.layer(LayerType::Hair), Some(hair("bob").as_str()));
        assert_eq!(seen.accessories.ids(), vec![trinket("lantern")]);
        assert_eq!(viewer.color(FARMER, LayerType::Hair, 0), Some(Color::WHITE));
        assert_eq!(host.lights.len(), 1);
        assert!(viewer.drain_outbound().is_empty());

        for json in &wire {
            viewer.receive_json(json).unwrap();
        }
        let report = viewer.tick(ms(16), &mut host);
        assert_eq!(report.remote_applied, 0);
        assert_eq!(report.remote_discarded, 3);
    }

    #[test]
    fn test_remote_unequip_detaches_viewer_light() {
        let mut owner = local_farmer();
        let mut viewer = engine_for(REMOTE);
        viewer.track_entity(FARMER, LOCAL);
        let mut owner_host = host_at("Farm");
        let mut viewer_host = host_at("Farm");

        owner.equip_accessory(FARMER, &trinket("lantern"), None).unwrap();
        for event in owner.drain_outbound() {
            viewer.receive(event);
        }
        viewer.tick(Duration::ZERO, &mut viewer_host);
        assert_eq!(viewer_host.lights.len(), 1);

        owner.unequip_accessory(FARMER, 0, &mut owner_host).unwrap();
        for event in owner.drain_outbound() {
            viewer.receive(event);
        }
        viewer.tick(ms(16), &mut viewer_host);
        assert!(viewer_host.lights.is_empty());
        assert!(viewer.entity(FARMER).unwrap().accessories.is_empty());
    }

    #[test]
    fn test_broadcast_full_state() {
        let mut engine = local_farmer();
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.equip_accessory(FARMER, &trinket("bow"), None).unwrap();
        engine.set_color(FARMER, LayerType::Shirt, 1, Some(Color::WHITE)).unwrap();
        engine.drain_outbound();

        assert_eq!(engine.broadcast_full_state(FARMER).unwrap(), 3);
        let events = engine.drain_outbound();
        assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    // --- persistence ---

    #[test]
    fn test_save_load_roundtrip() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        engine.equip_layer(FARMER, LayerType::Hair, &hair("bob")).unwrap();
        engine.equip_accessory(FARMER, &trinket("bow"), None).unwrap();
        engine.equip_accessory(FARMER, &trinket("pin"), None).unwrap();
        engine.set_color(FARMER, LayerType::Accessory, 1, Some(Color::WHITE)).unwrap();
        let mut record = SaveRecord::new();
        engine.save_entity(FARMER, &mut record).unwrap();

        let mut fresh = local_farmer();
        let report = fresh.load_entity(FARMER, &mut record, &mut host).unwrap();
        assert!(report.steps_applied.is_empty());
        let entity = fresh.entity(FARMER).unwrap();
        assert_eq!(entity.layer(LayerType::Hair), Some(hair("bob").as_str()));
        assert_eq!(entity.accessories.ids(), vec![trinket("bow"), trinket("pin")]);
        assert_eq!(fresh.color(FARMER, LayerType::Accessory, 1), Some(Color::WHITE));
        assert_eq!(entity.animations.len(), 3);
    }

    #[test]
    fn test_load_upgrades_legacy_record() {
        let mut engine = local_farmer();
        let mut host = host_at("Farm");
        let mut record = SaveRecord::new();
        record.insert("appearance/layer/Hair".into(), hair("braid"));
        record.insert(LEGACY_KEY_ACCESSORY_ID.into(), trinket("scarf"));
        record.insert(LEGACY_KEY_ACCESSORY_COLOR.into(), "#FF0000".into());

        let report = engine.load_entity(FARMER, &mut record, &mut host).unwrap();
        assert_eq!(report.original_version, 1);
        assert!(!record.contains_key(LEGACY_KEY_ACCESSORY_ID));
        assert!(record.contains_key(KEY_ACCESSORY_IDS));
        let entity = engine.entity(FARMER).unwrap();
        assert_eq!(entity.accessories.ids(), vec![trinket("scarf")]);
        assert_eq!(
            engine.color(FARMER, LayerType::Accessory, 0),
            Some(Color::rgba(255, 0, 0, 255))
        );

        let again = engine.load_entity(FARMER, &mut record, &mut host).unwrap();
        assert!(again.steps_applied.is_empty());
        assert_eq!(engine.entity(FARMER).unwrap().accessories.len(), 1);
    }
}
