//! appearance-sim: two peers dress one farmer and keep each other in sync
//! over JSON change events, headless.
//!
//! Usage: `appearance-sim [config.json|config.ron]`

use anyhow::Context;
use std::time::Duration;
use tracing::{info, warn};

use appearance_core::appearance::{Size, SpriteRect};
use appearance_core::condition::{ConditionField, ConditionValue, Operator};
use appearance_core::logging::init_tracing;
use appearance_core::{
    AnimationType, AppearanceDefinition, AppearanceEngine, Color, Condition, ConditionGroup,
    DirectionalVariant, EngineConfig, EntityId, Frame, FrameSet, LayerType, LightSource,
    PackContents, PeerId, RecordingHost, SaveRecord,
};

const OWNER: PeerId = PeerId(1);
const VIEWER: PeerId = PeerId(2);
const FARMER: EntityId = EntityId(1);
const STEP: Duration = Duration::from_millis(16);
const FRAMES: u32 = 240;

fn strip(count: u32, duration_ms: u32) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            Frame::new(
                SpriteRect {
                    x: i * 16,
                    y: 0,
                    width: 16,
                    height: 32,
                },
                duration_ms,
            )
        })
        .collect()
}

fn demo_pack() -> PackContents {
    let size = Size {
        width: 16,
        height: 32,
    };
    let mut pack = PackContents::new("sim.demo", "Simulation Demo", "sim");
    pack.condition_groups.push((
        "raining".into(),
        ConditionGroup::all(vec![Condition::new(
            ConditionField::Weather,
            Operator::In,
            ConditionValue::List(vec![
                ConditionValue::Text("rainy".into()),
                ConditionValue::Text("stormy".into()),
            ]),
        )]),
    ));

    let hair = AppearanceDefinition::new("sim", LayerType::Hair, "ponytail", "sim.demo")
        .with_all_variants(DirectionalVariant::new(
            size,
            vec![
                FrameSet::new(AnimationType::Loop, strip(2, 200))
                    .named("wet")
                    .when(ConditionGroup::default().referencing("raining")),
                FrameSet::new(AnimationType::Loop, strip(4, 120)),
            ],
        ));
    let lantern = AppearanceDefinition::new("sim", LayerType::Accessory, "lantern", "sim.demo")
        .with_all_variants(DirectionalVariant::new(
            size,
            vec![FrameSet::new(AnimationType::Randomized, strip(3, 150)).with_light(LightSource {
                radius: 4.0,
                color: 0xFFC8_70FF,
                texture: None,
            })],
        ));
    pack.definitions = vec![hair, lantern];
    pack
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config.tracing);

    let mut owner = AppearanceEngine::new(EngineConfig {
        local_peer: OWNER,
        ..config.clone()
    });
    let mut viewer = AppearanceEngine::new(EngineConfig {
        local_peer: VIEWER,
        ..config
    });
    for engine in [&mut owner, &mut viewer] {
        let report = engine.load_pack(demo_pack());
        if !report.is_clean() {
            warn!(rejected = ?report.rejected, warnings = ?report.condition_warnings, "demo pack loaded with problems");
        }
        engine.track_entity(FARMER, OWNER);
    }

    let mut owner_host = RecordingHost::new();
    owner_host.snapshot_mut(FARMER).location = "Farm".into();
    let mut viewer_host = owner_host.clone();

    owner.equip_layer(FARMER, LayerType::Hair, "sim/Hair/ponytail")?;
    owner.equip_accessory(FARMER, "sim/Accessory/lantern", None)?;
    owner.set_color(FARMER, LayerType::Hair, 0, Some(Color::rgba(180, 90, 40, 255)))?;

    let mut wire_bytes = 0;
    for frame in 0..FRAMES {
        if frame == FRAMES / 2 {
            for host in [&mut owner_host, &mut viewer_host] {
                host.snapshot_mut(FARMER).weather = "rainy".into();
            }
            info!(frame, "weather turned");
        }
        if frame == FRAMES * 3 / 4 {
            owner.on_warp(FARMER, "Farm", &mut owner_host);
            viewer.on_warp(FARMER, "Farm", &mut viewer_host);
            for host in [&mut owner_host, &mut viewer_host] {
                host.snapshot_mut(FARMER).location = "Town".into();
            }
            info!(frame, "farmer warped to town");
        }

        for event in owner.drain_outbound() {
            let json = event.to_json();
            wire_bytes += json.len();
            viewer.receive_json(&json)?;
        }
        owner.tick(STEP, &mut owner_host);
        viewer.tick(STEP, &mut viewer_host);
    }

    let seen = viewer
        .entity(FARMER)
        .context("viewer lost track of the farmer")?;
    println!("viewer sees {} layer(s) after {} frames:", seen.render_layers().len(), FRAMES);
    for layer in seen.render_layers() {
        println!(
            "  {:<14} {:<24} set={:?} frame={} color={}",
            layer.key.to_string(),
            layer.definition_id,
            layer.state.frame_set,
            layer.state.frame_index,
            layer.color.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    println!("lights on viewer side: {:?}", viewer_host.lights.keys().collect::<Vec<_>>());
    println!("frame triggers: {}, wire bytes: {}", viewer_host.triggers.len(), wire_bytes);

    let mut record = SaveRecord::new();
    owner.save_entity(FARMER, &mut record)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
