use bevy::prelude::{App, Plugin, Res, ResMut, Resource, Time, Update};
use std::sync::{Arc, RwLock};

use crate::engine::config::EngineConfig;
use crate::engine::driver::AppearanceEngine;
use crate::engine::host::AppearanceHost;
use crate::logging::init_tracing;

/// Runs the appearance engine once per frame inside a Bevy app
#[derive(Default)]
pub struct AppearancePlugin {
    pub config: EngineConfig,
}

impl Plugin for AppearancePlugin {
    fn build(&self, app: &mut App) {
        init_tracing(&self.config.tracing);
        let engine = AppearanceEngine::new(self.config.clone());

        app.insert_resource(AppearanceEngineResource(Arc::new(RwLock::new(engine))))
            .add_systems(Update, appearance_tick_system);
    }
}

#[derive(Resource, Clone)]
pub struct AppearanceEngineResource(pub Arc<RwLock<AppearanceEngine>>);

/// The game's side of the engine; ticking waits until one is inserted
#[derive(Resource)]
pub struct HostBridge(pub Box<dyn AppearanceHost + Send + Sync>);

impl HostBridge {
    pub fn new(host: impl AppearanceHost + Send + Sync + 'static) -> Self {
        Self(Box::new(host))
    }
}

fn appearance_tick_system(
    time: Res<Time>,
    engine_res: Res<AppearanceEngineResource>,
    host: Option<ResMut<HostBridge>>,
) {
    let Some(mut host) = host else {
        return;
    };
    if let Ok(mut engine) = engine_res.0.write() {
        engine.tick(time.delta(), host.0.as_mut());
    }
}
