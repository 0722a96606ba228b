use std::path::PathBuf;
use std::sync::Once;

use bevy::math::Vec2;
use bevy::prelude::{App, Entity};
use perception_core::{
    run_frame, ActorDoc, ActorSheet, Token, TokenChangedEvent, TokenPlacement,
    VisibilityMapService,
};
use perception_schema::{TokenId, VisibilityState};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_perception_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test perception config at {}",
            config_path.display()
        );

        std::env::set_var("PERCEPTION_CONFIG_PATH", &config_path);
    });
}

/// Feet to scene pixels at the default grid scale (100 px per 5 ft square).
pub fn px(feet: f32) -> f32 {
    feet / 5.0 * 100.0
}

/// Spawns a token with an actor document and announces it to the pipeline.
pub fn spawn_token(app: &mut App, id: u64, x: f32, y: f32, doc: serde_json::Value) -> Entity {
    let entity = app
        .world
        .spawn((
            Token::new(id),
            TokenPlacement::at(Vec2::new(x, y)),
            ActorSheet::new(ActorDoc::new(doc)),
        ))
        .id();
    app.world.send_event(TokenChangedEvent { entity });
    entity
}

/// Runs frames until the default coalesce and movement-quiet windows have
/// both passed, so any armed batch has resolved.
pub fn settle(app: &mut App) {
    run_frame(app, 0);
    run_frame(app, 400);
    run_frame(app, 0);
}

pub fn state(app: &App, observer: u64, target: u64) -> VisibilityState {
    app.world
        .resource::<VisibilityMapService>()
        .state_between(TokenId(observer), TokenId(target))
}
