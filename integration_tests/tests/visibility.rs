mod common;

use bevy::math::Vec2;
use perception_core::{
    build_perception_app, ActorDoc, ActorSheet, DarknessSource, EffectsChangedEvent,
    FullRecomputeRequested, LightRegistry, LightSource, LightsChangedEvent, SceneContext,
    VisibilityMapService, WallIndex, WallSegment, WallsChangedEvent,
};
use perception_schema::{TokenId, VisibilityState};
use serde_json::json;

/// Test that ambient darkness hides targets from plain sight while
/// darkvision keeps seeing normally.
#[test]
fn ambient_darkness_respects_darkvision() {
    common::ensure_test_config();
    let mut app = build_perception_app();
    app.world.resource_mut::<SceneContext>().darkness_level = 1.0;

    common::spawn_token(
        &mut app,
        1,
        common::px(10.0),
        common::px(10.0),
        json!({ "type": "character" }),
    );
    common::spawn_token(
        &mut app,
        2,
        common::px(40.0),
        common::px(10.0),
        json!({
            "type": "character",
            "system": { "perception": { "senses": [{ "type": "darkvision" }] } }
        }),
    );
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Hidden);
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Observed);
}

/// Test the magical darkness pocket against the three tiers of vision:
/// no darkvision, darkvision, greater darkvision.
#[test]
fn magical_darkness_grades_by_vision_tier() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    let target_pos = Vec2::new(2_000.0, 2_000.0);
    app.world
        .resource_mut::<LightRegistry>()
        .replace_darkness(vec![DarknessSource::circle(target_pos, 300.0, 4)]);

    common::spawn_token(&mut app, 9, target_pos.x, target_pos.y, json!({ "type": "character" }));
    // Observers 30 ft out in different directions, all outside the pocket.
    common::spawn_token(&mut app, 1, 1_400.0, 2_000.0, json!({ "type": "character" }));
    common::spawn_token(
        &mut app,
        2,
        2_600.0,
        2_000.0,
        json!({
            "type": "character",
            "system": { "perception": { "senses": [{ "type": "darkvision" }] } }
        }),
    );
    common::spawn_token(
        &mut app,
        3,
        2_000.0,
        1_400.0,
        json!({
            "type": "character",
            "system": { "perception": { "senses": [{ "type": "greater-darkvision" }] } }
        }),
    );
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 9), VisibilityState::Hidden);
    assert_eq!(common::state(&app, 2, 9), VisibilityState::Concealed);
    assert_eq!(common::state(&app, 3, 9), VisibilityState::Observed);

    // The pocket only covers the target; looking out of it is unimpeded.
    assert_eq!(common::state(&app, 9, 1), VisibilityState::Observed);
}

/// Test that a blinded observer localizes by hearing and pinpoints with an
/// echolocation effect, within that effect's range.
#[test]
fn blinded_observers_fall_back_to_hearing_and_echolocation() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    let hearing_only = json!({
        "type": "character",
        "system": {
            "conditions": { "blinded": true },
            "perception": {
                "senses": [{ "type": "hearing", "acuity": "imprecise", "range": 60.0 }]
            }
        }
    });
    let with_echolocation = json!({
        "type": "character",
        "system": {
            "conditions": { "blinded": true },
            "perception": {
                "senses": [{ "type": "hearing", "acuity": "imprecise", "range": 60.0 }]
            }
        },
        "items": [{ "type": "effect", "system": { "slug": "effect-echolocation" } }]
    });

    common::spawn_token(
        &mut app,
        9,
        common::px(50.0),
        common::px(50.0),
        json!({ "type": "character" }),
    );
    // 30 ft away: inside both hearing and echolocation range.
    common::spawn_token(&mut app, 1, common::px(20.0), common::px(50.0), hearing_only);
    common::spawn_token(
        &mut app,
        2,
        common::px(80.0),
        common::px(50.0),
        with_echolocation.clone(),
    );
    // 50 ft away: past the default 40 ft echolocation reach.
    common::spawn_token(&mut app, 3, common::px(50.0), common::px(100.0), with_echolocation);
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 9), VisibilityState::Hidden);
    assert_eq!(common::state(&app, 2, 9), VisibilityState::Observed);
    assert_eq!(common::state(&app, 3, 9), VisibilityState::Hidden);
}

/// Test that a sight wall drops the pair to Undetected and that clearing
/// the wall restores it, including every cache in between.
#[test]
fn sight_walls_block_until_removed() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    app.world
        .resource_mut::<WallIndex>()
        .replace_walls(vec![WallSegment::solid(
            Vec2::new(1_000.0, 300.0),
            Vec2::new(1_000.0, 900.0),
        )]);

    common::spawn_token(&mut app, 1, 600.0, 600.0, json!({ "type": "character" }));
    common::spawn_token(&mut app, 2, 1_400.0, 600.0, json!({ "type": "character" }));
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Undetected);
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Undetected);

    app.world.resource_mut::<WallIndex>().replace_walls(Vec::new());
    app.world.send_event(WallsChangedEvent);
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Observed);
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Observed);
}

/// Test that a torch pocket upgrades a dim scene to bright at the target
/// and that the light edit propagates without any token moving.
#[test]
fn torch_pocket_upgrades_dim_ambient() {
    common::ensure_test_config();
    let mut app = build_perception_app();
    app.world.resource_mut::<SceneContext>().darkness_level = 0.5;

    let target_pos = Vec2::new(common::px(40.0), common::px(10.0));
    common::spawn_token(
        &mut app,
        1,
        common::px(10.0),
        common::px(10.0),
        json!({ "type": "character" }),
    );
    common::spawn_token(&mut app, 2, target_pos.x, target_pos.y, json!({ "type": "character" }));
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Concealed);

    app.world
        .resource_mut::<LightRegistry>()
        .replace_lights(vec![LightSource::new(target_pos, 300.0, 600.0)]);
    app.world.send_event(LightsChangedEvent);
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Observed);
}

/// Test that a silence effect mutes its bearer even across open ground,
/// while an unsilenced token at the same distance is still heard.
#[test]
fn silenced_target_cannot_be_heard() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    common::spawn_token(
        &mut app,
        1,
        common::px(10.0),
        common::px(10.0),
        json!({
            "type": "character",
            "system": {
                "conditions": { "blinded": true },
                "perception": {
                    "senses": [{ "type": "hearing", "acuity": "imprecise", "range": 60.0 }]
                }
            }
        }),
    );
    // Both targets 30 ft out, well inside hearing range.
    common::spawn_token(
        &mut app,
        2,
        common::px(40.0),
        common::px(10.0),
        json!({
            "type": "character",
            "items": [{ "type": "effect", "system": { "slug": "effect-silence" } }]
        }),
    );
    common::spawn_token(&mut app, 3, common::px(10.0), common::px(40.0), json!({ "type": "character" }));
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Undetected);
    assert_eq!(common::state(&app, 1, 3), VisibilityState::Hidden);

    // Silence mutes sound only; the silenced actor still sees normally.
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Observed);
}

/// Test that dazzled turns a clean look into Concealed without touching
/// the reverse direction.
#[test]
fn dazzled_observer_sees_everything_concealed() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    common::spawn_token(
        &mut app,
        1,
        common::px(10.0),
        common::px(10.0),
        json!({
            "type": "character",
            "system": { "conditions": { "dazzled": true } }
        }),
    );
    common::spawn_token(
        &mut app,
        2,
        common::px(30.0),
        common::px(10.0),
        json!({ "type": "character" }),
    );
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Concealed);
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Observed);
}

/// Test that a manual override outlives recomputes and that clearing it
/// reveals the freshly computed state underneath.
#[test]
fn override_pins_effective_state_until_cleared() {
    common::ensure_test_config();
    let mut app = build_perception_app();

    common::spawn_token(&mut app, 1, common::px(10.0), common::px(10.0), json!({ "type": "character" }));
    common::spawn_token(&mut app, 2, common::px(40.0), common::px(10.0), json!({ "type": "character" }));
    common::settle(&mut app);
    assert_eq!(common::state(&app, 1, 2), VisibilityState::Observed);

    app.world
        .resource_mut::<VisibilityMapService>()
        .set_override(TokenId(1), TokenId(2), VisibilityState::Hidden);
    app.world.send_event(FullRecomputeRequested);
    common::settle(&mut app);

    assert_eq!(common::state(&app, 1, 2), VisibilityState::Hidden);
    assert!(app
        .world
        .resource::<VisibilityMapService>()
        .has_override(TokenId(1), TokenId(2)));

    let cleared = app
        .world
        .resource_mut::<VisibilityMapService>()
        .clear_override(TokenId(1), TokenId(2));
    assert!(cleared);
    assert_eq!(common::state(&app, 1, 2), VisibilityState::Observed);
}

/// Test that a sneaking token's states as a target are frozen while its own
/// view of others keeps updating.
#[test]
fn sneaking_target_keeps_its_frozen_state() {
    common::ensure_test_config();
    let mut app = build_perception_app();
    app.world.resource_mut::<SceneContext>().darkness_level = 1.0;

    common::spawn_token(&mut app, 1, common::px(10.0), common::px(10.0), json!({ "type": "character" }));
    let sneak = common::spawn_token(
        &mut app,
        2,
        common::px(40.0),
        common::px(10.0),
        json!({ "type": "character" }),
    );
    common::settle(&mut app);
    assert_eq!(common::state(&app, 1, 2), VisibilityState::Hidden);
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Hidden);

    // Start sneaking, then turn the lights on scene-wide.
    app.world.entity_mut(sneak).insert(ActorSheet::new(ActorDoc::new(json!({
        "type": "character",
        "flags": { "umbra": { "sneakActive": true } }
    }))));
    app.world.send_event(EffectsChangedEvent { entity: sneak });
    app.world.resource_mut::<SceneContext>().darkness_level = 0.0;
    app.world.send_event(FullRecomputeRequested);
    common::settle(&mut app);

    // The sneaker still sees others normally; others' view of it is frozen.
    assert_eq!(common::state(&app, 2, 1), VisibilityState::Observed);
    assert_eq!(common::state(&app, 1, 2), VisibilityState::Hidden);

    // Dropping sneak lets the next batch publish the real state.
    app.world.entity_mut(sneak).insert(ActorSheet::new(ActorDoc::new(
        json!({ "type": "character" }),
    )));
    app.world.send_event(EffectsChangedEvent { entity: sneak });
    common::settle(&mut app);
    assert_eq!(common::state(&app, 1, 2), VisibilityState::Observed);
}
