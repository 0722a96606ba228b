use bevy::math::{Rect, Vec2};
use bevy::prelude::App;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use perception_core::{
    build_perception_app, run_frame, ActorDoc, ActorSheet, DarknessSource, FullRecomputeRequested,
    LightRegistry, LightSource, SceneContext, Token, TokenPlacement, WallIndex, WallSegment,
};

fn actor_doc(rng: &mut SmallRng) -> ActorDoc {
    let roll: f32 = rng.gen();
    let value = if roll < 0.25 {
        serde_json::json!({
            "type": "character",
            "system": {
                "perception": { "senses": [{ "type": "darkvision" }] }
            }
        })
    } else if roll < 0.35 {
        serde_json::json!({
            "type": "npc",
            "system": {
                "perception": {
                    "senses": [
                        { "type": "hearing", "acuity": "imprecise", "range": 60.0 },
                        { "type": "tremorsense", "acuity": "precise", "range": 30.0 }
                    ]
                }
            }
        })
    } else {
        serde_json::json!({ "type": "character" })
    };
    ActorDoc::new(value)
}

fn configure_perception_app(token_count: u32) -> App {
    let mut app = build_perception_app();
    let mut rng = SmallRng::seed_from_u64(0x5eed ^ u64::from(token_count));

    {
        let mut scene = app.world.resource_mut::<SceneContext>();
        scene.bounds = Rect::new(0.0, 0.0, 6_000.0, 6_000.0);
        // Dim ambient so darkvision and fallback channels both matter.
        scene.darkness_level = 0.5;
    }

    for id in 0..u64::from(token_count) {
        let position = Vec2::new(rng.gen_range(0.0..6_000.0), rng.gen_range(0.0..6_000.0));
        let doc = actor_doc(&mut rng);
        app.world.spawn((
            Token::new(id),
            TokenPlacement::at(position),
            ActorSheet::new(doc),
        ));
    }

    let walls: Vec<WallSegment> = (0..24)
        .map(|_| {
            let a = Vec2::new(rng.gen_range(0.0..6_000.0), rng.gen_range(0.0..6_000.0));
            let b = a + Vec2::new(rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0));
            WallSegment::solid(a, b)
        })
        .collect();
    app.world.resource_mut::<WallIndex>().replace_walls(walls);

    let lights: Vec<LightSource> = (0..12)
        .map(|_| {
            let center = Vec2::new(rng.gen_range(0.0..6_000.0), rng.gen_range(0.0..6_000.0));
            LightSource::new(center, 300.0, 600.0)
        })
        .collect();
    let darks: Vec<DarknessSource> = (0..3)
        .map(|_| {
            let center = Vec2::new(rng.gen_range(0.0..6_000.0), rng.gen_range(0.0..6_000.0));
            DarknessSource::circle(center, 240.0, 2)
        })
        .collect();
    {
        let mut registry = app.world.resource_mut::<LightRegistry>();
        registry.replace_lights(lights);
        registry.replace_darkness(darks);
    }

    app.world.send_event(FullRecomputeRequested);
    app
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("visibility_batch");

    for tokens in [8u32, 16, 32, 64] {
        group.bench_with_input(
            BenchmarkId::new("full_recompute", tokens),
            &tokens,
            |b, &tokens| {
                b.iter_batched(
                    || configure_perception_app(tokens),
                    |mut app| {
                        // First frame ingests the trigger and arms the
                        // deadline; the second passes it and runs the batch.
                        run_frame(&mut app, 0);
                        run_frame(&mut app, 200);
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(batch_benches, bench_batch);
criterion_main!(batch_benches);
