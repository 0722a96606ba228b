use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener};
use std::thread;

use bevy::app::Update;
use bevy::math::Vec2;
use bevy::prelude::Entity;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use perception_core::metrics::{collect_metrics, PerceptionMetrics};
use perception_core::{
    build_perception_app, run_frame, ActorDoc, ActorSheet, DarknessSource,
    FullRecomputeRequested, LightRegistry, LightSource, LightsChangedEvent, RefreshHub,
    SceneContext, SceneResetEvent, Token, TokenChangedEvent, TokenMovedEvent, TokenPlacement,
    TokenRemovedEvent, VisibilityMapService, WallIndex, WallSegment, WallsChangedEvent,
};
use perception_schema::TokenId;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut app = build_perception_app();
    app.insert_resource(PerceptionMetrics::default());
    app.add_systems(Update, collect_metrics);

    let bind_addr: SocketAddr = std::env::var("UMBRA_COMMAND_BIND")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| ([127, 0, 0, 1], 4870).into());
    let command_rx = spawn_command_listener(bind_addr);

    let refresh_rx = app.world.resource::<RefreshHub>().subscribe();
    thread::spawn(move || {
        while let Ok(envelope) = refresh_rx.recv() {
            info!(
                target: "umbra::server",
                frame = envelope.frame,
                changed = envelope.changed_pairs,
                clock_ms = envelope.clock_ms,
                "refresh.received"
            );
        }
    });

    info!(
        command_bind = %bind_addr,
        "perception headless server ready"
    );

    // TokenId -> Entity, maintained by spawn/remove commands.
    let mut registry: HashMap<u64, Entity> = HashMap::new();

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::Tick { elapsed_ms } => {
                run_frame(&mut app, elapsed_ms);
                let metrics = app.world.resource::<PerceptionMetrics>();
                info!(
                    target: "umbra::server",
                    frame = metrics.frame,
                    batches = metrics.batches_run,
                    stored = metrics.stored_states,
                    "tick.completed"
                );
            }
            Command::Spawn { id, x, y, doc } => {
                handle_spawn(&mut app, &mut registry, id, x, y, doc);
            }
            Command::Move { id, x, y } => {
                if let Some(&entity) = registry.get(&id) {
                    app.world.send_event(TokenMovedEvent {
                        entity,
                        position: Vec2::new(x, y),
                    });
                } else {
                    warn!(target: "umbra::server", id, "move.unknown_token");
                }
            }
            Command::Commit { id, x, y } => {
                handle_commit(&mut app, &registry, id, x, y);
            }
            Command::Remove { id } => {
                if let Some(entity) = registry.remove(&id) {
                    app.world.despawn(entity);
                    app.world.send_event(TokenRemovedEvent {
                        entity,
                        token: TokenId(id),
                    });
                    info!(target: "umbra::server", id, "token.removed");
                } else {
                    warn!(target: "umbra::server", id, "remove.unknown_token");
                }
            }
            Command::Wall { x1, y1, x2, y2 } => {
                let mut walls = app.world.resource::<WallIndex>().walls().to_vec();
                walls.push(WallSegment::solid(Vec2::new(x1, y1), Vec2::new(x2, y2)));
                let count = walls.len();
                app.world.resource_mut::<WallIndex>().replace_walls(walls);
                app.world.send_event(WallsChangedEvent);
                info!(target: "umbra::server", count, "wall.added");
            }
            Command::ClearWalls => {
                app.world.resource_mut::<WallIndex>().replace_walls(Vec::new());
                app.world.send_event(WallsChangedEvent);
                info!(target: "umbra::server", "walls.cleared");
            }
            Command::Light { x, y, bright, dim } => {
                let mut lights = app.world.resource::<LightRegistry>().lights().to_vec();
                lights.push(LightSource::new(Vec2::new(x, y), bright, dim));
                let count = lights.len();
                app.world
                    .resource_mut::<LightRegistry>()
                    .replace_lights(lights);
                app.world.send_event(LightsChangedEvent);
                info!(target: "umbra::server", count, "light.added");
            }
            Command::Dark { x, y, radius, rank } => {
                let mut darks = app.world.resource::<LightRegistry>().darkness().to_vec();
                darks.push(DarknessSource::circle(Vec2::new(x, y), radius, rank));
                let count = darks.len();
                app.world
                    .resource_mut::<LightRegistry>()
                    .replace_darkness(darks);
                app.world.send_event(LightsChangedEvent);
                info!(target: "umbra::server", count, "darkness.added");
            }
            Command::ClearLights => {
                app.world.resource_mut::<LightRegistry>().clear();
                app.world.send_event(LightsChangedEvent);
                info!(target: "umbra::server", "lights.cleared");
            }
            Command::Scene {
                width,
                height,
                darkness,
            } => {
                {
                    let mut scene = app.world.resource_mut::<SceneContext>();
                    scene.bounds = bevy::math::Rect::new(0.0, 0.0, width, height);
                    scene.darkness_level = darkness.clamp(0.0, 1.0);
                }
                app.world.send_event(FullRecomputeRequested);
                info!(
                    target: "umbra::server",
                    width,
                    height,
                    darkness,
                    "scene.configured"
                );
            }
            Command::State { observer, target } => {
                let state = app
                    .world
                    .resource::<VisibilityMapService>()
                    .state_between(TokenId(observer), TokenId(target));
                info!(
                    target: "umbra::server",
                    observer,
                    target,
                    state = %state,
                    "state.queried"
                );
            }
            Command::Matrix => {
                let map = app.world.resource::<VisibilityMapService>();
                let (concealed, hidden, undetected) = map.count_by_state();
                info!(
                    target: "umbra::server",
                    stored = map.stored_len(),
                    overrides = map.override_len(),
                    concealed,
                    hidden,
                    undetected,
                    "matrix.summary"
                );
            }
            Command::Recompute => {
                app.world.send_event(FullRecomputeRequested);
                info!(target: "umbra::server", "recompute.requested");
            }
            Command::Reset => {
                for entity in registry.values() {
                    app.world.despawn(*entity);
                }
                registry.clear();
                app.world.send_event(SceneResetEvent);
                info!(target: "umbra::server", "scene.reset");
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Tick { elapsed_ms: u64 },
    Spawn { id: u64, x: f32, y: f32, doc: Option<String> },
    Move { id: u64, x: f32, y: f32 },
    Commit { id: u64, x: f32, y: f32 },
    Remove { id: u64 },
    Wall { x1: f32, y1: f32, x2: f32, y2: f32 },
    ClearWalls,
    Light { x: f32, y: f32, bright: f32, dim: f32 },
    Dark { x: f32, y: f32, radius: f32, rank: u8 },
    ClearLights,
    Scene { width: f32, height: f32, darkness: f32 },
    State { observer: u64, target: u64 },
    Matrix,
    Recompute,
    Reset,
}

fn spawn_command_listener(bind_addr: SocketAddr) -> Receiver<Command> {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    let (sender, receiver) = unbounded::<Command>();
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("Command client connected: {}", addr);
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                warn!("Error accepting command client: {}", err);
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    });

    receiver
}

fn handle_client(stream: std::net::TcpStream, sender: Sender<Command>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(cmd) => {
                        if sender.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => warn!("Invalid command: {}", trimmed),
                }
            }
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "tick" => {
            let elapsed_ms = parts.next().unwrap_or("50").parse().ok()?;
            Some(Command::Tick { elapsed_ms })
        }
        "spawn" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            // Everything from the first brace on is the actor document.
            let doc = input.find('{').map(|start| input[start..].to_string());
            Some(Command::Spawn { id, x, y, doc })
        }
        "move" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            Some(Command::Move { id, x, y })
        }
        "commit" => {
            let id: u64 = parts.next()?.parse().ok()?;
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            Some(Command::Commit { id, x, y })
        }
        "remove" => {
            let id: u64 = parts.next()?.parse().ok()?;
            Some(Command::Remove { id })
        }
        "wall" => {
            let x1: f32 = parts.next()?.parse().ok()?;
            let y1: f32 = parts.next()?.parse().ok()?;
            let x2: f32 = parts.next()?.parse().ok()?;
            let y2: f32 = parts.next()?.parse().ok()?;
            Some(Command::Wall { x1, y1, x2, y2 })
        }
        "clearwalls" => Some(Command::ClearWalls),
        "light" => {
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            let bright: f32 = parts.next()?.parse().ok()?;
            let dim: f32 = parts.next().unwrap_or("0").parse().ok()?;
            Some(Command::Light { x, y, bright, dim })
        }
        "dark" => {
            let x: f32 = parts.next()?.parse().ok()?;
            let y: f32 = parts.next()?.parse().ok()?;
            let radius: f32 = parts.next()?.parse().ok()?;
            let rank: u8 = parts.next().unwrap_or("1").parse().ok()?;
            Some(Command::Dark { x, y, radius, rank })
        }
        "clearlights" => Some(Command::ClearLights),
        "scene" => {
            let width: f32 = parts.next()?.parse().ok()?;
            let height: f32 = parts.next()?.parse().ok()?;
            let darkness: f32 = parts.next().unwrap_or("0").parse().ok()?;
            Some(Command::Scene {
                width,
                height,
                darkness,
            })
        }
        "state" => {
            let observer: u64 = parts.next()?.parse().ok()?;
            let target: u64 = parts.next()?.parse().ok()?;
            Some(Command::State { observer, target })
        }
        "matrix" => Some(Command::Matrix),
        "recompute" => Some(Command::Recompute),
        "reset" => Some(Command::Reset),
        _ => None,
    }
}

fn handle_spawn(
    app: &mut bevy::prelude::App,
    registry: &mut HashMap<u64, Entity>,
    id: u64,
    x: f32,
    y: f32,
    doc: Option<String>,
) {
    if registry.contains_key(&id) {
        warn!(target: "umbra::server", id, "spawn.duplicate_token");
        return;
    }

    let placement = TokenPlacement::at(Vec2::new(x, y));
    let entity = match doc {
        Some(raw) => match ActorDoc::from_json_str(&raw) {
            Ok(doc) => app
                .world
                .spawn((Token::new(id), placement, ActorSheet::new(doc)))
                .id(),
            Err(err) => {
                warn!(
                    target: "umbra::server",
                    id,
                    error = %err,
                    "spawn.bad_actor_doc"
                );
                return;
            }
        },
        None => app.world.spawn((Token::new(id), placement)).id(),
    };

    registry.insert(id, entity);
    app.world.send_event(TokenChangedEvent { entity });
    info!(target: "umbra::server", id, x, y, "token.spawned");
}

fn handle_commit(
    app: &mut bevy::prelude::App,
    registry: &HashMap<u64, Entity>,
    id: u64,
    x: f32,
    y: f32,
) {
    let Some(&entity) = registry.get(&id) else {
        warn!(target: "umbra::server", id, "commit.unknown_token");
        return;
    };
    if let Some(mut placement) = app.world.get_mut::<TokenPlacement>(entity) {
        placement.center = Vec2::new(x, y);
    }
    app.world.send_event(TokenChangedEvent { entity });
    info!(target: "umbra::server", id, x, y, "token.committed");
}
