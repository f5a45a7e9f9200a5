//! End-to-end behavior of the built-in blocks, driven through the tick loop
//! the way a running server drives them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cubeworld_engine::jobs::{PoolConfig, WorkerPool};
use cubeworld_engine::level::{Actor, Level};
use cubeworld_engine::path::SearchLimits;
use cubeworld_engine::registry::Rank;
use cubeworld_engine::tick::TickBudget;
use cubeworld_engine::world::{BlockId, BlockPos, Dimensions, OwnerId};
use cubeworld_server::block::{self, builtin_registry};
use cubeworld_server::dashboard::Metrics;
use cubeworld_server::event_bus::{Audience, WorldChangeBatch};
use cubeworld_server::levels::{LevelDirectory, flat_grid};
use cubeworld_server::player_registry::{PlayerInfo, PlayerRegistry};
use cubeworld_server::tick::{TickCommand, TickLoop, TickSettings};

struct Server {
    tick: TickLoop,
    bus: broadcast::Receiver<WorldChangeBatch>,
    players: Arc<PlayerRegistry>,
    metrics: Arc<Metrics>,
}

fn world_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cubeworld_gameplay_{}", tag));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// A server with one 16x16x16 flat level named "main"; grass is at y = 8.
fn server(tag: &str) -> Server {
    let registry = builtin_registry().unwrap();
    let levels = Arc::new(LevelDirectory::new(world_dir(tag)));
    levels
        .insert(Level::new("main", flat_grid(Dimensions::new(16, 16, 16)).unwrap(), &registry))
        .unwrap();
    let players = Arc::new(PlayerRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let (bus_tx, bus) = broadcast::channel(1024);
    let settings = TickSettings {
        interval: Duration::from_millis(50),
        scheduler: TickBudget::default(),
        autosave: None,
        search: SearchLimits::default(),
    };
    let tick = TickLoop::new(
        settings,
        registry,
        levels,
        Arc::clone(&players),
        WorkerPool::new(PoolConfig::new("io")),
        WorkerPool::new(PoolConfig::new("path")),
        bus_tx,
        Arc::clone(&metrics),
    );
    Server {
        tick,
        bus,
        players,
        metrics,
    }
}

impl Server {
    fn set(&mut self, pos: BlockPos, kind: BlockId) {
        self.tick.handle(TickCommand::Update {
            level: "main".into(),
            pos,
            kind,
            data: 0,
            actor: Actor::SYSTEM,
        });
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick.tick_once();
        }
    }

    fn kind(&self, pos: BlockPos) -> BlockId {
        let level = self.tick.levels().get("main").unwrap();
        let kind = level.read().block(pos).unwrap().kind();
        kind
    }

    fn count(&self, kind: BlockId) -> usize {
        let level = self.tick.levels().get("main").unwrap();
        let count = level
            .read()
            .grid()
            .blocks()
            .iter()
            .filter(|b| b.kind() == kind)
            .count();
        count
    }

    fn join(&self, name: &str, rank: Rank) -> OwnerId {
        let id = self.players.allocate_id();
        self.players
            .register(PlayerInfo::new(id, name, rank, "main").at(8.5, 9.0, 8.5));
        id
    }

    fn drain_bus(&mut self) -> Vec<WorldChangeBatch> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.bus.try_recv() {
            batches.push(batch);
        }
        batches
    }
}

// ---------------------------------------------------------------------------
// Gravity and doors
// ---------------------------------------------------------------------------

#[test]
fn sand_falls_one_cell_per_tick_and_rests_on_the_ground() {
    let mut s = server("sand");
    let top = BlockPos::new(8, 12, 8);
    s.set(top, block::SAND);

    s.run(1);
    assert_eq!(s.kind(top), block::SAND);
    s.run(1);
    assert_eq!(s.kind(top), block::AIR);
    assert_eq!(s.kind(BlockPos::new(8, 11, 8)), block::SAND);

    s.run(10);
    assert_eq!(s.kind(BlockPos::new(8, 9, 8)), block::SAND);
    assert_eq!(s.count(block::SAND), 1);

    // Observers saw every step of the fall.
    let seen: Vec<(BlockPos, BlockId)> = s
        .drain_bus()
        .iter()
        .flat_map(|b| b.changes.iter().copied())
        .collect();
    assert!(seen.contains(&(BlockPos::new(8, 10, 8), block::SAND)));
    assert!(seen.contains(&(BlockPos::new(8, 10, 8), block::AIR)));
}

#[test]
fn door_opens_on_click_and_closes_by_itself() {
    let mut s = server("door");
    let alice = s.join("alice", Rank::GUEST);
    let door = BlockPos::new(9, 9, 8);
    s.set(door, block::DOOR);
    s.run(1);
    s.drain_bus();

    s.tick.handle(TickCommand::Click {
        player: alice,
        pos: door,
    });
    // The clicking player gets the real block back straight away.
    let restore = s.drain_bus();
    assert_eq!(restore.len(), 1);
    assert_eq!(restore[0].audience, Audience::Player(alice));

    s.run(10);
    assert_eq!(s.kind(door), block::OPEN_DOOR);
    let opened: Vec<_> = s
        .drain_bus()
        .into_iter()
        .filter(|b| b.audience == Audience::Level)
        .flat_map(|b| b.changes.to_vec())
        .collect();
    // Open doors render as air, and the countdown itself is invisible.
    assert_eq!(opened, vec![(door, block::AIR)]);

    s.run(usize::from(block::DOOR_OPEN_TICKS) + 5);
    assert_eq!(s.kind(door), block::DOOR);
}

// ---------------------------------------------------------------------------
// Fluids
// ---------------------------------------------------------------------------

#[test]
fn water_spreads_to_its_reach_then_settles() {
    let mut s = server("water");
    s.set(BlockPos::new(8, 9, 8), block::ACTIVE_WATER);
    s.run(20);

    // A diamond of radius WATER_REACH on the grass, all of it still.
    let reach = usize::from(block::WATER_REACH);
    assert_eq!(s.count(block::WATER), 1 + 2 * reach * (reach + 1));
    assert_eq!(s.count(block::ACTIVE_WATER), 0);
    assert_eq!(s.kind(BlockPos::new(14, 9, 8)), block::WATER);
    assert_eq!(s.kind(BlockPos::new(15, 9, 8)), block::AIR);

    let level = s.tick.levels().get("main").unwrap();
    assert_eq!(level.read().physics().len(), 0);
    assert!(level.read().physics_consistent());
}

#[test]
fn water_pours_down_before_spreading() {
    let mut s = server("pour");
    s.set(BlockPos::new(3, 12, 3), block::ACTIVE_WATER);
    s.run(4);
    assert_eq!(s.kind(BlockPos::new(3, 9, 3)), block::ACTIVE_WATER);
    assert_eq!(s.kind(BlockPos::new(4, 12, 3)), block::AIR);
    assert_eq!(s.kind(BlockPos::new(3, 12, 3)), block::WATER);
}

#[test]
fn sponge_drains_and_keeps_water_out() {
    let mut s = server("sponge");
    let sponge = BlockPos::new(8, 9, 8);
    s.set(BlockPos::new(9, 9, 8), block::WATER);
    s.run(1);
    s.set(sponge, block::SPONGE);
    s.run(3);
    assert_eq!(s.kind(BlockPos::new(9, 9, 8)), block::AIR);

    s.set(BlockPos::new(8, 9, 13), block::ACTIVE_WATER);
    s.run(20);
    assert!(s.count(block::WATER) > 0);
    let r = block::SPONGE_RADIUS;
    for dy in -r..=r {
        for dz in -r..=r {
            for dx in -r..=r {
                let pos = sponge.offset(dx, dy, dz);
                let kind = s.kind(pos);
                assert!(kind != block::WATER && kind != block::ACTIVE_WATER, "water at {}", pos);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Players and observers
// ---------------------------------------------------------------------------

#[test]
fn players_cannot_dig_each_others_blocks() {
    let mut s = server("owners");
    let alice = s.join("alice", Rank::BUILDER);
    let bob = s.join("bob", Rank::BUILDER);
    let pos = BlockPos::new(8, 9, 10);

    s.tick.handle(TickCommand::Place {
        player: alice,
        pos,
        kind: block::PLANKS,
    });
    s.run(1);
    s.drain_bus();

    s.tick.handle(TickCommand::Dig { player: bob, pos });
    let restore = s.drain_bus();
    assert_eq!(restore.len(), 1);
    assert_eq!(restore[0].audience, Audience::Player(bob));
    assert_eq!(&*restore[0].changes, &[(pos, block::PLANKS)]);
    s.run(1);
    assert_eq!(s.kind(pos), block::PLANKS);

    s.tick.handle(TickCommand::Dig { player: alice, pos });
    s.run(1);
    assert_eq!(s.kind(pos), block::AIR);
}

#[test]
fn bulk_edits_resend_the_level_once() {
    let mut s = server("bulk");
    s.tick.handle(TickCommand::BulkEdit {
        level: "main".into(),
        active: true,
    });
    for x in 0..16 {
        s.set(BlockPos::new(x, 9, 0), block::COBBLESTONE);
    }
    s.run(1);
    assert!(s.drain_bus().iter().all(|b| b.changes.is_empty()));

    s.tick.handle(TickCommand::BulkEdit {
        level: "main".into(),
        active: false,
    });
    s.run(1);
    let batches = s.drain_bus();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].notices.len(), 1);
    assert_eq!(s.count(block::COBBLESTONE), 16);
}

// ---------------------------------------------------------------------------
// Persistence and metrics
// ---------------------------------------------------------------------------

#[test]
fn saved_levels_resume_their_physics() {
    let registry = builtin_registry().unwrap();
    let dir = world_dir("resume");
    let levels = LevelDirectory::new(&dir);
    let shared = levels
        .create_flat("main", Dimensions::new(16, 16, 16), &registry)
        .unwrap();
    shared
        .write()
        .enqueue_at(BlockPos::new(4, 14, 4), block::SAND, 0, Actor::SYSTEM)
        .unwrap();
    let scheduler = cubeworld_engine::tick::Scheduler::new();
    scheduler.tick(&mut shared.write(), &registry, &mut cubeworld_engine::tick::NullSink);
    assert_eq!(shared.read().physics().len(), 1);
    assert!(levels.save_now(&shared).unwrap());

    // A fresh directory reads it back and rebuilds the physics set.
    let reopened = LevelDirectory::new(&dir);
    let level = reopened
        .open_or_create("main", Dimensions::new(8, 8, 8), &registry)
        .unwrap();
    assert_eq!(level.read().grid().dims(), Dimensions::new(16, 16, 16));
    assert_eq!(level.read().physics().len(), 1);
    scheduler.run_until_quiet(&mut level.write(), &registry, &mut cubeworld_engine::tick::NullSink, 20);
    assert_eq!(
        level.read().block(BlockPos::new(4, 9, 4)).map(|b| b.kind()),
        Some(block::SAND)
    );
}

#[test]
fn metrics_follow_the_ticks() {
    let mut s = server("metrics");
    s.set(BlockPos::new(1, 9, 1), block::STONE);
    s.run(3);
    let snapshot = s.metrics.snapshot(1, 0, Vec::new());
    assert_eq!(snapshot.ticks_total, 3);
    assert_eq!(snapshot.updates_applied, 1);
}
