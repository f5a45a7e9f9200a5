use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use cubeworld_engine::jobs::{PoolConfig, WorkerPool};
use cubeworld_engine::level::{Level, SharedLevel};
use cubeworld_engine::path::{SearchFailed, SearchLimits, find_path, search};
use cubeworld_engine::registry::{BlockType, BlockTypeRegistry, Passability, Slot};
use cubeworld_engine::world::{Block, BlockId, BlockPos, Dimensions, VoxelGrid};

const STONE: BlockId = BlockId(1);

fn passability() -> Passability {
    let mut reg = BlockTypeRegistry::new();
    reg.register(Slot::Explicit(BlockId::AIR), BlockType::new("air").passable(true))
        .unwrap();
    reg.register(Slot::Explicit(STONE), BlockType::new("stone"))
        .unwrap();
    reg.passability()
}

/// An empty 8x8x8 level: the ground is the solid floor under y = 0.
fn open_grid() -> VoxelGrid {
    VoxelGrid::new(Dimensions::new(8, 8, 8)).unwrap()
}

/// Open grid with `goal` walled in three blocks high.
fn enclosed_grid(goal: BlockPos) -> VoxelGrid {
    let mut grid = open_grid();
    for dx in -1..=1 {
        for dz in -1..=1 {
            if dx == 0 && dz == 0 {
                continue;
            }
            for y in 0..3 {
                grid.set_at(goal.offset(dx, y, dz), Block::new(STONE, 0));
            }
        }
    }
    grid
}

#[test]
fn search_across_a_flat_platform_is_deterministic() {
    let grid = open_grid();
    let pass = passability();
    let start = BlockPos::new(0, 0, 0);
    let goal = BlockPos::new(5, 0, 5);

    let first = search(&grid, &pass, start, goal, SearchLimits::default()).unwrap();
    let second = search(&grid, &pass, start, goal, SearchLimits::default()).unwrap();
    assert_eq!(first, second);

    let path = &first.path;
    assert_eq!(path.first(), Some(&start));
    assert_eq!(path.last(), Some(&goal));
    for pair in path.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert_eq!(a.y, 0);
        assert!(a.x.abs_diff(b.x) <= 1 && a.z.abs_diff(b.z) <= 1);
        assert_ne!(a, b);
    }
    let cost: u32 = path.windows(2).map(|p| p[0].manhattan(&p[1])).sum();
    assert_eq!(cost, start.manhattan(&goal));

    assert!(first.popped_f.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn walled_in_goal_fails_after_exhausting_the_reachable_area() {
    let goal = BlockPos::new(6, 0, 6);
    let grid = enclosed_grid(goal);
    let pass = passability();

    let result = search(&grid, &pass, BlockPos::new(0, 0, 0), goal, SearchLimits::default());
    let Err(SearchFailed::NoPath { expanded }) = result else {
        panic!("expected no path, got {:?}", result);
    };
    // The 8x8 floor minus the goal and its eight walls.
    let reachable = 64 - 9;
    assert!(expanded > 0);
    assert!(expanded <= reachable);
}

#[test]
fn expansion_limit_stops_the_search() {
    let goal = BlockPos::new(6, 0, 6);
    let grid = enclosed_grid(goal);
    let limits = SearchLimits {
        max_expanded: Some(10),
    };
    assert_eq!(
        search(&grid, &passability(), BlockPos::new(0, 0, 0), goal, limits),
        Err(SearchFailed::ExpansionLimit { limit: 10 })
    );
}

#[test]
fn find_path_holds_the_level_until_the_search_is_done() {
    let mut reg = BlockTypeRegistry::new();
    reg.register(Slot::Explicit(BlockId::AIR), BlockType::new("air").passable(true))
        .unwrap();
    let shared = SharedLevel::new(Level::new("paths", open_grid(), &reg));
    let pool = WorkerPool::new(PoolConfig {
        name: "path".into(),
        poll_interval: Duration::from_millis(2),
        idle_timeout: Duration::from_secs(5),
    });

    // Park the worker so the search is still queued while we look.
    let (gate_tx, gate_rx) = bounded::<()>(0);
    pool.execute(move || {
        let _ = gate_rx.recv();
    })
    .unwrap();

    let (tx, rx) = bounded(1);
    find_path(
        &pool,
        &shared,
        reg.passability(),
        BlockPos::new(1, 0, 1),
        BlockPos::new(6, 0, 2),
        SearchLimits::default(),
        (Arc::clone(&shared), 42u32),
        move |result, (level, tag): (Arc<SharedLevel>, u32)| {
            tx.send((result, tag, level.is_in_use())).unwrap();
        },
    )
    .unwrap();

    assert!(shared.is_in_use());
    assert!(shared.try_lock_for_tick().is_none());

    gate_tx.send(()).unwrap();
    let (result, tag, in_use_in_callback) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let path = result.unwrap();
    assert_eq!(tag, 42);
    assert!(!in_use_in_callback);
    assert_eq!(path.first(), Some(&BlockPos::new(1, 0, 1)));
    assert_eq!(path.last(), Some(&BlockPos::new(6, 0, 2)));

    assert!(!shared.is_in_use());
    assert!(shared.try_lock_for_tick().is_some());
    pool.shutdown();
}
