use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use cubeworld_engine::jobs::WorkerPool;
use cubeworld_server::block;
use cubeworld_server::config::ServerConfig;
use cubeworld_server::dashboard::{self, DashboardState, Metrics};
use cubeworld_server::event_bus::{self, WorldChangeBatch};
use cubeworld_server::levels::LevelDirectory;
use cubeworld_server::player_registry::PlayerRegistry;
use cubeworld_server::tick::{self, TickLoop, TickSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if args.iter().any(|a| a == "--demo") {
        return run_demo();
    }

    let config = ServerConfig::from_args(&args)?;
    tracing::info!("cubeworld -- voxel world server");

    let registry = block::builtin_registry().context("registering built-in blocks")?;
    tracing::info!("{} block types registered", registry.len());

    // ── Levels ───────────────────────────────────────────────────────────
    let levels = Arc::new(LevelDirectory::new(&config.world_dir));
    levels.open_or_create(&config.main_level, config.level_dims(), &registry)?;
    tracing::info!(
        "Main level '{}' ready ({} levels in {})",
        config.main_level,
        levels.len(),
        config.world_dir.display()
    );

    // World-change event bus: the tick thread publishes one batch per level
    // per tick, every observer subscribes.
    let (bus_tx, _) = broadcast::channel::<WorldChangeBatch>(event_bus::BUS_CAPACITY);
    let players = Arc::new(PlayerRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let io = WorkerPool::new(config.pool_config("io"));
    let paths = WorkerPool::new(config.pool_config("path"));

    // Start live dashboard (non-blocking -- runs on its own tasks).
    let dashboard = Arc::new(DashboardState::new(
        Arc::clone(&metrics),
        Arc::clone(&levels),
        Arc::clone(&players),
        bus_tx.clone(),
        vec![io.clone(), paths.clone()],
    ));
    let dashboard_port = config.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = dashboard::server::start(dashboard, dashboard_port).await {
            tracing::error!("Dashboard unavailable: {:#}", e);
        }
    });

    // ── Tick thread ──────────────────────────────────────────────────────
    let tick_loop = TickLoop::new(
        TickSettings::from_config(&config),
        registry,
        Arc::clone(&levels),
        players,
        io.clone(),
        paths.clone(),
        bus_tx,
        metrics,
    );
    let handle = tick::spawn(tick_loop)?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    tracing::info!("Ctrl+C received, shutting down...");

    // The tick thread drains both pools and saves every changed level.
    match tokio::task::spawn_blocking(move || handle.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("{:#}", e);
            let saved = levels.save_all_now();
            tracing::info!("Emergency save: {} levels written", saved);
        }
        Err(e) => tracing::error!("Shutdown task failed: {}", e),
    }
    io.shutdown();
    paths.shutdown();
    tracing::info!("Bye");
    Ok(())
}

/// Sand-drop, door and water demo on a small in-memory level.
fn run_demo() -> Result<()> {
    use cubeworld_engine::level::{Actor, Level};
    use cubeworld_engine::tick::{RecordingSink, Scheduler};
    use cubeworld_engine::world::{BlockPos, Dimensions, OwnerId};
    use cubeworld_server::levels::flat_grid;

    tracing::info!("cubeworld -- simulation demo");

    let registry = block::builtin_registry()?;
    let grid = flat_grid(Dimensions::new(32, 16, 32))?;
    let mut level = Level::new("demo", grid, &registry);
    let scheduler = Scheduler::new();
    let mut sink = RecordingSink::default();

    let sand_pos = BlockPos::new(8, 14, 8);
    level.enqueue_at(sand_pos, block::SAND, 0, Actor::SYSTEM)?;
    let applied = scheduler.run_until_quiet(&mut level, &registry, &mut sink, 100);
    tracing::info!("Sand settled after {} updates", applied);

    let landed = BlockPos::new(8, 9, 8);
    match level.block(landed) {
        Some(b) if b.kind() == block::SAND => tracing::info!("Sand landed on the surface at {}", landed),
        other => tracing::warn!("Unexpected block at {}: {:?}", landed, other),
    }

    let door = BlockPos::new(12, 9, 12);
    level.enqueue_at(door, block::DOOR, 0, Actor::SYSTEM)?;
    scheduler.tick(&mut level, &registry, &mut sink);
    let action = scheduler.click(&mut level, &registry, door, Actor::player(OwnerId(1)))?;
    tracing::info!("Clicked door: {:?}", action);
    let ticks = usize::from(block::DOOR_OPEN_TICKS) + 5;
    for _ in 0..ticks {
        scheduler.tick(&mut level, &registry, &mut sink);
    }
    tracing::info!(
        "Door after {} ticks: {:?}",
        ticks,
        level.block(door).map(|b| registry.name(b.kind()).unwrap_or("?").to_string())
    );

    let spring = BlockPos::new(20, 9, 20);
    level.enqueue_at(spring, block::ACTIVE_WATER, 0, Actor::SYSTEM)?;
    let applied = scheduler.run_until_quiet(&mut level, &registry, &mut sink, 500);
    let wet = level
        .grid()
        .blocks()
        .iter()
        .filter(|b| b.kind() == block::WATER)
        .count();
    tracing::info!("Water settled after {} updates: {} still water blocks", applied, wet);
    tracing::info!(
        "{} block changes recorded, {} physics blocks left",
        sink.block_changes(),
        level.physics().len()
    );
    Ok(())
}
