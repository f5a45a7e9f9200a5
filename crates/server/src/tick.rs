//! The tick thread.
//!
//! One dedicated OS thread owns the blocktype registry and every mutation of
//! every level. Everything else talks to it by sending [`TickCommand`]s over
//! a crossbeam channel. Each tick it:
//!   1. retries commands parked because their level was in use;
//!   2. ticks every level no background job is holding;
//!   3. flushes the collected changes to the event bus as one batch per level;
//!   4. records metrics and, when due, queues autosaves on the `io` pool.
//! Between ticks it handles incoming commands as they arrive. Disk work
//! always happens on the `io` pool; results come back as commands.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use thiserror::Error;
use tokio::sync::broadcast;

use cubeworld_engine::jobs::{JobError, WorkerPool};
use cubeworld_engine::level::{Actor, Level};
use cubeworld_engine::path::{self, SearchFailed, SearchLimits};
use cubeworld_engine::registry::{BlockType, BlockTypeRegistry, Passability, RegistryError, Slot, TriggerAction};
use cubeworld_engine::tick::{Scheduler, TickBudget};
use cubeworld_engine::world::{BlockId, BlockPos, Dimensions, OwnerId, VoxelGrid};

use crate::actions::{self, DigOutcome};
use crate::config::ServerConfig;
use crate::dashboard::Metrics;
use crate::event_bus::{BusSink, WorldChangeBatch};
use crate::levels::{LevelDirectory, SaveQueued, UnloadOutcome};
use crate::player_registry::{PlayerInfo, PlayerRegistry};

#[derive(Debug, Error)]
pub enum PathRequestError {
    #[error("no level named '{0}'")]
    UnknownLevel(String),
    #[error("level '{0}' is being unloaded")]
    Unloading(String),
    #[error(transparent)]
    Search(#[from] SearchFailed),
    #[error(transparent)]
    Queue(#[from] JobError),
}

pub type PathReply = Result<Vec<BlockPos>, PathRequestError>;

/// Requests handled on the tick thread.
pub enum TickCommand {
    /// Player actions, applied to the player's current level.
    Place {
        player: OwnerId,
        pos: BlockPos,
        kind: BlockId,
    },
    Dig {
        player: OwnerId,
        pos: BlockPos,
    },
    Click {
        player: OwnerId,
        pos: BlockPos,
    },
    /// Raw queued mutation, for commands and scripted edits.
    Update {
        level: String,
        pos: BlockPos,
        kind: BlockId,
        data: u16,
        actor: Actor,
    },
    /// Enter (`true`) or leave (`false`) instant mode.
    BulkEdit {
        level: String,
        active: bool,
    },
    SetFixed {
        level: String,
        pos: BlockPos,
        fixed: bool,
    },
    Register {
        slot: Slot,
        ty: BlockType,
        reply: Sender<Result<BlockId, RegistryError>>,
    },
    Deregister {
        id: BlockId,
        reply: Sender<bool>,
    },
    FindPath {
        level: String,
        start: BlockPos,
        goal: BlockPos,
        reply: Sender<PathReply>,
    },
    CreateLevel {
        name: String,
        dims: Dimensions,
    },
    LoadLevel {
        name: String,
    },
    /// A level read finished on the `io` pool.
    LevelRead {
        name: String,
        result: Result<Option<VoxelGrid>>,
    },
    SaveLevel {
        name: String,
    },
    UnloadLevel {
        name: String,
    },
    /// The final save of an unloading level finished on the `io` pool.
    LevelSaved {
        name: String,
        result: Result<usize>,
    },
    Shutdown,
}

impl TickCommand {
    fn describe(&self) -> &'static str {
        match self {
            TickCommand::Place { .. } => "place",
            TickCommand::Dig { .. } => "dig",
            TickCommand::Click { .. } => "click",
            TickCommand::Update { .. } => "update",
            TickCommand::BulkEdit { .. } => "bulk-edit",
            TickCommand::SetFixed { .. } => "set-fixed",
            TickCommand::Register { .. } => "register",
            TickCommand::Deregister { .. } => "deregister",
            TickCommand::FindPath { .. } => "find-path",
            TickCommand::CreateLevel { .. } => "create-level",
            TickCommand::LoadLevel { .. } => "load-level",
            TickCommand::LevelRead { .. } => "level-read",
            TickCommand::SaveLevel { .. } => "save-level",
            TickCommand::UnloadLevel { .. } => "unload-level",
            TickCommand::LevelSaved { .. } => "level-saved",
            TickCommand::Shutdown => "shutdown",
        }
    }
}

/// Timing and budgets for the tick loop.
#[derive(Debug, Clone)]
pub struct TickSettings {
    pub interval: Duration,
    pub scheduler: TickBudget,
    pub autosave: Option<Duration>,
    pub search: SearchLimits,
}

impl TickSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            interval: config.tick_interval(),
            scheduler: config.budget(),
            autosave: config.autosave_interval(),
            search: SearchLimits {
                max_expanded: Some(65_536),
            },
        }
    }
}

/// What one call to [`TickLoop::tick_once`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    pub levels_ticked: usize,
    pub levels_skipped: usize,
    pub applied: usize,
    pub notified: usize,
    pub batches: usize,
    /// Commands still parked after the tick.
    pub deferred: usize,
}

/// Where an unloading level is. It is neither ticked nor saved by anyone
/// else meanwhile, and commands for it are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unload {
    /// Level was busy; try to queue the final save next tick.
    Waiting,
    /// Final save queued; removal happens on `LevelSaved`.
    Saving,
}

/// State owned by the tick thread.
pub struct TickLoop {
    settings: TickSettings,
    registry: BlockTypeRegistry,
    passability: Passability,
    scheduler: Scheduler,
    levels: Arc<LevelDirectory>,
    players: Arc<PlayerRegistry>,
    io: WorkerPool,
    paths: WorkerPool,
    sink: BusSink,
    metrics: Arc<Metrics>,
    tx: Sender<TickCommand>,
    rx: Receiver<TickCommand>,
    /// Level-bound commands waiting for their level to be released.
    deferred: VecDeque<(String, TickCommand)>,
    /// Saves asked for while the level was busy.
    pending_saves: BTreeSet<String>,
    unloading: BTreeMap<String, Unload>,
    tick: u64,
    last_autosave: Instant,
}

impl TickLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: TickSettings,
        registry: BlockTypeRegistry,
        levels: Arc<LevelDirectory>,
        players: Arc<PlayerRegistry>,
        io: WorkerPool,
        paths: WorkerPool,
        bus: broadcast::Sender<WorldChangeBatch>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            scheduler: Scheduler::with_budget(settings.scheduler),
            passability: registry.passability(),
            settings,
            registry,
            levels,
            players,
            io,
            paths,
            sink: BusSink::new(bus),
            metrics,
            tx,
            rx,
            deferred: VecDeque::new(),
            pending_saves: BTreeSet::new(),
            unloading: BTreeMap::new(),
            tick: 0,
            last_autosave: Instant::now(),
        }
    }

    /// Handle for sending commands to this loop.
    pub fn sender(&self) -> Sender<TickCommand> {
        self.tx.clone()
    }

    pub fn registry(&self) -> &BlockTypeRegistry {
        &self.registry
    }

    pub fn levels(&self) -> &Arc<LevelDirectory> {
        &self.levels
    }

    /// Handle every command already waiting, without blocking. Returns
    /// `false` once a shutdown was received.
    pub fn drain_commands(&mut self) -> bool {
        while let Ok(cmd) = self.rx.try_recv() {
            if !self.handle(cmd) {
                return false;
            }
        }
        true
    }

    /// Run until a `Shutdown` command, then save everything.
    pub fn run(mut self) {
        let interval = self.settings.interval;
        let mut next = Instant::now() + interval;
        tracing::info!("Tick thread started ({:?} per tick)", interval);
        loop {
            let now = Instant::now();
            if now >= next {
                self.tick_once();
                next += interval;
                if next < now {
                    // Fell behind; don't try to catch up in a burst.
                    next = now + interval;
                }
            }
            match self.rx.recv_deadline(next) {
                Ok(cmd) => {
                    if !self.handle(cmd) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.finish();
    }

    /// Apply one command. Returns `false` for `Shutdown`.
    pub fn handle(&mut self, cmd: TickCommand) -> bool {
        match cmd {
            TickCommand::Shutdown => return false,
            TickCommand::Register { slot, ty, reply } => {
                let result = self.registry.register(slot, ty);
                if result.is_ok() {
                    self.passability = self.registry.passability();
                }
                let _ = reply.send(result);
            }
            TickCommand::Deregister { id, reply } => {
                let removed = self.registry.deregister(id).is_some();
                if removed {
                    self.passability = self.registry.passability();
                }
                let _ = reply.send(removed);
            }
            TickCommand::FindPath {
                level,
                start,
                goal,
                reply,
            } => self.find_path(level, start, goal, reply),
            TickCommand::CreateLevel { name, dims } => {
                if let Err(e) = self.levels.create_flat(&name, dims, &self.registry) {
                    tracing::error!("Creating level '{}' failed: {:#}", name, e);
                }
            }
            TickCommand::LoadLevel { name } => self.load_level(name),
            TickCommand::LevelRead { name, result } => self.finish_load(name, result),
            TickCommand::SaveLevel { name } => self.request_save(name),
            TickCommand::UnloadLevel { name } => self.begin_unload(name),
            TickCommand::LevelSaved { name, result } => self.finish_unload(name, result),
            cmd => self.apply_level_command(cmd),
        }
        true
    }

    /// Run one tick now.
    pub fn tick_once(&mut self) -> TickSummary {
        let start = Instant::now();
        self.tick += 1;
        self.retry_deferred();
        self.retry_saves();

        let mut summary = TickSummary {
            tick: self.tick,
            ..TickSummary::default()
        };
        let mut backlog = 0;
        let mut physics_members = 0;
        for shared in self.levels.all() {
            if self.unloading.contains_key(shared.name()) {
                continue;
            }
            let Some(mut level) = shared.try_lock_for_tick() else {
                summary.levels_skipped += 1;
                self.metrics.record_skipped();
                continue;
            };
            let report = self
                .scheduler
                .tick(&mut level, &self.registry, &mut self.sink);
            self.metrics.record_level_tick(&report);
            summary.levels_ticked += 1;
            summary.applied += report.applied;
            summary.notified += report.notified;
            backlog += report.backlog;
            physics_members += level.physics().len();
        }

        summary.batches = self.sink.flush(self.tick);
        summary.deferred = self.deferred.len();
        self.metrics
            .record_tick(start.elapsed(), backlog, physics_members);
        self.autosave_if_due();
        summary
    }

    fn finish(mut self) {
        if !self.deferred.is_empty() {
            tracing::warn!("Dropping {} commands for busy levels", self.deferred.len());
        }
        self.paths.shutdown();
        // The final save queues behind any save already on the pool.
        let levels = Arc::clone(&self.levels);
        let final_save = self.io.execute(move || {
            let saved = levels.save_all_now();
            tracing::info!("Final save wrote {} levels", saved);
        });
        if let Err(e) = final_save {
            tracing::error!("Final save not queued ({}), saving here", e);
            self.levels.save_all_now();
        }
        self.io.shutdown();
        self.sink.flush(self.tick);
        tracing::info!("Tick thread stopped after {} ticks", self.tick);
    }

    fn autosave_if_due(&mut self) {
        let Some(every) = self.settings.autosave else {
            return;
        };
        if self.last_autosave.elapsed() < every {
            return;
        }
        self.last_autosave = Instant::now();
        let mut queued = 0;
        for level in self.levels.all() {
            if self.unloading.contains_key(level.name()) {
                continue;
            }
            match self.levels.save_async(&self.io, &level) {
                Ok(SaveQueued::Queued) => queued += 1,
                Ok(SaveQueued::Unchanged) => {}
                // Still dirty; the next round picks it up.
                Ok(SaveQueued::Busy) => tracing::debug!("Autosave skipped busy level '{}'", level.name()),
                Err(e) => tracing::error!("Autosave of '{}' not queued: {}", level.name(), e),
            }
        }
        if queued > 0 {
            tracing::info!("Autosaving {} levels", queued);
        }
    }

    // ── Saving and unloading ─────────────────────────────────────────────

    fn request_save(&mut self, name: String) {
        if self.unloading.contains_key(&name) {
            tracing::debug!("Level '{}' is being unloaded, not saving", name);
            return;
        }
        let Some(level) = self.levels.get(&name) else {
            tracing::warn!("Save requested for unknown level '{}'", name);
            return;
        };
        match self.levels.save_async(&self.io, &level) {
            Ok(SaveQueued::Queued) => tracing::debug!("Save of '{}' queued", name),
            Ok(SaveQueued::Unchanged) => tracing::debug!("Level '{}' unchanged, not saving", name),
            Ok(SaveQueued::Busy) => {
                tracing::debug!("Level '{}' is busy, saving next tick", name);
                self.pending_saves.insert(name);
            }
            Err(e) => tracing::error!("Save of '{}' not queued: {}", name, e),
        }
    }

    fn retry_saves(&mut self) {
        for name in std::mem::take(&mut self.pending_saves) {
            self.request_save(name);
        }
        let waiting: Vec<String> = self
            .unloading
            .iter()
            .filter(|(_, state)| **state == Unload::Waiting)
            .map(|(name, _)| name.clone())
            .collect();
        for name in waiting {
            self.queue_final_save(name);
        }
    }

    fn begin_unload(&mut self, name: String) {
        if self.unloading.contains_key(&name) {
            tracing::debug!("Level '{}' is already being unloaded", name);
            return;
        }
        let Some(level) = self.levels.get(&name) else {
            tracing::warn!("Level '{}' is not loaded", name);
            return;
        };
        if level.is_in_use() {
            tracing::warn!("Level '{}' is in use by a background job; unload refused", name);
            return;
        }
        tracing::info!("Unloading level '{}'", name);
        self.queue_final_save(name);
    }

    fn queue_final_save(&mut self, name: String) {
        let Some(level) = self.levels.get(&name) else {
            self.unloading.remove(&name);
            return;
        };
        let tx = self.tx.clone();
        let saved_name = name.clone();
        let queued = self.levels.save_async_then(&self.io, &level, move |result| {
            let _ = tx.send(TickCommand::LevelSaved {
                name: saved_name,
                result,
            });
        });
        match queued {
            Ok(SaveQueued::Queued) => {
                self.unloading.insert(name, Unload::Saving);
            }
            Ok(SaveQueued::Unchanged) => self.remove_level(&name),
            Ok(SaveQueued::Busy) => {
                self.unloading.insert(name, Unload::Waiting);
            }
            Err(e) => {
                tracing::error!("Unload of '{}' cancelled, save not queued: {}", name, e);
                self.unloading.remove(&name);
            }
        }
    }

    fn finish_unload(&mut self, name: String, result: Result<usize>) {
        if self.unloading.get(&name) != Some(&Unload::Saving) {
            tracing::debug!("Ignoring save result for '{}'", name);
            return;
        }
        match result {
            Ok(bytes) => {
                tracing::debug!("Final save of '{}' wrote {} bytes", name, bytes);
                self.remove_level(&name);
            }
            Err(e) => {
                // The failed job marked the level dirty again.
                tracing::error!("Level '{}' stays loaded, final save failed: {:#}", name, e);
                self.unloading.remove(&name);
            }
        }
    }

    fn remove_level(&mut self, name: &str) {
        self.unloading.remove(name);
        match self.levels.remove(name) {
            UnloadOutcome::Removed => {}
            UnloadOutcome::InUse => {
                tracing::warn!("Level '{}' was picked up by a background job; unload cancelled", name)
            }
            UnloadOutcome::NotLoaded => tracing::debug!("Level '{}' already gone", name),
        }
    }

    // ── Level-bound commands ─────────────────────────────────────────────

    fn retry_deferred(&mut self) {
        let parked = std::mem::take(&mut self.deferred);
        for (_, cmd) in parked {
            self.apply_level_command(cmd);
        }
    }

    fn target_level(&self, cmd: &TickCommand) -> Option<String> {
        match cmd {
            TickCommand::Place { player, .. }
            | TickCommand::Dig { player, .. }
            | TickCommand::Click { player, .. } => {
                self.players.get(*player).map(|info| info.level)
            }
            TickCommand::Update { level, .. }
            | TickCommand::BulkEdit { level, .. }
            | TickCommand::SetFixed { level, .. } => Some(level.clone()),
            _ => None,
        }
    }

    fn apply_level_command(&mut self, cmd: TickCommand) {
        let Some(name) = self.target_level(&cmd) else {
            tracing::debug!("Dropping {} command: no target level", cmd.describe());
            return;
        };
        let Some(shared) = self.levels.get(&name) else {
            tracing::debug!("Dropping {} command: level '{}' not loaded", cmd.describe(), name);
            return;
        };
        if self.unloading.contains_key(&name) {
            tracing::debug!("Dropping {} command: level '{}' is unloading", cmd.describe(), name);
            return;
        }
        // Keep per-level order: once one command is parked, later ones queue
        // up behind it.
        if self.deferred.iter().any(|(n, _)| *n == name) {
            self.deferred.push_back((name, cmd));
            return;
        }
        let Some(mut level) = shared.try_lock_for_tick() else {
            self.deferred.push_back((name, cmd));
            return;
        };
        self.execute(&mut level, cmd);
    }

    fn player(&self, id: OwnerId) -> Option<PlayerInfo> {
        let info = self.players.get(id);
        if info.is_none() {
            tracing::debug!("Command from unknown player {:?}", id);
        }
        info
    }

    /// Resend the real block at `pos` to one player.
    fn restore(&self, level: &Level, player: OwnerId, pos: BlockPos) {
        if let Some(block) = level.block(pos) {
            let rendered = self.registry.dispatch_convert(block);
            self.sink.restore(level.name(), player, pos, rendered);
        }
    }

    fn execute(&mut self, level: &mut Level, cmd: TickCommand) {
        match cmd {
            TickCommand::Place { player, pos, kind } => {
                let Some(info) = self.player(player) else {
                    return;
                };
                if let Err(e) = actions::place(level, &self.registry, &info, pos, kind) {
                    tracing::debug!("{} cannot place at {}: {}", info.name, pos, e);
                    self.restore(level, player, pos);
                }
            }
            TickCommand::Dig { player, pos } => {
                let Some(info) = self.player(player) else {
                    return;
                };
                match actions::dig(level, &self.registry, &info, pos) {
                    Ok(DigOutcome::Cleared) => {}
                    Ok(DigOutcome::Restored(rendered)) => {
                        self.sink.restore(level.name(), player, pos, rendered)
                    }
                    Err(e) => {
                        tracing::debug!("{} cannot dig at {}: {}", info.name, pos, e);
                        self.restore(level, player, pos);
                    }
                }
            }
            TickCommand::Click { player, pos } => {
                let Some(info) = self.player(player) else {
                    return;
                };
                match actions::click(level, &self.registry, &self.scheduler, &info, pos) {
                    Ok(TriggerAction::Restore) => self.restore(level, player, pos),
                    Ok(_) => {}
                    Err(e) => tracing::debug!("{} cannot click at {}: {}", info.name, pos, e),
                }
            }
            TickCommand::Update {
                pos,
                kind,
                data,
                actor,
                ..
            } => {
                if let Err(e) = level.enqueue_at(pos, kind, data, actor) {
                    tracing::debug!("Level '{}': update at {} refused: {}", level.name(), pos, e);
                }
            }
            TickCommand::BulkEdit { active: true, .. } => self.scheduler.begin_bulk_edit(level),
            TickCommand::BulkEdit { active: false, .. } => {
                self.scheduler.end_bulk_edit(level, &mut self.sink)
            }
            TickCommand::SetFixed { pos, fixed, .. } => {
                if !level.set_fixed(pos, fixed) {
                    tracing::debug!("Level '{}': {} is outside the level", level.name(), pos);
                }
            }
            other => tracing::warn!("{} is not a level command", other.describe()),
        }
    }

    // ── Background work ──────────────────────────────────────────────────

    fn find_path(&mut self, level: String, start: BlockPos, goal: BlockPos, reply: Sender<PathReply>) {
        let Some(shared) = self.levels.get(&level) else {
            let _ = reply.send(Err(PathRequestError::UnknownLevel(level)));
            return;
        };
        if self.unloading.contains_key(&level) {
            let _ = reply.send(Err(PathRequestError::Unloading(level)));
            return;
        }
        let submitted = path::find_path(
            &self.paths,
            &shared,
            self.passability.clone(),
            start,
            goal,
            self.settings.search,
            reply.clone(),
            |result, reply: Sender<PathReply>| {
                let _ = reply.send(result.map_err(PathRequestError::from));
            },
        );
        if let Err(e) = submitted {
            let _ = reply.send(Err(e.into()));
        }
    }

    fn load_level(&mut self, name: String) {
        if self.levels.contains(&name) {
            tracing::info!("Level '{}' is already loaded", name);
            return;
        }
        let tx = self.tx.clone();
        let reply_name = name.clone();
        let queued = self.levels.read_async(&self.io, &name, move |result| {
            let _ = tx.send(TickCommand::LevelRead {
                name: reply_name,
                result,
            });
        });
        if let Err(e) = queued {
            tracing::error!("Load of '{}' not queued: {}", name, e);
        }
    }

    fn finish_load(&mut self, name: String, result: Result<Option<VoxelGrid>>) {
        match result {
            Ok(Some(grid)) => {
                let level = Level::new(name.as_str(), grid, &self.registry);
                if let Err(e) = self.levels.insert(level) {
                    tracing::warn!("Loaded level dropped: {:#}", e);
                }
            }
            Ok(None) => tracing::warn!("No saved level named '{}'", name),
            Err(e) => tracing::error!("Loading level '{}' failed: {:#}", name, e),
        }
    }
}

/// Running tick thread.
pub struct TickHandle {
    tx: Sender<TickCommand>,
    thread: JoinHandle<()>,
}

impl TickHandle {
    pub fn sender(&self) -> Sender<TickCommand> {
        self.tx.clone()
    }

    pub fn send(&self, cmd: TickCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| anyhow!("tick thread is gone"))
    }

    /// Ask the thread to stop and wait for its final save.
    pub fn shutdown(self) -> Result<()> {
        let _ = self.tx.send(TickCommand::Shutdown);
        self.thread
            .join()
            .map_err(|_| anyhow!("tick thread panicked"))
    }
}

/// Start `tick_loop` on its own thread.
pub fn spawn(tick_loop: TickLoop) -> Result<TickHandle> {
    let tx = tick_loop.sender();
    let thread = thread::Builder::new()
        .name("tick".into())
        .spawn(move || tick_loop.run())
        .context("spawning tick thread")?;
    Ok(TickHandle { tx, thread })
}
