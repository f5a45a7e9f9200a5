//! Directory of loaded levels, plus their generation, loading and saving.
//!
//! Levels live in a `DashMap` so observers (dashboard, sessions) can look
//! them up from any thread. Mutating a level stays the tick thread's job; in
//! particular every in-use guard is taken on the tick thread, which is what
//! makes the in-use check in [`LevelDirectory::remove`] race-free. Nothing
//! here that the tick thread calls blocks on a lock or the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use dashmap::DashMap;

use cubeworld_engine::jobs::{JobError, WorkerPool};
use cubeworld_engine::level::{Level, SharedLevel};
use cubeworld_engine::registry::BlockTypeRegistry;
use cubeworld_engine::world::{Block, BlockPos, Dimensions, GridError, VoxelGrid};

use crate::block;
use crate::persistence;

/// Result of removing a level from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    Removed,
    /// A background job holds the level; try again later.
    InUse,
    NotLoaded,
}

/// Result of asking for a background save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveQueued {
    Queued,
    /// Nothing changed since the last save.
    Unchanged,
    /// A job or reader holds the level. It stays dirty for a later attempt.
    Busy,
}

/// Terrain for a fresh level: bedrock floor, stone, three layers of dirt and
/// a grass surface at half height.
pub fn flat_grid(dims: Dimensions) -> Result<VoxelGrid, GridError> {
    let mut grid = VoxelGrid::new(dims)?;
    let surface = dims.height / 2;
    let dirt_from = surface.saturating_sub(3).max(1);
    grid.fill_layers(0..1, Block::new(block::BEDROCK, 0));
    grid.fill_layers(1..dirt_from, Block::new(block::STONE, 0));
    grid.fill_layers(dirt_from..surface, Block::new(block::DIRT, 0));
    grid.fill_layers(surface..surface + 1, Block::new(block::GRASS, 0));
    Ok(grid)
}

/// Where players appear on a flat level: the middle, standing on the grass.
pub fn spawn_point(dims: Dimensions) -> BlockPos {
    BlockPos::new(
        i32::from(dims.width / 2),
        i32::from(dims.height / 2) + 1,
        i32::from(dims.depth / 2),
    )
}

pub struct LevelDirectory {
    dir: PathBuf,
    levels: DashMap<String, Arc<SharedLevel>>,
}

impl LevelDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            levels: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add a level. Fails if one with the same name is already loaded.
    pub fn insert(&self, level: Level) -> Result<Arc<SharedLevel>> {
        let name = level.name().to_string();
        if self.levels.contains_key(&name) {
            bail!("level '{}' is already loaded", name);
        }
        let shared = SharedLevel::new(level);
        self.levels.insert(name.clone(), Arc::clone(&shared));
        tracing::info!("Level '{}' is now live ({} loaded)", name, self.levels.len());
        Ok(shared)
    }

    pub fn get(&self, name: &str) -> Option<Arc<SharedLevel>> {
        self.levels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// All loaded levels, ordered by name.
    pub fn all(&self) -> Vec<Arc<SharedLevel>> {
        let mut levels: Vec<_> = self
            .levels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        levels.sort_by(|a, b| a.name().cmp(b.name()));
        levels
    }

    pub fn names(&self) -> Vec<String> {
        self.all().iter().map(|l| l.name().to_string()).collect()
    }

    /// Generate a flat level and make it live.
    pub fn create_flat(
        &self,
        name: &str,
        dims: Dimensions,
        registry: &BlockTypeRegistry,
    ) -> Result<Arc<SharedLevel>> {
        persistence::level_path(&self.dir, name)?;
        let grid = flat_grid(dims).with_context(|| format!("generating level '{}'", name))?;
        let mut level = Level::new(name, grid, registry);
        level.mark_dirty();
        self.insert(level)
    }

    /// Load `name` from disk, or generate it flat if it was never saved.
    /// Blocking; meant for startup.
    pub fn open_or_create(
        &self,
        name: &str,
        dims: Dimensions,
        registry: &BlockTypeRegistry,
    ) -> Result<Arc<SharedLevel>> {
        match persistence::load_grid(&self.dir, name)? {
            Some(grid) => self.insert(Level::new(name, grid, registry)),
            None => {
                tracing::info!("No saved level '{}', generating a flat one", name);
                self.create_flat(name, dims, registry)
            }
        }
    }

    /// Read a saved grid on `io`. `on_read` runs on the worker with the
    /// result; the caller builds the `Level` from it on the tick thread.
    pub fn read_async<F>(&self, io: &WorkerPool, name: &str, on_read: F) -> Result<(), JobError>
    where
        F: FnOnce(Result<Option<VoxelGrid>>) + Send + 'static,
    {
        let dir = self.dir.clone();
        let name = name.to_string();
        io.execute(move || on_read(persistence::load_grid(&dir, &name)))
    }

    /// Save `level` on `io` if it changed since the last save. Never blocks:
    /// a level that is in use or being read is left dirty and reported as
    /// [`SaveQueued::Busy`].
    pub fn save_async(&self, io: &WorkerPool, level: &Arc<SharedLevel>) -> Result<SaveQueued, JobError> {
        self.save_async_then(io, level, |_| {})
    }

    /// Like [`save_async`](Self::save_async), but `on_saved` runs on the
    /// worker with the write result, after the in-use guard is released. It
    /// only runs when a save was queued.
    pub fn save_async_then<F>(
        &self,
        io: &WorkerPool,
        level: &Arc<SharedLevel>,
        on_saved: F,
    ) -> Result<SaveQueued, JobError>
    where
        F: FnOnce(Result<usize>) + Send + 'static,
    {
        let Some(mut locked) = level.try_lock_for_tick() else {
            return Ok(SaveQueued::Busy);
        };
        if !take_dirty_checked(&mut locked) {
            return Ok(SaveQueued::Unchanged);
        }
        let dir = self.dir.clone();
        let guard = level.acquire();
        // The job's read lock waits until `locked` is dropped below.
        let queued = io.submit(guard, move |guard| {
            let result = {
                let level = guard.read();
                persistence::save_grid(&dir, level.name(), level.grid())
            };
            if let Err(e) = &result {
                tracing::error!("Saving level '{}' failed: {:#}", guard.level().name(), e);
                guard.level().write().mark_dirty();
            }
            drop(guard);
            on_saved(result);
        });
        if queued.is_err() {
            locked.mark_dirty();
        }
        queued.map(|()| SaveQueued::Queued)
    }

    /// Save `level` on the calling thread if it changed. Returns whether a
    /// save happened. Blocks on the level lock and the disk, so it is for
    /// worker jobs and process exit, never the tick thread.
    pub fn save_now(&self, level: &Arc<SharedLevel>) -> Result<bool> {
        let mut locked = level.write();
        if !take_dirty_checked(&mut locked) {
            return Ok(false);
        }
        match persistence::save_grid(&self.dir, locked.name(), locked.grid()) {
            Ok(_) => Ok(true),
            Err(e) => {
                locked.mark_dirty();
                Err(e)
            }
        }
    }

    /// Save every changed level, logging failures. Returns how many were
    /// written. Blocking, like [`save_now`](Self::save_now).
    pub fn save_all_now(&self) -> usize {
        let mut saved = 0;
        for level in self.all() {
            match self.save_now(&level) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Saving level '{}' failed: {:#}", level.name(), e),
            }
        }
        saved
    }

    /// Drop `name` from the directory. Refused while a job holds the level.
    /// Saving first is the caller's job.
    pub fn remove(&self, name: &str) -> UnloadOutcome {
        let Some(level) = self.get(name) else {
            return UnloadOutcome::NotLoaded;
        };
        if level.is_in_use() {
            tracing::info!("Level '{}' is in use, not unloading", name);
            return UnloadOutcome::InUse;
        }
        self.levels.remove(name);
        tracing::info!("Level '{}' unloaded", name);
        UnloadOutcome::Removed
    }
}

fn take_dirty_checked(level: &mut Level) -> bool {
    if !level.take_dirty() {
        return false;
    }
    if !level.physics_consistent() {
        tracing::warn!("Level '{}': physics set out of step with grid", level.name());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builtin_registry;
    use cubeworld_engine::jobs::PoolConfig;
    use std::time::{Duration, Instant};

    fn tmp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cubeworld_levels_{}", tag));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn flat_terrain_layers() {
        let dims = Dimensions::new(4, 16, 4);
        let grid = flat_grid(dims).unwrap();
        let kind = |y| grid.get_at(BlockPos::new(1, y, 1)).unwrap().kind();
        assert_eq!(kind(0), block::BEDROCK);
        assert_eq!(kind(1), block::STONE);
        assert_eq!(kind(4), block::STONE);
        assert_eq!(kind(5), block::DIRT);
        assert_eq!(kind(7), block::DIRT);
        assert_eq!(kind(8), block::GRASS);
        assert_eq!(kind(9), block::AIR);
        assert_eq!(spawn_point(dims), BlockPos::new(2, 9, 2));
    }

    #[test]
    fn names_are_unique() {
        let registry = builtin_registry().unwrap();
        let levels = LevelDirectory::new(tmp_dir("unique"));
        levels
            .create_flat("a", Dimensions::new(4, 4, 4), &registry)
            .unwrap();
        assert!(levels.create_flat("a", Dimensions::new(4, 4, 4), &registry).is_err());
        assert!(levels.create_flat("../a", Dimensions::new(4, 4, 4), &registry).is_err());
        assert_eq!(levels.names(), vec!["a".to_string()]);
    }

    #[test]
    fn removal_is_refused_while_in_use() {
        let dir = tmp_dir("remove");
        let registry = builtin_registry().unwrap();
        let levels = LevelDirectory::new(&dir);
        let level = levels
            .create_flat("busy", Dimensions::new(4, 8, 4), &registry)
            .unwrap();

        let guard = level.acquire();
        assert_eq!(levels.remove("busy"), UnloadOutcome::InUse);
        assert!(levels.contains("busy"));
        drop(guard);

        assert_eq!(levels.remove("busy"), UnloadOutcome::Removed);
        assert!(!levels.contains("busy"));
        assert_eq!(levels.remove("busy"), UnloadOutcome::NotLoaded);
    }

    #[test]
    fn background_save_does_not_wait_for_readers() {
        let dir = tmp_dir("busy_save");
        let registry = builtin_registry().unwrap();
        let levels = LevelDirectory::new(&dir);
        let level = levels
            .create_flat("read", Dimensions::new(4, 8, 4), &registry)
            .unwrap();
        let io = WorkerPool::new(PoolConfig::new("levels-io"));

        let (held_tx, held_rx) = crossbeam_channel::bounded(0);
        let holder = Arc::clone(&level);
        let reader = std::thread::spawn(move || {
            let guard = holder.acquire();
            let _read = guard.read();
            held_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        held_rx.recv().unwrap();

        let start = Instant::now();
        assert_eq!(levels.save_async(&io, &level).unwrap(), SaveQueued::Busy);
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(io.stats().submitted, 0);

        // Still dirty, so the next attempt after the reader is done saves.
        reader.join().unwrap();
        assert_eq!(levels.save_async(&io, &level).unwrap(), SaveQueued::Queued);
        io.shutdown();
        assert!(persistence::load_grid(&dir, "read").unwrap().is_some());
        assert_eq!(levels.save_async(&io, &level).unwrap(), SaveQueued::Unchanged);
    }

    #[test]
    fn save_callback_runs_after_the_level_is_released() {
        let dir = tmp_dir("save_then");
        let registry = builtin_registry().unwrap();
        let levels = LevelDirectory::new(&dir);
        let level = levels
            .create_flat("done", Dimensions::new(4, 8, 4), &registry)
            .unwrap();
        let io = WorkerPool::new(PoolConfig::new("levels-io"));

        let (tx, rx) = crossbeam_channel::bounded(1);
        let watched = Arc::clone(&level);
        let queued = levels
            .save_async_then(&io, &level, move |result| {
                tx.send((result.is_ok(), watched.is_in_use())).unwrap();
            })
            .unwrap();
        assert_eq!(queued, SaveQueued::Queued);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (true, false));
        io.shutdown();

        // Loading again goes through disk rather than generation.
        let reopened = LevelDirectory::new(&dir)
            .open_or_create("done", Dimensions::new(1, 1, 1), &registry)
            .unwrap();
        assert_eq!(reopened.read().grid().dims(), Dimensions::new(4, 8, 4));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clean_levels_are_not_rewritten() {
        let dir = tmp_dir("clean");
        let registry = builtin_registry().unwrap();
        let levels = LevelDirectory::new(&dir);
        let level = levels
            .create_flat("calm", Dimensions::new(4, 4, 4), &registry)
            .unwrap();
        assert!(levels.save_now(&level).unwrap());
        assert!(!levels.save_now(&level).unwrap());
        assert_eq!(levels.save_all_now(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
