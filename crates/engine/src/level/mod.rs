pub mod physics_set;
pub mod queue;
pub mod shared;

use std::time::Duration;

use rayon::prelude::*;
use thiserror::Error;

use crate::registry::BlockTypeRegistry;
use crate::world::{Block, BlockId, BlockPos, VoxelGrid};
pub use physics_set::PhysicsSet;
pub use queue::{Actor, Update, UpdateQueue};
pub use shared::{InUseGuard, SharedLevel};

/// Why a queued mutation was dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("coordinates outside the level")]
    OutOfRange,
    #[error("block is owned by another player")]
    PermissionDenied,
    #[error("block is fixed")]
    Fixed,
    #[error("unknown blocktype {0:?}")]
    UnknownType(BlockId),
}

/// Diagnostics from the most recent tick, plus running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub ticks: u64,
    pub last_elapsed: Duration,
    pub physics_visited: usize,
    pub updates_applied: usize,
    pub updates_rejected: usize,
    pub notifications: usize,
    pub backlog: usize,
    pub applied_total: u64,
    pub rejected_total: u64,
}

/// One loaded world: its grid plus the simulation state the dispatcher keeps
/// alongside it.
pub struct Level {
    name: String,
    pub(crate) grid: VoxelGrid,
    pub(crate) physics: PhysicsSet,
    pub(crate) queue: UpdateQueue,
    instant: bool,
    dirty: bool,
    pub(crate) stats: LevelStats,
}

impl Level {
    /// Wrap a freshly generated or loaded grid.
    ///
    /// This is the one place the physics set is built by scanning the whole
    /// grid: every block's cached physics bit is recomputed from `registry`, and
    /// the set is filled from the result. From here on membership is kept in
    /// step by the dispatcher.
    pub fn new(name: impl Into<String>, mut grid: VoxelGrid, registry: &BlockTypeRegistry) -> Self {
        grid.blocks_mut().par_iter_mut().for_each(|block| {
            *block = block.with_physics(registry.has_physics(block.kind()));
        });
        let members: Vec<usize> = grid
            .blocks()
            .par_iter()
            .enumerate()
            .filter(|(_, block)| block.has_physics())
            .map(|(i, _)| i)
            .collect();
        let name = name.into();
        tracing::debug!("Level '{}': {} physics blocks", name, members.len());
        Self {
            name,
            grid,
            physics: PhysicsSet::from_indices(members),
            queue: UpdateQueue::new(),
            instant: false,
            dirty: false,
            stats: LevelStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    pub fn physics(&self) -> &PhysicsSet {
        &self.physics
    }

    pub fn stats(&self) -> LevelStats {
        self.stats
    }

    pub fn pending_updates(&self) -> usize {
        self.queue.len()
    }

    pub fn block(&self, pos: BlockPos) -> Option<Block> {
        self.grid.get_at(pos)
    }

    /// Queue a mutation. Validation happens when the dispatcher applies it.
    pub fn enqueue_update(&mut self, index: usize, kind: BlockId, data: u16, actor: Actor) {
        self.queue.push(index, kind, data, actor);
    }

    /// Queue a mutation by position. Positions outside the grid have no index
    /// and are rejected immediately.
    pub fn enqueue_at(
        &mut self,
        pos: BlockPos,
        kind: BlockId,
        data: u16,
        actor: Actor,
    ) -> Result<usize, Rejection> {
        let index = self.grid.index_of(pos).ok_or(Rejection::OutOfRange)?;
        self.queue.push(index, kind, data, actor);
        Ok(index)
    }

    pub fn is_instant(&self) -> bool {
        self.instant
    }

    pub(crate) fn set_instant_flag(&mut self, instant: bool) {
        self.instant = instant;
    }

    /// Mark or unmark a cell as fixed. Only the flag changes, so nothing is
    /// rendered differently and no observer is told.
    pub fn set_fixed(&mut self, pos: BlockPos, fixed: bool) -> bool {
        match self.grid.index_of(pos) {
            Some(i) => {
                let block = self.grid.blocks()[i];
                self.grid.set(i, block.with_fixed(fixed));
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Flag the level as needing a save, e.g. after a failed write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Full-scan check that the physics set matches the grid's physics bits.
    /// Used before saving and by tests; the tick never relies on it.
    pub fn physics_consistent(&self) -> bool {
        let flagged = self
            .grid
            .blocks()
            .par_iter()
            .filter(|block| block.has_physics())
            .count();
        flagged == self.physics.len()
            && self
                .physics
                .iter()
                .all(|i| self.grid.get(i).is_some_and(|b| b.has_physics()))
    }
}
