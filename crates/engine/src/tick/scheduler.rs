use std::time::{Duration, Instant};

use super::sink::{BlockSink, LevelNotice};
use crate::level::{Actor, Level, Rejection, Update};
use crate::registry::{BlockContext, BlockTypeRegistry, TriggerAction};
use crate::world::{BlockId, BlockPos, OwnerId};

/// Per-tick work limits for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickBudget {
    /// Physics-set members visited per tick.
    pub physics: usize,
    /// Queued updates applied per tick.
    pub updates: usize,
}

impl Default for TickBudget {
    fn default() -> Self {
        Self {
            physics: 4096,
            updates: 1024,
        }
    }
}

/// What one tick did to one level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub physics_visited: usize,
    pub applied: usize,
    pub rejected: usize,
    pub notified: usize,
    /// Updates still queued after the tick.
    pub backlog: usize,
    pub elapsed: Duration,
}

/// Applies queued mutations to a level and runs its physics, a bounded amount
/// per tick.
///
/// A tick is three passes:
///   1. physics: visit the next `budget.physics` physics-set members (resuming
///      from where the previous tick stopped) and run their callbacks, which
///      can only queue updates;
///   2. drain: apply up to `budget.updates` queued updates, keeping the
///      physics set in step with each block's physics bit;
///   3. broadcast: report every applied update whose rendered value changed,
///      unless the level is in instant mode.
///
/// Whatever doesn't fit in the budget waits for the next tick. Nothing is
/// dropped except rejected updates.
pub struct Scheduler {
    pub budget: TickBudget,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            budget: TickBudget::default(),
        }
    }

    pub fn with_budget(budget: TickBudget) -> Self {
        Self { budget }
    }

    pub fn tick<S>(&self, level: &mut Level, registry: &BlockTypeRegistry, sink: &mut S) -> TickReport
    where
        S: BlockSink + ?Sized,
    {
        let start = Instant::now();

        let physics_visited = self.physics_pass(level, registry);

        let mut changes: Vec<(BlockPos, BlockId)> = Vec::new();
        let mut applied = 0;
        let mut rejected = 0;
        for _ in 0..self.budget.updates {
            let Some(update) = level.queue.pop() else {
                break;
            };
            match apply(level, registry, update) {
                Ok(change) => {
                    applied += 1;
                    changes.extend(change);
                }
                Err(reason) => {
                    rejected += 1;
                    tracing::debug!(
                        "Level '{}': rejected update at index {} ({:?}): {}",
                        level.name(),
                        update.index,
                        update.kind,
                        reason
                    );
                }
            }
        }

        let notified = if level.is_instant() {
            0
        } else {
            for (pos, rendered) in &changes {
                sink.notify_block_changed(level.name(), *pos, *rendered);
            }
            changes.len()
        };

        let report = TickReport {
            physics_visited,
            applied,
            rejected,
            notified,
            backlog: level.queue.len(),
            elapsed: start.elapsed(),
        };

        let stats = &mut level.stats;
        stats.ticks += 1;
        stats.last_elapsed = report.elapsed;
        stats.physics_visited = report.physics_visited;
        stats.updates_applied = report.applied;
        stats.updates_rejected = report.rejected;
        stats.notifications = report.notified;
        stats.backlog = report.backlog;
        stats.applied_total += report.applied as u64;
        stats.rejected_total += report.rejected as u64;

        report
    }

    /// Tick until the queue is empty and a tick applies nothing, or
    /// `max_ticks` run out. Returns the number of updates applied.
    pub fn run_until_quiet<S>(
        &self,
        level: &mut Level,
        registry: &BlockTypeRegistry,
        sink: &mut S,
        max_ticks: usize,
    ) -> usize
    where
        S: BlockSink + ?Sized,
    {
        let mut total = 0;
        for _ in 0..max_ticks {
            let report = self.tick(level, registry, sink);
            total += report.applied;
            if report.applied == 0 && report.backlog == 0 {
                break;
            }
        }
        total
    }

    fn physics_pass(&self, level: &mut Level, registry: &BlockTypeRegistry) -> usize {
        let Level {
            grid,
            physics,
            queue,
            stats,
            ..
        } = level;
        let slice = physics.next_slice(self.budget.physics);
        for &index in &slice {
            let Some(mut ctx) =
                BlockContext::new(index, Actor::SYSTEM, stats.ticks, grid, registry, queue)
            else {
                continue;
            };
            if ctx.block.is_fixed() {
                continue;
            }
            registry.dispatch_physics(&mut ctx);
        }
        slice.len()
    }

    /// Run the trigger of the block at `pos` for `actor`. A `Clear` result
    /// queues air on the actor's behalf (still subject to the usual checks
    /// when it is applied).
    pub fn click(
        &self,
        level: &mut Level,
        registry: &BlockTypeRegistry,
        pos: BlockPos,
        actor: Actor,
    ) -> Result<TriggerAction, Rejection> {
        let index = level.grid.index_of(pos).ok_or(Rejection::OutOfRange)?;
        let Level {
            grid, queue, stats, ..
        } = level;
        let action = {
            let mut ctx = BlockContext::new(index, actor, stats.ticks, grid, registry, queue)
                .ok_or(Rejection::OutOfRange)?;
            registry.dispatch_trigger(&mut ctx)
        };
        if action == TriggerAction::Clear {
            queue.push(index, BlockId::AIR, 0, actor);
        }
        Ok(action)
    }

    /// Enter instant mode: per-block notifications are suppressed until
    /// [`Scheduler::end_bulk_edit`].
    pub fn begin_bulk_edit(&self, level: &mut Level) {
        level.set_instant_flag(true);
    }

    /// Leave instant mode and tell observers to reload the level.
    pub fn end_bulk_edit<S>(&self, level: &mut Level, sink: &mut S)
    where
        S: BlockSink + ?Sized,
    {
        if level.is_instant() {
            level.set_instant_flag(false);
            sink.notify_all(level.name(), LevelNotice::ResendLevel);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate and apply one update. Returns the position and new rendered value
/// when what clients see changed.
fn apply(
    level: &mut Level,
    registry: &BlockTypeRegistry,
    update: Update,
) -> Result<Option<(BlockPos, BlockId)>, Rejection> {
    let Level {
        grid,
        physics,
        queue,
        stats,
        ..
    } = level;

    let old = grid.get(update.index).ok_or(Rejection::OutOfRange)?;
    if !registry.contains(update.kind) {
        return Err(Rejection::UnknownType(update.kind));
    }
    if !update.actor.privileged {
        if old.is_fixed() {
            return Err(Rejection::Fixed);
        }
        let owner = old.owner();
        if !owner.is_none() && owner != update.actor.owner {
            return Err(Rejection::PermissionDenied);
        }
    }

    let before = registry.dispatch_convert(old);

    if old.kind() != update.kind {
        if let Some(mut ctx) =
            BlockContext::new(update.index, update.actor, stats.ticks, grid, registry, queue)
        {
            registry.dispatch_delete(&mut ctx);
        }
    }

    let owner = if update.kind == BlockId::AIR {
        OwnerId::NONE
    } else if update.actor.is_system() {
        old.owner()
    } else {
        update.actor.owner
    };
    let physics_bit = registry.has_physics(update.kind);
    let new = old
        .with_kind(update.kind)
        .with_data(update.data)
        .with_owner(owner)
        .with_physics(physics_bit)
        .with_touched(true);
    grid.set(update.index, new);

    if old.has_physics() != physics_bit {
        if physics_bit {
            physics.insert(update.index);
        } else {
            physics.remove(update.index);
        }
    }

    if new.with_touched(false) != old.with_touched(false) {
        level.mark_dirty();
    }

    let after = registry.dispatch_convert(new);
    if before == after {
        return Ok(None);
    }
    Ok(level.grid.pos_of(update.index).map(|pos| (pos, after)))
}
