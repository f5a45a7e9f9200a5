use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use super::Level;

/// A level shared between the tick thread and background jobs.
///
/// The tick thread owns mutation. Before a level is handed to a job, the
/// submitter takes an [`InUseGuard`]; while any guard is alive the tick thread
/// leaves the level alone (its update queue just grows) and will not unload
/// it. Jobs read through the guard and drop it when they are finished with the
/// level, which hands it back to the tick.
pub struct SharedLevel {
    name: String,
    level: RwLock<Level>,
    in_use: AtomicUsize,
}

impl SharedLevel {
    pub fn new(level: Level) -> Arc<Self> {
        Arc::new(Self {
            name: level.name().to_string(),
            level: RwLock::new(level),
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the level as in use until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> InUseGuard {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        InUseGuard {
            level: Arc::clone(self),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire) > 0
    }

    /// Exclusive access for one tick, or `None` if a job holds the level or
    /// someone is reading it right now. Never blocks.
    pub fn try_lock_for_tick(&self) -> Option<RwLockWriteGuard<'_, Level>> {
        if self.is_in_use() {
            return None;
        }
        match self.level.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => panic!("level '{}' lock poisoned", self.name),
        }
    }

    /// Blocking shared access. Meant for jobs and diagnostics, not the tick.
    pub fn read(&self) -> RwLockReadGuard<'_, Level> {
        self.level.read().expect("level lock poisoned")
    }

    /// Blocking exclusive access, for setup code outside the tick loop.
    pub fn write(&self) -> RwLockWriteGuard<'_, Level> {
        self.level.write().expect("level lock poisoned")
    }
}

/// Keeps a [`SharedLevel`] out of the tick thread's hands while alive.
pub struct InUseGuard {
    level: Arc<SharedLevel>,
}

impl InUseGuard {
    pub fn level(&self) -> &Arc<SharedLevel> {
        &self.level
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Level> {
        self.level.read()
    }
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        self.level.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BlockTypeRegistry;
    use crate::world::{Dimensions, VoxelGrid};

    fn shared() -> Arc<SharedLevel> {
        let grid = VoxelGrid::new(Dimensions::new(2, 2, 2)).unwrap();
        SharedLevel::new(Level::new("test", grid, &BlockTypeRegistry::new()))
    }

    #[test]
    fn guard_blocks_tick_until_dropped() {
        let level = shared();
        let guard = level.acquire();
        assert!(level.is_in_use());
        assert!(level.try_lock_for_tick().is_none());
        drop(guard);
        assert!(!level.is_in_use());
        assert!(level.try_lock_for_tick().is_some());
    }

    #[test]
    fn guards_nest() {
        let level = shared();
        let a = level.acquire();
        let b = level.acquire();
        drop(a);
        assert!(level.is_in_use());
        drop(b);
        assert!(!level.is_in_use());
    }

    #[test]
    fn reader_blocks_tick_without_guard() {
        let level = shared();
        let read = level.read();
        assert!(level.try_lock_for_tick().is_none());
        drop(read);
        assert!(level.try_lock_for_tick().is_some());
    }
}
