use std::collections::VecDeque;

use crate::world::{BlockId, OwnerId};

/// Who is asking for a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actor {
    pub owner: OwnerId,
    /// Privileged actors may overwrite blocks owned by others and fixed blocks.
    pub privileged: bool,
}

impl Actor {
    /// Physics callbacks and other server-internal writers.
    pub const SYSTEM: Actor = Actor {
        owner: OwnerId::SYSTEM,
        privileged: true,
    };

    pub const fn player(owner: OwnerId) -> Self {
        Self {
            owner,
            privileged: false,
        }
    }

    pub const fn operator(owner: OwnerId) -> Self {
        Self {
            owner,
            privileged: true,
        }
    }

    pub const fn is_system(&self) -> bool {
        self.owner.0 == OwnerId::SYSTEM.0
    }
}

/// A deferred mutation of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Update {
    pub index: usize,
    pub kind: BlockId,
    pub data: u16,
    pub actor: Actor,
}

/// FIFO of pending mutations for one level.
///
/// Entries are validated when they are applied, not when they are pushed, so
/// pushing never fails.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: VecDeque<Update>,
    pushed_total: u64,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, kind: BlockId, data: u16, actor: Actor) {
        self.pending.push_back(Update {
            index,
            kind,
            data,
            actor,
        });
        self.pushed_total += 1;
    }

    pub fn pop(&mut self) -> Option<Update> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of entries ever pushed.
    pub fn pushed_total(&self) -> u64 {
        self.pushed_total
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
