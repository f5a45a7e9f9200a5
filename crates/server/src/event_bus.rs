//! World-change event bus.
//!
//! The tick thread reports changes through a [`BusSink`], which collects
//! them for the duration of a tick and then publishes one
//! [`WorldChangeBatch`] per level to a shared `tokio::sync::broadcast`
//! channel. Network sessions, the dashboard and anything else interested
//! subscribe to the channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use cubeworld_engine::tick::{BlockSink, LevelNotice};
use cubeworld_engine::world::{BlockId, BlockPos, OwnerId};

/// 256 batches in flight absorbs bursty ticks without lagging subscribers.
pub const BUS_CAPACITY: usize = 256;

/// Who a batch is meant for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Everyone viewing the level.
    Level,
    /// One player only, e.g. to undo a client-side prediction.
    Player(OwnerId),
}

/// Everything that changed on one level in one tick.
///
/// Uses `Arc<[...]>` so cloning per subscriber is just a refcount bump.
#[derive(Clone, Debug)]
pub struct WorldChangeBatch {
    pub level: Arc<str>,
    pub tick: u64,
    pub audience: Audience,
    /// `(position, rendered type)` in the order they were applied.
    pub changes: Arc<[(BlockPos, BlockId)]>,
    pub notices: Arc<[LevelNotice]>,
}

#[derive(Default)]
struct Pending {
    changes: Vec<(BlockPos, BlockId)>,
    notices: Vec<LevelNotice>,
}

/// [`BlockSink`] that batches per tick onto the broadcast bus.
pub struct BusSink {
    tx: broadcast::Sender<WorldChangeBatch>,
    pending: BTreeMap<String, Pending>,
    tick: u64,
}

impl BusSink {
    pub fn new(tx: broadcast::Sender<WorldChangeBatch>) -> Self {
        Self {
            tx,
            pending: BTreeMap::new(),
            tick: 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorldChangeBatch> {
        self.tx.subscribe()
    }

    /// Resend the real value of one block to one player, bypassing batching.
    pub fn restore(&self, level: &str, player: OwnerId, pos: BlockPos, rendered: BlockId) {
        let _ = self.tx.send(WorldChangeBatch {
            level: level.into(),
            tick: self.tick,
            audience: Audience::Player(player),
            changes: vec![(pos, rendered)].into(),
            notices: Vec::new().into(),
        });
    }

    /// Publish everything collected since the last flush, tagged with `tick`.
    /// Returns the number of batches sent.
    pub fn flush(&mut self, tick: u64) -> usize {
        self.tick = tick;
        let pending = std::mem::take(&mut self.pending);
        let mut sent = 0;
        for (level, batch) in pending {
            if batch.changes.is_empty() && batch.notices.is_empty() {
                continue;
            }
            // No subscribers is fine; the changes are already in the grid.
            let _ = self.tx.send(WorldChangeBatch {
                level: level.into(),
                tick,
                audience: Audience::Level,
                changes: batch.changes.into(),
                notices: batch.notices.into(),
            });
            sent += 1;
        }
        sent
    }

    /// Changes collected and not yet flushed.
    pub fn pending_changes(&self) -> usize {
        self.pending.values().map(|p| p.changes.len()).sum()
    }

    fn entry(&mut self, level: &str) -> &mut Pending {
        self.pending.entry(level.to_string()).or_default()
    }
}

impl BlockSink for BusSink {
    fn notify_block_changed(&mut self, level: &str, pos: BlockPos, rendered: BlockId) {
        self.entry(level).changes.push((pos, rendered));
    }

    fn notify_all(&mut self, level: &str, notice: LevelNotice) {
        let pending = self.entry(level);
        // A full resend makes earlier per-block changes moot.
        if notice == LevelNotice::ResendLevel {
            pending.changes.clear();
        }
        pending.notices.push(notice);
    }
}
