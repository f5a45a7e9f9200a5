//! Outbound interface to the network layer.
//!
//! The dispatcher reports what clients need to hear about; the implementation
//! decides how to queue it. Calls must not block: the tick thread makes them.

use crate::world::{BlockId, BlockPos};

/// Level-wide messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelNotice {
    /// Per-block changes were suppressed (instant mode); clients must be sent
    /// the whole level again.
    ResendLevel,
    /// Free-form text for everyone on the level.
    Message(String),
}

pub trait BlockSink {
    /// The rendered value at `pos` changed.
    fn notify_block_changed(&mut self, level: &str, pos: BlockPos, rendered: BlockId);

    fn notify_all(&mut self, level: &str, notice: LevelNotice);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl BlockSink for NullSink {
    fn notify_block_changed(&mut self, _level: &str, _pos: BlockPos, _rendered: BlockId) {}

    fn notify_all(&mut self, _level: &str, _notice: LevelNotice) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    BlockChanged {
        level: String,
        pos: BlockPos,
        rendered: BlockId,
    },
    Notice {
        level: String,
        notice: LevelNotice,
    },
}

/// Keeps every call, in order. Handy for tests and for batching: the server
/// drains it once per tick.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_changes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SinkEvent::BlockChanged { .. }))
            .count()
    }

    pub fn take(&mut self) -> Vec<SinkEvent> {
        std::mem::take(&mut self.events)
    }
}

impl BlockSink for RecordingSink {
    fn notify_block_changed(&mut self, level: &str, pos: BlockPos, rendered: BlockId) {
        self.events.push(SinkEvent::BlockChanged {
            level: level.to_string(),
            pos,
            rendered,
        });
    }

    fn notify_all(&mut self, level: &str, notice: LevelNotice) {
        self.events.push(SinkEvent::Notice {
            level: level.to_string(),
            notice,
        });
    }
}
