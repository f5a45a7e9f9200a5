//! Live web dashboard: tick metrics and world-change batches.
//!
//! Design contract with the tick thread:
//!   • Metrics: atomic fetch_add (~10 ns, zero-alloc, never blocks).
//!   • Block changes: the dashboard is just another subscriber of the event
//!     bus; if it falls behind it skips batches, never stalling the tick.
//!   • The web server runs on its own tokio tasks and never locks a level.

pub mod metrics;
pub mod server;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use cubeworld_engine::jobs::WorkerPool;
use cubeworld_engine::tick::LevelNotice;

use crate::event_bus::{Audience, WorldChangeBatch};
use crate::levels::LevelDirectory;
use crate::player_registry::PlayerRegistry;
pub use metrics::{Metrics, MetricsSnapshot, PoolSnapshot};

/// Central state shared via `Arc<DashboardState>`.
pub struct DashboardState {
    pub metrics: Arc<Metrics>,
    pub levels: Arc<LevelDirectory>,
    pub players: Arc<PlayerRegistry>,
    bus: broadcast::Sender<WorldChangeBatch>,
    pools: Vec<WorkerPool>,
}

impl DashboardState {
    pub fn new(
        metrics: Arc<Metrics>,
        levels: Arc<LevelDirectory>,
        players: Arc<PlayerRegistry>,
        bus: broadcast::Sender<WorldChangeBatch>,
        pools: Vec<WorkerPool>,
    ) -> Self {
        Self {
            metrics,
            levels,
            players,
            bus,
            pools,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let pools = self
            .pools
            .iter()
            .map(|p| PoolSnapshot::new(p.name(), p.is_running(), p.pending(), p.stats()))
            .collect();
        self.metrics.snapshot(
            self.levels.len() as u64,
            self.players.player_count() as u64,
            pools,
        )
    }

    /// New receiver for world changes (one per WebSocket client).
    pub fn subscribe_changes(&self) -> broadcast::Receiver<WorldChangeBatch> {
        self.bus.subscribe()
    }
}

/// Wire form of a [`WorldChangeBatch`] for browsers.
#[derive(Clone, Debug, Serialize)]
pub struct BatchView {
    pub level: String,
    pub tick: u64,
    /// `[x, y, z, rendered_type]`
    pub changes: Vec<[i32; 4]>,
    pub resend: bool,
    pub messages: Vec<String>,
}

impl BatchView {
    /// `None` for batches aimed at a single player.
    pub fn from_batch(batch: &WorldChangeBatch) -> Option<Self> {
        if batch.audience != Audience::Level {
            return None;
        }
        let mut resend = false;
        let mut messages = Vec::new();
        for notice in batch.notices.iter() {
            match notice {
                LevelNotice::ResendLevel => resend = true,
                LevelNotice::Message(text) => messages.push(text.clone()),
            }
        }
        Some(Self {
            level: batch.level.to_string(),
            tick: batch.tick,
            changes: batch
                .changes
                .iter()
                .map(|(pos, id)| [pos.x, pos.y, pos.z, i32::from(id.0)])
                .collect(),
            resend,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cubeworld_engine::world::{BlockId, BlockPos, OwnerId};

    #[test]
    fn batch_view_flattens_changes_and_notices() {
        let batch = WorldChangeBatch {
            level: "main".into(),
            tick: 12,
            audience: Audience::Level,
            changes: vec![(BlockPos::new(1, 2, 3), BlockId(12))].into(),
            notices: vec![
                LevelNotice::Message("hi".into()),
                LevelNotice::ResendLevel,
            ]
            .into(),
        };
        let view = BatchView::from_batch(&batch).unwrap();
        assert_eq!(view.changes, vec![[1, 2, 3, 12]]);
        assert!(view.resend);
        assert_eq!(view.messages, vec!["hi".to_string()]);

        let private = WorldChangeBatch {
            audience: Audience::Player(OwnerId(1)),
            ..batch
        };
        assert!(BatchView::from_batch(&private).is_none());
    }
}
