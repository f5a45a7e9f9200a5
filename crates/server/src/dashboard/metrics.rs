//! Lock-free performance counters.
//!
//! The tick thread updates these with atomic operations: no locks, no
//! allocations, no blocking on the hot path. The dashboard server reads them
//! at its own pace.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use cubeworld_engine::jobs::PoolStats;
use cubeworld_engine::tick::TickReport;

/// Atomic performance counters. ~10 ns to update (a handful of `fetch_add`s).
pub struct Metrics {
    // Monotonic counters
    ticks: AtomicU64,
    updates_applied: AtomicU64,
    updates_rejected: AtomicU64,
    notifications: AtomicU64,
    physics_visited: AtomicU64,
    tick_ns_sum: AtomicU64,
    ticks_skipped: AtomicU64,

    // Tick duration histogram buckets
    hist_under_1ms: AtomicU64,
    hist_1_5ms: AtomicU64,
    hist_5_20ms: AtomicU64,
    hist_20_50ms: AtomicU64,
    hist_over_50ms: AtomicU64,

    // Gauges
    backlog: AtomicU64,
    physics_members: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            updates_rejected: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            physics_visited: AtomicU64::new(0),
            tick_ns_sum: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            hist_under_1ms: AtomicU64::new(0),
            hist_1_5ms: AtomicU64::new(0),
            hist_5_20ms: AtomicU64::new(0),
            hist_20_50ms: AtomicU64::new(0),
            hist_over_50ms: AtomicU64::new(0),
            backlog: AtomicU64::new(0),
            physics_members: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Called once per level per tick with the scheduler's report.
    pub fn record_level_tick(&self, report: &TickReport) {
        self.updates_applied.fetch_add(report.applied as u64, Relaxed);
        self.updates_rejected.fetch_add(report.rejected as u64, Relaxed);
        self.notifications.fetch_add(report.notified as u64, Relaxed);
        self.physics_visited
            .fetch_add(report.physics_visited as u64, Relaxed);
    }

    /// A level was left alone this tick because a job held it.
    pub fn record_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Relaxed);
    }

    /// Called once per server tick, after every level ran.
    pub fn record_tick(&self, duration: Duration, backlog: usize, physics_members: usize) {
        self.ticks.fetch_add(1, Relaxed);
        self.tick_ns_sum
            .fetch_add(duration.as_nanos() as u64, Relaxed);
        self.backlog.store(backlog as u64, Relaxed);
        self.physics_members.store(physics_members as u64, Relaxed);

        let ms = duration.as_millis() as u64;
        match ms {
            0 => {
                self.hist_under_1ms.fetch_add(1, Relaxed);
            }
            1..=4 => {
                self.hist_1_5ms.fetch_add(1, Relaxed);
            }
            5..=19 => {
                self.hist_5_20ms.fetch_add(1, Relaxed);
            }
            20..=49 => {
                self.hist_20_50ms.fetch_add(1, Relaxed);
            }
            _ => {
                self.hist_over_50ms.fetch_add(1, Relaxed);
            }
        }
    }

    /// Read all counters into a serializable snapshot.
    pub fn snapshot(&self, levels_loaded: u64, players: u64, pools: Vec<PoolSnapshot>) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            ticks_total: self.ticks.load(Relaxed),
            updates_applied: self.updates_applied.load(Relaxed),
            updates_rejected: self.updates_rejected.load(Relaxed),
            notifications: self.notifications.load(Relaxed),
            physics_visited: self.physics_visited.load(Relaxed),
            tick_ns_sum: self.tick_ns_sum.load(Relaxed),
            ticks_skipped: self.ticks_skipped.load(Relaxed),
            backlog: self.backlog.load(Relaxed),
            physics_members: self.physics_members.load(Relaxed),
            levels_loaded,
            players,
            hist: [
                self.hist_under_1ms.load(Relaxed),
                self.hist_1_5ms.load(Relaxed),
                self.hist_5_20ms.load(Relaxed),
                self.hist_20_50ms.load(Relaxed),
                self.hist_over_50ms.load(Relaxed),
            ],
            pools,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub running: bool,
    pub pending: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub spawns: u64,
    pub idle_exits: u64,
}

impl PoolSnapshot {
    pub fn new(name: &str, running: bool, pending: usize, stats: PoolStats) -> Self {
        Self {
            name: name.to_string(),
            running,
            pending,
            submitted: stats.submitted,
            completed: stats.completed,
            panicked: stats.panicked,
            spawns: stats.spawns,
            idle_exits: stats.idle_exits,
        }
    }
}

/// Serializable snapshot of all metrics at a point in time.
/// The client computes rates (ticks/sec, etc.) by diffing consecutive snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub ticks_total: u64,
    pub updates_applied: u64,
    pub updates_rejected: u64,
    pub notifications: u64,
    pub physics_visited: u64,
    pub tick_ns_sum: u64,
    pub ticks_skipped: u64,
    pub backlog: u64,
    pub physics_members: u64,
    pub levels_loaded: u64,
    pub players: u64,
    /// `[<1ms, 1-5ms, 5-20ms, 20-50ms, >50ms]`
    pub hist: [u64; 5],
    pub pools: Vec<PoolSnapshot>,
}
