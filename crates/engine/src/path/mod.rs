//! Pathfinding over a level's grid, run as a background job.

pub mod astar;

use std::sync::Arc;

pub use astar::{SearchFailed, SearchLimits, SearchReport, search};

use crate::jobs::{JobError, WorkerPool};
use crate::level::SharedLevel;
use crate::registry::Passability;
use crate::world::BlockPos;

/// Search for a path on `pool` and hand the outcome to `callback`.
///
/// The level is marked in use before the job is queued and released before
/// `callback` runs, so the tick thread leaves it untouched for exactly the
/// duration of the search. `user_data` is passed back to the callback as is.
#[allow(clippy::too_many_arguments)]
pub fn find_path<U, F>(
    pool: &WorkerPool,
    level: &Arc<SharedLevel>,
    passability: Passability,
    start: BlockPos,
    goal: BlockPos,
    limits: SearchLimits,
    user_data: U,
    callback: F,
) -> Result<(), JobError>
where
    U: Send + 'static,
    F: FnOnce(Result<Vec<BlockPos>, SearchFailed>, U) + Send + 'static,
{
    let guard = level.acquire();
    pool.submit((guard, user_data), move |(guard, user_data)| {
        let result = {
            let level = guard.read();
            search(level.grid(), &passability, start, goal, limits)
        };
        let name = guard.level().name().to_string();
        drop(guard);
        let result = match result {
            Ok(report) => {
                tracing::debug!(
                    "Path {} -> {} on '{}': {} steps, {} expanded",
                    start,
                    goal,
                    name,
                    report.path.len(),
                    report.expanded
                );
                Ok(report.path)
            }
            Err(e) => {
                tracing::debug!("Path {} -> {} on '{}' failed: {}", start, goal, name, e);
                Err(e)
            }
        };
        callback(result, user_data);
    })
}
