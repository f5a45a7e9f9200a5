//! Simulation core of a multiplayer voxel world.
//!
//! - [`registry`]: blocktypes and their callbacks.
//! - [`world`]: packed blocks and the dense per-level grid.
//! - [`level`]: a grid plus its physics set, update queue and in-use guard.
//! - [`tick`]: the per-tick scheduler that runs physics, applies queued
//!   updates and reports visible changes.
//! - [`jobs`]: background worker pools for anything that would block a tick.
//! - [`path`]: A* over a level, run on a worker pool.

pub mod jobs;
pub mod level;
pub mod path;
pub mod registry;
pub mod tick;
pub mod world;
