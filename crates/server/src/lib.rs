//! Multiplayer voxel world server built on `cubeworld-engine`.
//!
//! The engine owns the simulation; this crate supplies the blocktypes, the
//! tick thread that drives it, level storage, and the observers (event bus and
//! dashboard) that watch it.

pub mod actions;
pub mod block;
pub mod config;
pub mod dashboard;
pub mod event_bus;
pub mod levels;
pub mod persistence;
pub mod player_registry;
pub mod tick;
