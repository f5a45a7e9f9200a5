//! Directory of connected players.
//!
//! Tracks who is online, their rank, which level they are on and where they
//! stand, and broadcasts join/leave/move events so every session can keep
//! its view of other players current.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::broadcast;

use cubeworld_engine::level::Actor;
use cubeworld_engine::registry::Rank;
use cubeworld_engine::world::{BlockPos, OwnerId};

/// Information about a connected player.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerInfo {
    /// Also the owner id stamped on blocks the player places.
    pub id: OwnerId,
    pub name: String,
    pub rank: Rank,
    pub level: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PlayerInfo {
    pub fn new(id: OwnerId, name: impl Into<String>, rank: Rank, level: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            rank,
            level: level.into(),
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    pub fn at(mut self, x: f64, y: f64, z: f64) -> Self {
        self.x = x;
        self.y = y;
        self.z = z;
        self
    }

    /// Operators may edit anyone's blocks and fixed blocks.
    pub fn actor(&self) -> Actor {
        if self.rank >= Rank::OPERATOR {
            Actor::operator(self.id)
        } else {
            Actor::player(self.id)
        }
    }

    /// Block the player's feet are in.
    pub fn block_pos(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// Lifecycle events broadcast to all sessions.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    Joined(PlayerInfo),
    Left {
        id: OwnerId,
        level: String,
    },
    Moved {
        id: OwnerId,
        x: f64,
        y: f64,
        z: f64,
    },
    ChangedLevel {
        id: OwnerId,
        from: String,
        to: String,
    },
}

/// Thread-safe registry of all connected players.
///
/// Uses `std::sync::RwLock` because every operation is brief (no awaits while
/// the lock is held) and the access pattern is read-heavy.
pub struct PlayerRegistry {
    players: RwLock<HashMap<OwnerId, PlayerInfo>>,
    next_id: AtomicU32,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(512);
        Self {
            players: RwLock::new(HashMap::new()),
            // 0 is "unowned".
            next_id: AtomicU32::new(1),
            event_tx,
        }
    }

    /// Allocate a fresh player id.
    pub fn allocate_id(&self) -> OwnerId {
        OwnerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a player and broadcast `PlayerEvent::Joined`.
    pub fn register(&self, info: PlayerInfo) {
        let event = PlayerEvent::Joined(info.clone());
        self.players
            .write()
            .expect("player registry poisoned")
            .insert(info.id, info);
        // Best-effort: if no subscribers yet, the send fails silently.
        let _ = self.event_tx.send(event);
    }

    pub fn update_position(&self, id: OwnerId, x: f64, y: f64, z: f64) {
        {
            let mut players = self.players.write().expect("player registry poisoned");
            let Some(info) = players.get_mut(&id) else {
                return;
            };
            info.x = x;
            info.y = y;
            info.z = z;
        }
        let _ = self.event_tx.send(PlayerEvent::Moved { id, x, y, z });
    }

    /// Move a player to another level. Returns `false` for unknown players.
    pub fn change_level(&self, id: OwnerId, level: &str) -> bool {
        let from = {
            let mut players = self.players.write().expect("player registry poisoned");
            let Some(info) = players.get_mut(&id) else {
                return false;
            };
            std::mem::replace(&mut info.level, level.to_string())
        };
        let _ = self.event_tx.send(PlayerEvent::ChangedLevel {
            id,
            from,
            to: level.to_string(),
        });
        true
    }

    pub fn set_rank(&self, id: OwnerId, rank: Rank) -> bool {
        let mut players = self.players.write().expect("player registry poisoned");
        match players.get_mut(&id) {
            Some(info) => {
                info.rank = rank;
                true
            }
            None => false,
        }
    }

    /// Remove a player and broadcast `PlayerEvent::Left`.
    pub fn deregister(&self, id: OwnerId) -> Option<PlayerInfo> {
        let info = self
            .players
            .write()
            .expect("player registry poisoned")
            .remove(&id);
        if let Some(info) = &info {
            let _ = self.event_tx.send(PlayerEvent::Left {
                id,
                level: info.level.clone(),
            });
        }
        info
    }

    pub fn get(&self, id: OwnerId) -> Option<PlayerInfo> {
        self.players
            .read()
            .expect("player registry poisoned")
            .get(&id)
            .cloned()
    }

    /// Snapshot of all currently registered players.
    pub fn snapshot(&self) -> Vec<PlayerInfo> {
        self.players
            .read()
            .expect("player registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().expect("player registry poisoned").len()
    }

    /// Players currently on `level`.
    pub fn count_on(&self, level: &str) -> usize {
        self.players
            .read()
            .expect("player registry poisoned")
            .values()
            .filter(|p| p.level == level)
            .count()
    }

    /// Subscribe to player lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
