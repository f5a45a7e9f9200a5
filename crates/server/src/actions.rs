//! Gameplay actions: what happens when a player places, digs or clicks.
//!
//! Actions run on the tick thread against the player's current level. They
//! do the checks that need player context (level, reach, rank) and then go
//! through the level's update queue like everything else. The per-update
//! checks (ownership, fixed blocks) are repeated here only so a refused dig
//! can be answered with the block's real value right away.

use thiserror::Error;

use cubeworld_engine::level::{Level, Rejection};
use cubeworld_engine::registry::{BlockTypeRegistry, TriggerAction};
use cubeworld_engine::tick::Scheduler;
use cubeworld_engine::world::{BlockId, BlockPos};

use crate::player_registry::PlayerInfo;

/// How far from a player's eyes they can reach, in blocks.
pub const REACH: f64 = 8.0;

const EYE_HEIGHT: f64 = 1.6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionDenied {
    #[error("player is on level '{0}'")]
    WrongLevel(String),
    #[error("{0} is out of reach")]
    OutOfReach(BlockPos),
    #[error("rank too low to place blocktype {0:?}")]
    RankTooLow(BlockId),
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigOutcome {
    /// Air was queued in the block's place.
    Cleared,
    /// The block stays. Its rendered value should be resent to the player.
    Restored(BlockId),
}

fn check_reach(level: &Level, player: &PlayerInfo, pos: BlockPos) -> Result<(), ActionDenied> {
    if player.level != level.name() {
        return Err(ActionDenied::WrongLevel(player.level.clone()));
    }
    if !level.grid().contains(pos) {
        return Err(Rejection::OutOfRange.into());
    }
    let dx = f64::from(pos.x) + 0.5 - player.x;
    let dy = f64::from(pos.y) + 0.5 - (player.y + EYE_HEIGHT);
    let dz = f64::from(pos.z) + 0.5 - player.z;
    if dx * dx + dy * dy + dz * dz > REACH * REACH {
        return Err(ActionDenied::OutOfReach(pos));
    }
    Ok(())
}

/// Queue `kind` at `pos` on the player's behalf.
pub fn place(
    level: &mut Level,
    registry: &BlockTypeRegistry,
    player: &PlayerInfo,
    pos: BlockPos,
    kind: BlockId,
) -> Result<(), ActionDenied> {
    check_reach(level, player, pos)?;
    if !registry.contains(kind) {
        return Err(Rejection::UnknownType(kind).into());
    }
    if !registry.can_place(kind, player.rank) {
        return Err(ActionDenied::RankTooLow(kind));
    }
    level.enqueue_at(pos, kind, 0, player.actor())?;
    Ok(())
}

/// Dig the block at `pos`. Types that don't clear on delete, and blocks the
/// player may not touch, are restored instead.
pub fn dig(
    level: &mut Level,
    registry: &BlockTypeRegistry,
    player: &PlayerInfo,
    pos: BlockPos,
) -> Result<DigOutcome, ActionDenied> {
    check_reach(level, player, pos)?;
    let block = level.block(pos).ok_or(Rejection::OutOfRange)?;
    let actor = player.actor();
    let allowed = actor.privileged
        || (registry.clears_on_delete(block.kind())
            && !block.is_fixed()
            && (block.owner().is_none() || block.owner() == actor.owner));
    if !allowed {
        return Ok(DigOutcome::Restored(registry.dispatch_convert(block)));
    }
    level.enqueue_at(pos, BlockId::AIR, 0, actor)?;
    Ok(DigOutcome::Cleared)
}

/// Fire the trigger of the block at `pos`.
pub fn click(
    level: &mut Level,
    registry: &BlockTypeRegistry,
    scheduler: &Scheduler,
    player: &PlayerInfo,
    pos: BlockPos,
) -> Result<TriggerAction, ActionDenied> {
    check_reach(level, player, pos)?;
    Ok(scheduler.click(level, registry, pos, player.actor())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{self, builtin_registry};
    use crate::levels::flat_grid;
    use cubeworld_engine::registry::Rank;
    use cubeworld_engine::tick::NullSink;
    use cubeworld_engine::world::{Dimensions, OwnerId};

    fn setup() -> (Level, BlockTypeRegistry) {
        let registry = builtin_registry().unwrap();
        let grid = flat_grid(Dimensions::new(16, 16, 16)).unwrap();
        (Level::new("main", grid, &registry), registry)
    }

    fn player(id: u32, rank: Rank) -> PlayerInfo {
        PlayerInfo::new(OwnerId(id), format!("p{}", id), rank, "main").at(8.5, 9.0, 8.5)
    }

    #[test]
    fn place_checks_level_reach_and_rank() {
        let (mut level, registry) = setup();
        let guest = player(1, Rank::GUEST);
        let spot = BlockPos::new(8, 9, 9);

        assert_eq!(
            place(&mut level, &registry, &guest, spot, block::ADMIN_CRETE),
            Err(ActionDenied::RankTooLow(block::ADMIN_CRETE))
        );
        assert_eq!(
            place(&mut level, &registry, &guest, BlockPos::new(0, 9, 15), block::STONE)
                .map_err(|e| matches!(e, ActionDenied::OutOfReach(_))),
            Err(true)
        );
        assert_eq!(
            place(&mut level, &registry, &guest, BlockPos::new(8, 99, 8), block::STONE),
            Err(ActionDenied::Rejected(Rejection::OutOfRange))
        );
        assert_eq!(
            place(&mut level, &registry, &guest, spot, BlockId(3000)),
            Err(ActionDenied::Rejected(Rejection::UnknownType(BlockId(3000))))
        );
        let elsewhere = PlayerInfo {
            level: "arena".into(),
            ..guest.clone()
        };
        assert_eq!(
            place(&mut level, &registry, &elsewhere, spot, block::STONE),
            Err(ActionDenied::WrongLevel("arena".into()))
        );

        assert_eq!(place(&mut level, &registry, &guest, spot, block::STONE), Ok(()));
        assert_eq!(level.pending_updates(), 1);
    }

    #[test]
    fn dig_restores_what_the_player_cannot_remove() {
        let (mut level, registry) = setup();
        let scheduler = Scheduler::new();
        let owner = player(1, Rank::BUILDER);
        let other = player(2, Rank::BUILDER);
        let op = player(3, Rank::OPERATOR);
        let spot = BlockPos::new(9, 9, 8);

        place(&mut level, &registry, &owner, spot, block::PLANKS).unwrap();
        place(&mut level, &registry, &op, spot.above(), block::ADMIN_CRETE).unwrap();
        scheduler.tick(&mut level, &registry, &mut NullSink);

        assert_eq!(
            dig(&mut level, &registry, &other, spot),
            Ok(DigOutcome::Restored(block::PLANKS))
        );
        assert_eq!(
            dig(&mut level, &registry, &owner, spot.above()),
            Ok(DigOutcome::Restored(block::ADMIN_CRETE))
        );
        assert_eq!(level.pending_updates(), 0);

        assert_eq!(dig(&mut level, &registry, &owner, spot), Ok(DigOutcome::Cleared));
        assert_eq!(dig(&mut level, &registry, &op, spot.above()), Ok(DigOutcome::Cleared));
        scheduler.tick(&mut level, &registry, &mut NullSink);
        assert_eq!(level.block(spot).unwrap().kind(), block::AIR);
        assert_eq!(level.block(spot.above()).unwrap().kind(), block::AIR);
    }

    #[test]
    fn click_reaches_the_trigger() {
        let (mut level, registry) = setup();
        let scheduler = Scheduler::new();
        let p = player(1, Rank::GUEST);
        let door = BlockPos::new(8, 9, 10);
        place(&mut level, &registry, &p, door, block::DOOR).unwrap();
        scheduler.tick(&mut level, &registry, &mut NullSink);

        assert_eq!(
            click(&mut level, &registry, &scheduler, &p, door),
            Ok(TriggerAction::Restore)
        );
        scheduler.tick(&mut level, &registry, &mut NullSink);
        assert_eq!(level.block(door).unwrap().kind(), block::OPEN_DOOR);
    }
}
