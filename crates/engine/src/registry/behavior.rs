use crate::level::queue::{Actor, UpdateQueue};
use crate::registry::BlockTypeRegistry;
use crate::world::{Block, BlockId, BlockPos, VoxelGrid};

/// What the dispatcher should do after a block's trigger ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerAction {
    /// Nothing further; the click is consumed.
    #[default]
    None,
    /// Replace the clicked block with air on behalf of the clicking player.
    Clear,
    /// Leave the block as it is and resend its real value to the clicking
    /// client, undoing whatever it predicted locally.
    Restore,
}

/// Per-blocktype callbacks.
///
/// Every method has a no-op default, so a type that only needs, say, a
/// rendering conversion implements just `convert`. Which capabilities a type
/// has is fixed when it is registered: `has_physics` is read once at
/// registration and cached in the descriptor.
///
/// Callbacks never mutate the grid directly. They read through the
/// [`BlockContext`] and request changes with [`BlockContext::enqueue`], which go
/// through the same update queue as player actions.
pub trait BlockBehavior: Send + Sync {
    /// The type clients should see for this block. Defaults to the stored type.
    fn convert(&self, block: Block) -> BlockId {
        block.kind()
    }

    /// Fired when a player clicks the block.
    fn trigger(&self, _ctx: &mut BlockContext<'_>) -> TriggerAction {
        TriggerAction::None
    }

    /// Fired when the block is replaced by a different type.
    fn on_delete(&self, _ctx: &mut BlockContext<'_>) {}

    /// Fired when the physics pass visits the block.
    fn physics(&self, _ctx: &mut BlockContext<'_>) {}

    /// Whether `physics` does anything. Blocks of types reporting `true` are
    /// members of their level's physics set.
    fn has_physics(&self) -> bool {
        false
    }
}

/// Behavior of a type with no callbacks at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inert;

impl BlockBehavior for Inert {}

/// The view a callback gets of the world around the block it is running for.
pub struct BlockContext<'a> {
    pub index: usize,
    pub pos: BlockPos,
    pub block: Block,
    /// Who caused the callback. `Actor::SYSTEM` for physics.
    pub actor: Actor,
    /// Ticks the level has run so far.
    pub tick: u64,
    grid: &'a VoxelGrid,
    registry: &'a BlockTypeRegistry,
    queue: &'a mut UpdateQueue,
}

impl<'a> BlockContext<'a> {
    pub fn new(
        index: usize,
        actor: Actor,
        tick: u64,
        grid: &'a VoxelGrid,
        registry: &'a BlockTypeRegistry,
        queue: &'a mut UpdateQueue,
    ) -> Option<Self> {
        let block = grid.get(index)?;
        let pos = grid.pos_of(index)?;
        Some(Self {
            index,
            pos,
            block,
            actor,
            tick,
            grid,
            registry,
            queue,
        })
    }

    pub fn grid(&self) -> &VoxelGrid {
        self.grid
    }

    pub fn registry(&self) -> &BlockTypeRegistry {
        self.registry
    }

    pub fn block_at(&self, pos: BlockPos) -> Option<Block> {
        self.grid.get_at(pos)
    }

    /// Stored type at `pos`, `None` outside the grid.
    pub fn kind_at(&self, pos: BlockPos) -> Option<BlockId> {
        self.grid.get_at(pos).map(Block::kind)
    }

    pub fn is_passable(&self, pos: BlockPos) -> bool {
        self.kind_at(pos)
            .is_some_and(|kind| self.registry.is_passable(kind))
    }

    /// Queue a change at `pos` as the system. Returns `false` (and queues
    /// nothing) when `pos` is outside the grid.
    pub fn enqueue(&mut self, pos: BlockPos, kind: BlockId, data: u16) -> bool {
        match self.grid.index_of(pos) {
            Some(index) => {
                self.queue.push(index, kind, data, Actor::SYSTEM);
                true
            }
            None => false,
        }
    }

    /// Queue a change of this block's own type and payload.
    pub fn replace_self(&mut self, kind: BlockId, data: u16) {
        self.queue.push(self.index, kind, data, Actor::SYSTEM);
    }
}
