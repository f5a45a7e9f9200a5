//! Built-in blocktypes and their behaviors.
//!
//! Ids below [`BUILTIN_LIMIT`](cubeworld_engine::registry::BUILTIN_LIMIT) are
//! fixed here so saved levels and clients agree on them. Extension types
//! registered at runtime get ids above that range.

use cubeworld_engine::registry::{
    BlockBehavior, BlockContext, BlockType, BlockTypeRegistry, Rank, RegistryError, Slot,
    TriggerAction,
};
use cubeworld_engine::world::{Block, BlockId, BlockPos};

pub const AIR: BlockId = BlockId(0);
pub const STONE: BlockId = BlockId(1);
pub const GRASS: BlockId = BlockId(2);
pub const DIRT: BlockId = BlockId(3);
pub const COBBLESTONE: BlockId = BlockId(4);
pub const PLANKS: BlockId = BlockId(5);
pub const BEDROCK: BlockId = BlockId(7);
pub const ACTIVE_WATER: BlockId = BlockId(8);
pub const WATER: BlockId = BlockId(9);
pub const ACTIVE_LAVA: BlockId = BlockId(10);
pub const LAVA: BlockId = BlockId(11);
pub const SAND: BlockId = BlockId(12);
pub const GRAVEL: BlockId = BlockId(13);
pub const SPONGE: BlockId = BlockId(19);
pub const DOOR: BlockId = BlockId(64);
pub const OPEN_DOOR: BlockId = BlockId(65);
pub const ADMIN_CRETE: BlockId = BlockId(66);

/// Physics visits an open door waits before swinging shut.
pub const DOOR_OPEN_TICKS: u16 = 30;

/// Horizontal cells fluid may travel from where it was poured.
pub const WATER_REACH: u16 = 6;
pub const LAVA_REACH: u16 = 3;
/// Physics visits active lava idles before each spread step.
pub const LAVA_DELAY: u16 = 4;

/// Cube radius a sponge drains.
pub const SPONGE_RADIUS: i32 = 2;

// ── Gravity ──────────────────────────────────────────────────────────────

/// Sand and gravel: drop one cell per physics visit while the cell below
/// is air or water, trading places with whatever was there.
pub struct Falling;

/// Whether a falling block can sink into `kind`.
fn is_replaceable(kind: BlockId) -> bool {
    matches!(kind, AIR | WATER | ACTIVE_WATER)
}

impl BlockBehavior for Falling {
    fn physics(&self, ctx: &mut BlockContext<'_>) {
        let below = ctx.pos.below();
        let Some(below_kind) = ctx.kind_at(below) else {
            return;
        };
        if !is_replaceable(below_kind) {
            return;
        }
        let kind = ctx.block.kind();
        if ctx.enqueue(below, kind, 0) {
            ctx.replace_self(below_kind, 0);
        }
    }

    fn has_physics(&self) -> bool {
        true
    }
}

// ── Fluids ───────────────────────────────────────────────────────────────

/// Spreading variant of a fluid.
///
/// The payload packs the horizontal distance already travelled (low byte)
/// and the visits left before the next step (high byte). Each step either
/// pours into air directly below or, on solid ground, spreads sideways into
/// air one cell further from the source. Either way the block then settles
/// into the still variant.
pub struct ActiveFluid {
    pub active: BlockId,
    pub still: BlockId,
    pub reach: u16,
    pub delay: u16,
}

impl ActiveFluid {
    pub const fn water() -> Self {
        Self {
            active: ACTIVE_WATER,
            still: WATER,
            reach: WATER_REACH,
            delay: 0,
        }
    }

    pub const fn lava() -> Self {
        Self {
            active: ACTIVE_LAVA,
            still: LAVA,
            reach: LAVA_REACH,
            delay: LAVA_DELAY,
        }
    }

    pub const fn pack(distance: u16, wait: u16) -> u16 {
        (wait << 8) | (distance & 0xff)
    }

    fn near_sponge(ctx: &BlockContext<'_>, pos: BlockPos) -> bool {
        let r = SPONGE_RADIUS;
        for dy in -r..=r {
            for dz in -r..=r {
                for dx in -r..=r {
                    if ctx.kind_at(pos.offset(dx, dy, dz)) == Some(SPONGE) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl BlockBehavior for ActiveFluid {
    fn convert(&self, _block: Block) -> BlockId {
        self.still
    }

    fn physics(&self, ctx: &mut BlockContext<'_>) {
        let data = ctx.block.data();
        let (distance, wait) = (data & 0xff, data >> 8);
        if wait > 0 {
            ctx.replace_self(self.active, Self::pack(distance, wait - 1));
            return;
        }

        let below = ctx.pos.below();
        if ctx.kind_at(below) == Some(AIR) {
            if !Self::near_sponge(ctx, below) {
                ctx.enqueue(below, self.active, Self::pack(distance, self.delay));
            }
        } else if distance < self.reach {
            for next in ctx.pos.horizontal_neighbors() {
                if ctx.kind_at(next) == Some(AIR) && !Self::near_sponge(ctx, next) {
                    ctx.enqueue(next, self.active, Self::pack(distance + 1, self.delay));
                }
            }
        }
        ctx.replace_self(self.still, 0);
    }

    fn has_physics(&self) -> bool {
        true
    }
}

/// Drains every water cell within [`SPONGE_RADIUS`].
pub struct Sponge;

impl BlockBehavior for Sponge {
    fn physics(&self, ctx: &mut BlockContext<'_>) {
        let r = SPONGE_RADIUS;
        for dy in -r..=r {
            for dz in -r..=r {
                for dx in -r..=r {
                    let pos = ctx.pos.offset(dx, dy, dz);
                    if matches!(ctx.kind_at(pos), Some(WATER | ACTIVE_WATER)) {
                        ctx.enqueue(pos, AIR, 0);
                    }
                }
            }
        }
    }

    fn has_physics(&self) -> bool {
        true
    }
}

// ── Doors ────────────────────────────────────────────────────────────────

/// Closed door: a click swings it open.
pub struct Door;

impl BlockBehavior for Door {
    fn trigger(&self, ctx: &mut BlockContext<'_>) -> TriggerAction {
        ctx.replace_self(OPEN_DOOR, DOOR_OPEN_TICKS);
        TriggerAction::Restore
    }
}

/// Open door: invisible and walkable, closes itself after a countdown.
pub struct OpenDoor;

impl BlockBehavior for OpenDoor {
    fn convert(&self, _block: Block) -> BlockId {
        AIR
    }

    fn physics(&self, ctx: &mut BlockContext<'_>) {
        match ctx.block.data() {
            0 => ctx.replace_self(DOOR, 0),
            n => ctx.replace_self(OPEN_DOOR, n - 1),
        }
    }

    fn has_physics(&self) -> bool {
        true
    }
}

// ── Registration ─────────────────────────────────────────────────────────

fn builtin_types() -> Vec<(BlockId, BlockType)> {
    vec![
        (AIR, BlockType::new("air").passable(true)),
        (STONE, BlockType::new("stone")),
        (GRASS, BlockType::new("grass")),
        (DIRT, BlockType::new("dirt")),
        (COBBLESTONE, BlockType::new("cobblestone")),
        (PLANKS, BlockType::new("planks")),
        (
            BEDROCK,
            BlockType::new("bedrock")
                .min_rank(Rank::OPERATOR)
                .clears(false),
        ),
        (
            ACTIVE_WATER,
            BlockType::new("active_water")
                .behavior(ActiveFluid::water())
                .min_rank(Rank::BUILDER)
                .passable(true)
                .swimmable(true),
        ),
        (
            WATER,
            BlockType::new("water")
                .min_rank(Rank::BUILDER)
                .passable(true)
                .swimmable(true),
        ),
        (
            ACTIVE_LAVA,
            BlockType::new("active_lava")
                .behavior(ActiveFluid::lava())
                .min_rank(Rank::OPERATOR)
                .swimmable(true),
        ),
        (
            LAVA,
            BlockType::new("lava")
                .min_rank(Rank::OPERATOR)
                .swimmable(true),
        ),
        (SAND, BlockType::new("sand").behavior(Falling)),
        (GRAVEL, BlockType::new("gravel").behavior(Falling)),
        (SPONGE, BlockType::new("sponge").behavior(Sponge)),
        (DOOR, BlockType::new("door").behavior(Door)),
        (
            OPEN_DOOR,
            BlockType::new("open_door")
                .behavior(OpenDoor)
                .passable(true),
        ),
        (
            ADMIN_CRETE,
            BlockType::new("admin_crete")
                .min_rank(Rank::OPERATOR)
                .clears(false),
        ),
    ]
}

/// Register every built-in type into `registry`.
pub fn register_builtins(registry: &mut BlockTypeRegistry) -> Result<(), RegistryError> {
    for (id, ty) in builtin_types() {
        registry.register(Slot::Explicit(id), ty)?;
    }
    tracing::info!("Registered {} built-in blocktypes", registry.len());
    Ok(())
}

/// A registry holding just the built-ins.
pub fn builtin_registry() -> Result<BlockTypeRegistry, RegistryError> {
    let mut registry = BlockTypeRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}
