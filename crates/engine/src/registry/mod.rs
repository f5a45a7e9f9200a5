pub mod behavior;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::world::{Block, BlockId};
pub use behavior::{BlockBehavior, BlockContext, Inert, TriggerAction};

/// Ids below this are reserved for built-in types and only handed out by
/// explicit registration. Auto registration allocates above it.
pub const BUILTIN_LIMIT: u16 = 256;

/// Permission level of a player. Compared against a type's `min_rank` before a
/// player may place it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rank(pub u8);

impl Rank {
    pub const GUEST: Rank = Rank(0);
    pub const BUILDER: Rank = Rank(30);
    pub const OPERATOR: Rank = Rank(80);
    pub const ADMIN: Rank = Rank(100);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no free blocktype id")]
    RegistryExhausted,
    #[error("blocktype id {0:?} is already registered")]
    IdOccupied(BlockId),
    #[error("blocktype id {0:?} is outside the id space")]
    IdOutOfRange(BlockId),
    #[error("blocktype name '{0}' is already registered")]
    DuplicateName(String),
}

/// Where to register a new type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Explicit(BlockId),
    /// Lowest free id in the extension space.
    Auto,
}

/// Descriptor for one registered blocktype.
#[derive(Clone)]
pub struct BlockType {
    name: String,
    min_rank: Rank,
    behavior: Arc<dyn BlockBehavior>,
    physics: bool,
    clears: bool,
    passable: bool,
    swimmable: bool,
}

impl BlockType {
    /// A solid, clearable type with no callbacks, placeable by anyone.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_rank: Rank::GUEST,
            behavior: Arc::new(Inert),
            physics: false,
            clears: true,
            passable: false,
            swimmable: false,
        }
    }

    pub fn min_rank(mut self, rank: Rank) -> Self {
        self.min_rank = rank;
        self
    }

    pub fn behavior(mut self, behavior: impl BlockBehavior + 'static) -> Self {
        self.physics = behavior.has_physics();
        self.behavior = Arc::new(behavior);
        self
    }

    pub fn clears(mut self, clears: bool) -> Self {
        self.clears = clears;
        self
    }

    pub fn passable(mut self, passable: bool) -> Self {
        self.passable = passable;
        self
    }

    pub fn swimmable(mut self, swimmable: bool) -> Self {
        self.swimmable = swimmable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> Rank {
        self.min_rank
    }

    pub fn has_physics(&self) -> bool {
        self.physics
    }

    pub fn is_clearable(&self) -> bool {
        self.clears
    }

    pub fn is_passable(&self) -> bool {
        self.passable
    }

    pub fn is_swimmable(&self) -> bool {
        self.swimmable
    }
}

impl std::fmt::Debug for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockType")
            .field("name", &self.name)
            .field("min_rank", &self.min_rank)
            .field("physics", &self.physics)
            .field("clears", &self.clears)
            .field("passable", &self.passable)
            .field("swimmable", &self.swimmable)
            .finish()
    }
}

/// Table of registered blocktypes, indexed by id.
///
/// The first [`BUILTIN_LIMIT`] slots always exist; the extension space above
/// grows on demand up to [`BlockId::LIMIT`].
///
/// Deregistering a type does not touch blocks that still carry its id. Every
/// dispatch against an unregistered id is an identity no-op: `convert` returns
/// the stored id, `trigger` returns [`TriggerAction::None`], `on_delete` and
/// `physics` do nothing.
pub struct BlockTypeRegistry {
    slots: Vec<Option<BlockType>>,
    names: HashMap<String, BlockId>,
}

impl BlockTypeRegistry {
    pub fn new() -> Self {
        Self {
            slots: vec![None; BUILTIN_LIMIT as usize],
            names: HashMap::new(),
        }
    }

    pub fn register(&mut self, slot: Slot, ty: BlockType) -> Result<BlockId, RegistryError> {
        if self.names.contains_key(&ty.name) {
            return Err(RegistryError::DuplicateName(ty.name));
        }
        let id = match slot {
            Slot::Explicit(id) => {
                if id.0 >= BlockId::LIMIT {
                    return Err(RegistryError::IdOutOfRange(id));
                }
                if self.get(id).is_some() {
                    return Err(RegistryError::IdOccupied(id));
                }
                id
            }
            Slot::Auto => self.first_free_extension()?,
        };
        if id.index() >= self.slots.len() {
            self.slots.resize(id.index() + 1, None);
        }
        tracing::debug!("Registered blocktype '{}' as {}", ty.name, id.0);
        self.names.insert(ty.name.clone(), id);
        self.slots[id.index()] = Some(ty);
        Ok(id)
    }

    /// Free `id`. Returns the descriptor that was registered there, if any.
    pub fn deregister(&mut self, id: BlockId) -> Option<BlockType> {
        let ty = self.slots.get_mut(id.index())?.take()?;
        self.names.remove(&ty.name);
        tracing::debug!("Deregistered blocktype '{}' ({})", ty.name, id.0);
        Some(ty)
    }

    fn first_free_extension(&self) -> Result<BlockId, RegistryError> {
        let start = BUILTIN_LIMIT as usize;
        let free = self.slots[start..]
            .iter()
            .position(Option::is_none)
            .map(|offset| start + offset);
        match free {
            Some(i) => Ok(BlockId(i as u16)),
            None if self.slots.len() < BlockId::LIMIT as usize => {
                Ok(BlockId(self.slots.len() as u16))
            }
            None => Err(RegistryError::RegistryExhausted),
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: BlockId) -> Option<&str> {
        self.get(id).map(BlockType::name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registered `(id, descriptor)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &BlockType)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|ty| (BlockId(i as u16), ty)))
    }

    pub fn has_physics(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(BlockType::has_physics)
    }

    /// Unknown ids are solid.
    pub fn is_passable(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(BlockType::is_passable)
    }

    pub fn is_swimmable(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(BlockType::is_swimmable)
    }

    pub fn clears_on_delete(&self, id: BlockId) -> bool {
        self.get(id).is_some_and(BlockType::is_clearable)
    }

    /// Whether a player of `rank` may place `id`. Unknown ids can't be placed.
    pub fn can_place(&self, id: BlockId, rank: Rank) -> bool {
        self.get(id).is_some_and(|ty| rank >= ty.min_rank)
    }

    /// Snapshot of the passable flag of every id, for readers off the tick
    /// thread.
    pub fn passability(&self) -> Passability {
        let flags: Vec<bool> = self
            .slots
            .iter()
            .map(|slot| slot.as_ref().is_some_and(BlockType::is_passable))
            .collect();
        Passability(flags.into())
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    pub fn dispatch_convert(&self, block: Block) -> BlockId {
        match self.get(block.kind()) {
            Some(ty) => ty.behavior.convert(block),
            None => block.kind(),
        }
    }

    pub fn dispatch_trigger(&self, ctx: &mut BlockContext<'_>) -> TriggerAction {
        match self.get(ctx.block.kind()) {
            Some(ty) => ty.behavior.trigger(ctx),
            None => TriggerAction::None,
        }
    }

    pub fn dispatch_delete(&self, ctx: &mut BlockContext<'_>) {
        if let Some(ty) = self.get(ctx.block.kind()) {
            ty.behavior.on_delete(ctx);
        }
    }

    pub fn dispatch_physics(&self, ctx: &mut BlockContext<'_>) {
        if let Some(ty) = self.get(ctx.block.kind()) {
            if ty.physics {
                ty.behavior.physics(ctx);
            }
        }
    }
}

impl Default for BlockTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable per-id passable flags, cheap to clone across threads.
#[derive(Clone, Debug)]
pub struct Passability(Arc<[bool]>);

impl Passability {
    pub fn is_passable(&self, id: BlockId) -> bool {
        self.0.get(id.index()).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_registration_skips_builtin_space() {
        let mut reg = BlockTypeRegistry::new();
        let a = reg.register(Slot::Auto, BlockType::new("a")).unwrap();
        let b = reg.register(Slot::Auto, BlockType::new("b")).unwrap();
        assert_eq!(a, BlockId(BUILTIN_LIMIT));
        assert_eq!(b, BlockId(BUILTIN_LIMIT + 1));
    }

    #[test]
    fn auto_registration_reuses_lowest_free_extension_id() {
        let mut reg = BlockTypeRegistry::new();
        let a = reg.register(Slot::Auto, BlockType::new("a")).unwrap();
        reg.register(Slot::Auto, BlockType::new("b")).unwrap();
        reg.deregister(a);
        assert_eq!(reg.register(Slot::Auto, BlockType::new("c")).unwrap(), a);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut reg = BlockTypeRegistry::new();
        for i in BUILTIN_LIMIT..BlockId::LIMIT {
            reg.register(Slot::Auto, BlockType::new(format!("ext{}", i)))
                .unwrap();
        }
        assert_eq!(
            reg.register(Slot::Auto, BlockType::new("one-too-many")),
            Err(RegistryError::RegistryExhausted)
        );
        // The built-in space is still available explicitly.
        assert!(reg.register(Slot::Explicit(BlockId(3)), BlockType::new("b3")).is_ok());
    }

    #[test]
    fn explicit_registration_checks_range_and_occupancy() {
        let mut reg = BlockTypeRegistry::new();
        reg.register(Slot::Explicit(BlockId(1)), BlockType::new("stone")).unwrap();
        assert_eq!(
            reg.register(Slot::Explicit(BlockId(1)), BlockType::new("other")),
            Err(RegistryError::IdOccupied(BlockId(1)))
        );
        assert_eq!(
            reg.register(Slot::Explicit(BlockId(4096)), BlockType::new("far")),
            Err(RegistryError::IdOutOfRange(BlockId(4096)))
        );
        assert_eq!(
            reg.register(Slot::Explicit(BlockId(2)), BlockType::new("stone")),
            Err(RegistryError::DuplicateName("stone".into()))
        );
    }

    #[test]
    fn unknown_ids_convert_to_themselves_and_are_solid() {
        let reg = BlockTypeRegistry::new();
        let block = Block::new(BlockId(77), 5);
        assert_eq!(reg.dispatch_convert(block), BlockId(77));
        assert!(!reg.is_passable(BlockId(77)));
        assert!(!reg.can_place(BlockId(77), Rank::ADMIN));
        assert!(!reg.passability().is_passable(BlockId(77)));
    }

    #[test]
    fn rank_floor_gates_placement() {
        let mut reg = BlockTypeRegistry::new();
        let id = reg
            .register(Slot::Auto, BlockType::new("crete").min_rank(Rank::OPERATOR))
            .unwrap();
        assert!(!reg.can_place(id, Rank::BUILDER));
        assert!(reg.can_place(id, Rank::OPERATOR));
    }
}
