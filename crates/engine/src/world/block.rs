/// Blocktype identifier. The engine stores these without interpreting them;
/// meaning is assigned by whatever is registered under the id in the
/// `BlockTypeRegistry`.
///
/// The only semantic the engine enforces is that `BlockId::AIR` (0) is the
/// "empty" block: air is never owned, and out-of-grid lookups report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockId(pub u16);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    /// Size of the id space. Ids must be strictly below this.
    pub const LIMIT: u16 = 4096;

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Player id owning a block. `OwnerId::NONE` (0) means unowned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OwnerId(pub u32);

impl OwnerId {
    pub const NONE: OwnerId = OwnerId(0);
    /// Owner used by physics callbacks and other server-internal writers.
    pub const SYSTEM: OwnerId = OwnerId(u32::MAX);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

// Bit layout of the packed record, low to high:
//   0..12   type id
//   12      fixed
//   13      physics
//   14      touched
//   16..32  data
//   32..64  owner
const KIND_MASK: u64 = 0x0FFF;
const FIXED_BIT: u64 = 1 << 12;
const PHYSICS_BIT: u64 = 1 << 13;
const TOUCHED_BIT: u64 = 1 << 14;
const DATA_SHIFT: u32 = 16;
const OWNER_SHIFT: u32 = 32;

/// One voxel, packed into a single `u64`.
///
/// The `data` payload is opaque to the engine; its meaning is private to the
/// callbacks of the blocktype stored in `kind`. The `physics` bit caches whether
/// that blocktype had a physics callback when the block was written, and is what
/// `PhysicsSet` membership follows.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Block(u64);

impl Block {
    pub const AIR: Block = Block(0);

    pub const fn new(kind: BlockId, data: u16) -> Self {
        Self((kind.0 as u64 & KIND_MASK) | ((data as u64) << DATA_SHIFT))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn kind(self) -> BlockId {
        BlockId((self.0 & KIND_MASK) as u16)
    }

    #[inline]
    pub const fn data(self) -> u16 {
        (self.0 >> DATA_SHIFT) as u16
    }

    #[inline]
    pub const fn owner(self) -> OwnerId {
        OwnerId((self.0 >> OWNER_SHIFT) as u32)
    }

    #[inline]
    pub const fn is_fixed(self) -> bool {
        self.0 & FIXED_BIT != 0
    }

    #[inline]
    pub const fn has_physics(self) -> bool {
        self.0 & PHYSICS_BIT != 0
    }

    #[inline]
    pub const fn is_touched(self) -> bool {
        self.0 & TOUCHED_BIT != 0
    }

    pub const fn with_kind(self, kind: BlockId) -> Self {
        Self((self.0 & !KIND_MASK) | (kind.0 as u64 & KIND_MASK))
    }

    pub const fn with_data(self, data: u16) -> Self {
        Self((self.0 & !(0xFFFF << DATA_SHIFT)) | ((data as u64) << DATA_SHIFT))
    }

    pub const fn with_owner(self, owner: OwnerId) -> Self {
        Self((self.0 & !(0xFFFF_FFFF << OWNER_SHIFT)) | ((owner.0 as u64) << OWNER_SHIFT))
    }

    pub const fn with_fixed(self, fixed: bool) -> Self {
        Self::set_bit(self, FIXED_BIT, fixed)
    }

    pub const fn with_physics(self, physics: bool) -> Self {
        Self::set_bit(self, PHYSICS_BIT, physics)
    }

    pub const fn with_touched(self, touched: bool) -> Self {
        Self::set_bit(self, TOUCHED_BIT, touched)
    }

    const fn set_bit(self, bit: u64, on: bool) -> Self {
        if on { Self(self.0 | bit) } else { Self(self.0 & !bit) }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("kind", &self.kind().0)
            .field("data", &self.data())
            .field("owner", &self.owner().0)
            .field("fixed", &self.is_fixed())
            .field("physics", &self.has_physics())
            .field("touched", &self.is_touched())
            .finish()
    }
}
