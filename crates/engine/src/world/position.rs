/// Block position in level coordinates.
///
/// Signed so that neighbor arithmetic at the grid edge produces a position
/// that is simply out of range rather than wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub const fn above(&self) -> Self {
        self.offset(0, 1, 0)
    }

    pub const fn below(&self) -> Self {
        self.offset(0, -1, 0)
    }

    /// The six cardinal neighbors.
    pub const fn neighbors(&self) -> [BlockPos; 6] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 1, 0),
            self.offset(0, -1, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }

    /// The four horizontal neighbors (+-X, +-Z).
    pub const fn horizontal_neighbors(&self) -> [BlockPos; 4] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }

    /// |dx| + |dy| + |dz|.
    pub const fn manhattan(&self, other: &BlockPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Extent of a level along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u16,
    pub height: u16,
    pub depth: u16,
}

impl Dimensions {
    pub const fn new(width: u16, height: u16, depth: u16) -> Self {
        Self { width, height, depth }
    }

    /// Number of cells, or `None` if any axis is zero.
    pub fn volume(&self) -> Option<usize> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return None;
        }
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.depth as usize)
    }

    #[inline]
    pub const fn contains(&self, pos: BlockPos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && pos.x < self.width as i32
            && pos.y < self.height as i32
            && pos.z < self.depth as i32
    }

    /// Row-major index: `(y * depth + z) * width + x`.
    #[inline]
    pub const fn index_of(&self, pos: BlockPos) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        let (w, d) = (self.width as usize, self.depth as usize);
        Some((pos.y as usize * d + pos.z as usize) * w + pos.x as usize)
    }

    /// Inverse of [`Dimensions::index_of`].
    #[inline]
    pub fn pos_of(&self, index: usize) -> Option<BlockPos> {
        if index >= self.volume()? {
            return None;
        }
        let (w, d) = (self.width as usize, self.depth as usize);
        let x = index % w;
        let z = (index / w) % d;
        let y = index / (w * d);
        Some(BlockPos::new(x as i32, y as i32, z as i32))
    }
}
