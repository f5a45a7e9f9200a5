use super::block::Block;
use super::position::{BlockPos, Dimensions};
use thiserror::Error;

/// Failures that abort level creation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("invalid level dimensions {0:?}")]
    InvalidDimensions(Dimensions),
    #[error("could not allocate {cells} cells for level grid")]
    Allocation { cells: usize },
    #[error("block array holds {actual} cells, dimensions need {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Dense 3D array of packed blocks for one level.
///
/// Stored flat in row-major order (x varies fastest, then z, then y), so a
/// vertical column is `width * depth` apart and horizontal rows are contiguous.
#[derive(Clone)]
pub struct VoxelGrid {
    dims: Dimensions,
    blocks: Box<[Block]>,
}

impl VoxelGrid {
    /// Allocate a grid filled with `fill`.
    ///
    /// Allocation is fallible: an absurd size reports `GridError::Allocation`
    /// instead of aborting the process.
    pub fn new_filled(dims: Dimensions, fill: Block) -> Result<Self, GridError> {
        let cells = dims.volume().ok_or(GridError::InvalidDimensions(dims))?;
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(cells)
            .map_err(|_| GridError::Allocation { cells })?;
        blocks.resize(cells, fill);
        Ok(Self {
            dims,
            blocks: blocks.into_boxed_slice(),
        })
    }

    pub fn new(dims: Dimensions) -> Result<Self, GridError> {
        Self::new_filled(dims, Block::AIR)
    }

    /// Wrap an existing block array (used by persistence on load).
    pub fn from_blocks(dims: Dimensions, blocks: Vec<Block>) -> Result<Self, GridError> {
        let expected = dims.volume().ok_or(GridError::InvalidDimensions(dims))?;
        if blocks.len() != expected {
            return Err(GridError::LengthMismatch {
                expected,
                actual: blocks.len(),
            });
        }
        Ok(Self {
            dims,
            blocks: blocks.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn index_of(&self, pos: BlockPos) -> Option<usize> {
        self.dims.index_of(pos)
    }

    #[inline]
    pub fn pos_of(&self, index: usize) -> Option<BlockPos> {
        self.dims.pos_of(index)
    }

    #[inline]
    pub fn contains(&self, pos: BlockPos) -> bool {
        self.dims.contains(pos)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<Block> {
        self.blocks.get(index).copied()
    }

    /// Read a block by position. Returns `None` outside the grid.
    #[inline]
    pub fn get_at(&self, pos: BlockPos) -> Option<Block> {
        self.index_of(pos).map(|i| self.blocks[i])
    }

    /// Raw write. Bypasses the update queue, the physics set and observers, so
    /// it is only meant for generation and loading, before the grid is wrapped
    /// in a `Level`.
    #[inline]
    pub fn set(&mut self, index: usize, block: Block) {
        self.blocks[index] = block;
    }

    pub fn set_at(&mut self, pos: BlockPos, block: Block) -> bool {
        match self.index_of(pos) {
            Some(i) => {
                self.blocks[i] = block;
                true
            }
            None => false,
        }
    }

    /// Fill every cell with `y` in `ys` (clamped to the grid).
    pub fn fill_layers(&mut self, ys: std::ops::Range<u16>, block: Block) {
        let layer = self.dims.width as usize * self.dims.depth as usize;
        let end = ys.end.min(self.dims.height) as usize;
        let start = (ys.start as usize).min(end);
        self.blocks[start * layer..end * layer].fill(block);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }
}
