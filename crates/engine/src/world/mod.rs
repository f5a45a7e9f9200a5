pub mod block;
pub mod grid;
pub mod position;

pub use block::{Block, BlockId, OwnerId};
pub use grid::{GridError, VoxelGrid};
pub use position::{BlockPos, Dimensions};
