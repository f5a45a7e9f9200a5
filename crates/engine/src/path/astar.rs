use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use slotmap::{SlotMap, new_key_type};
use thiserror::Error;

use crate::registry::Passability;
use crate::world::{BlockPos, VoxelGrid};

new_key_type! {
    /// Handle for a node in one search's arena.
    struct NodeId;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchFailed {
    #[error("no path after expanding {expanded} nodes")]
    NoPath { expanded: usize },
    #[error("gave up after expanding {limit} nodes")]
    ExpansionLimit { limit: usize },
    #[error("{0} is outside the level")]
    OutOfGrid(BlockPos),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimits {
    /// Expand at most this many nodes; the next non-goal pop fails with
    /// `SearchFailed::ExpansionLimit`.
    pub max_expanded: Option<usize>,
}

/// A found path plus what it took to find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Standing points from start to goal, both included.
    pub path: Vec<BlockPos>,
    pub expanded: usize,
    /// `f` of every node taken off the open set, in order.
    pub popped_f: Vec<u32>,
}

/// Horizontal step directions: orthogonal first, then diagonal.
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

struct PathNode {
    pos: BlockPos,
    g: u32,
    h: u32,
    parent: Option<NodeId>,
}

impl PathNode {
    fn f(&self) -> u32 {
        self.g + self.h
    }
}

/// Open-set entry. Ordered so the heap pops the lowest `f` first and, among
/// equal `f`, the entry pushed first.
#[derive(PartialEq, Eq)]
struct OpenEntry {
    f: u32,
    seq: u64,
    node: NodeId,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.cmp(&self.f).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Walkability of a grid as seen by a standing entity two blocks tall.
///
/// Outside the grid horizontally nothing is passable, below it is solid floor
/// and above it is open air.
struct Terrain<'a> {
    grid: &'a VoxelGrid,
    passability: &'a Passability,
}

impl Terrain<'_> {
    fn passable(&self, pos: BlockPos) -> bool {
        let dims = self.grid.dims();
        if pos.x < 0 || pos.z < 0 || pos.x >= dims.width as i32 || pos.z >= dims.depth as i32 {
            return false;
        }
        if pos.y < 0 {
            return false;
        }
        match self.grid.get_at(pos) {
            Some(block) => self.passability.is_passable(block.kind()),
            None => true,
        }
    }

    /// Where a step of (dx, dz) from `from` lands, if anywhere.
    ///
    /// The step needs a passable head cell. If the foot cell is passable too,
    /// the entity drops until it has solid footing (no drop at all is a plain
    /// walk). If the foot cell is solid, the step becomes a one-block jump when
    /// there are two free cells above it.
    fn step(&self, from: BlockPos, dx: i32, dz: i32) -> Option<BlockPos> {
        let head = from.offset(dx, 1, dz);
        if !self.passable(head) {
            return None;
        }
        let foot = head.below();
        let landing = if self.passable(foot) {
            let mut at = foot;
            while self.passable(at.below()) {
                at = at.below();
            }
            at
        } else if self.passable(head.above()) {
            head
        } else {
            return None;
        };
        self.grid.contains(landing).then_some(landing)
    }

    fn successors(&self, from: BlockPos) -> Vec<BlockPos> {
        DIRECTIONS
            .iter()
            .filter_map(|&(dx, dz)| {
                if dx != 0 && dz != 0 {
                    // No corner cutting.
                    self.step(from, dx, 0)?;
                    self.step(from, 0, dz)?;
                }
                self.step(from, dx, dz)
            })
            .collect()
    }
}

/// A* from `start` to `goal` over `grid`.
///
/// Both `g` and `h` are Manhattan distances: each step adds |dx|+|dy|+|dz| to
/// `g`, and `h` is the Manhattan distance to the goal. A candidate for a point
/// already on the open set replaces it only with a strictly lower `g`.
///
/// The grid must not change during the search; callers hold the level's in-use
/// guard.
pub fn search(
    grid: &VoxelGrid,
    passability: &Passability,
    start: BlockPos,
    goal: BlockPos,
    limits: SearchLimits,
) -> Result<SearchReport, SearchFailed> {
    let start_index = grid.index_of(start).ok_or(SearchFailed::OutOfGrid(start))?;
    grid.index_of(goal).ok_or(SearchFailed::OutOfGrid(goal))?;

    let terrain = Terrain { grid, passability };
    let mut arena: SlotMap<NodeId, PathNode> = SlotMap::with_key();
    let mut open: BinaryHeap<OpenEntry> = BinaryHeap::new();
    let mut open_best: HashMap<usize, NodeId> = HashMap::new();
    let mut closed: HashSet<usize> = HashSet::new();
    let mut seq = 0u64;
    let mut expanded = 0usize;
    let mut popped_f = Vec::new();

    let root = arena.insert(PathNode {
        pos: start,
        g: 0,
        h: start.manhattan(&goal),
        parent: None,
    });
    open_best.insert(start_index, root);
    open.push(OpenEntry {
        f: arena[root].f(),
        seq,
        node: root,
    });

    while let Some(entry) = open.pop() {
        let Some(node) = arena.get(entry.node) else {
            continue; // replaced by a cheaper candidate
        };
        let (pos, g) = (node.pos, node.g);
        let Some(index) = grid.index_of(pos) else {
            continue;
        };
        if open_best.get(&index) != Some(&entry.node) {
            continue;
        }
        open_best.remove(&index);
        popped_f.push(entry.f);

        if pos == goal {
            return Ok(SearchReport {
                path: reconstruct(&arena, entry.node),
                expanded,
                popped_f,
            });
        }

        if let Some(limit) = limits.max_expanded {
            if expanded >= limit {
                return Err(SearchFailed::ExpansionLimit { limit });
            }
        }
        closed.insert(index);
        expanded += 1;

        for next in terrain.successors(pos) {
            let Some(next_index) = grid.index_of(next) else {
                continue;
            };
            if closed.contains(&next_index) {
                continue;
            }
            let next_g = g + pos.manhattan(&next);
            if let Some(&existing) = open_best.get(&next_index) {
                if next_g >= arena[existing].g {
                    continue;
                }
                arena.remove(existing);
            }
            let id = arena.insert(PathNode {
                pos: next,
                g: next_g,
                h: next.manhattan(&goal),
                parent: Some(entry.node),
            });
            open_best.insert(next_index, id);
            seq += 1;
            open.push(OpenEntry {
                f: arena[id].f(),
                seq,
                node: id,
            });
        }
    }

    Err(SearchFailed::NoPath { expanded })
}

fn reconstruct(arena: &SlotMap<NodeId, PathNode>, end: NodeId) -> Vec<BlockPos> {
    let mut path = Vec::new();
    let mut cursor = Some(end);
    while let Some(id) = cursor {
        let node = &arena[id];
        path.push(node.pos);
        cursor = node.parent;
    }
    path.reverse();
    path
}
