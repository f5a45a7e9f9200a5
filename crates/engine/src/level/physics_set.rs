use indexmap::IndexSet;

/// Grid indices whose block currently carries the physics bit.
///
/// Iteration is positional so the physics pass can resume from a saved cursor.
/// Removal swaps the last member into the hole, which may make one member skip
/// or repeat a visit in the current sweep; the sweep is best-effort fairness,
/// not a guarantee.
#[derive(Debug, Default)]
pub struct PhysicsSet {
    members: IndexSet<usize>,
    cursor: usize,
    /// Insertions plus removals that actually changed membership.
    flips: u64,
}

impl PhysicsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from indices known to be physics-eligible (level construction).
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            members: indices.into_iter().collect(),
            cursor: 0,
            flips: 0,
        }
    }

    pub fn insert(&mut self, index: usize) -> bool {
        let added = self.members.insert(index);
        if added {
            self.flips += 1;
        }
        added
    }

    pub fn remove(&mut self, index: usize) -> bool {
        let removed = self.members.swap_remove(&index);
        if removed {
            self.flips += 1;
        }
        removed
    }

    pub fn contains(&self, index: usize) -> bool {
        self.members.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Take the next `budget` members starting at the cursor, wrapping around,
    /// and advance the cursor past them. Never yields a member twice in one
    /// call.
    pub fn next_slice(&mut self, budget: usize) -> Vec<usize> {
        let len = self.members.len();
        if len == 0 || budget == 0 {
            return Vec::new();
        }
        let take = budget.min(len);
        let start = self.cursor % len;
        let slice = (0..take)
            .filter_map(|i| self.members.get_index((start + i) % len).copied())
            .collect();
        self.cursor = (start + take) % len;
        slice
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_wrap_around() {
        let mut set = PhysicsSet::from_indices([10, 20, 30, 40, 50]);
        assert_eq!(set.next_slice(2), vec![10, 20]);
        assert_eq!(set.next_slice(2), vec![30, 40]);
        assert_eq!(set.next_slice(2), vec![50, 10]);
        assert_eq!(set.cursor(), 1);
    }

    #[test]
    fn budget_larger_than_set_visits_each_once() {
        let mut set = PhysicsSet::from_indices([1, 2, 3]);
        set.next_slice(1);
        assert_eq!(set.next_slice(100), vec![2, 3, 1]);
    }

    #[test]
    fn flips_count_only_real_changes() {
        let mut set = PhysicsSet::new();
        assert!(set.insert(4));
        assert!(!set.insert(4));
        assert!(set.remove(4));
        assert!(!set.remove(4));
        assert_eq!(set.flips(), 2);
    }

    #[test]
    fn empty_set_yields_nothing() {
        let mut set = PhysicsSet::new();
        assert!(set.next_slice(8).is_empty());
    }
}
