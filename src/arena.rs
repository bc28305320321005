//! Index-packed free-list arena over groups of 8 octree child nodes.
//!
//! Every internal node's children are allocated together as one group, since
//! the octree always subdivides a leaf into exactly 8 octants at once. A
//! node's `first_child` is the index of its group in this arena.

/// One arena slot: either a live group of 8 nodes, or a link to the next
/// free slot (`-1` if this is the last free slot).
#[derive(Clone)]
enum Slot<T> {
    Occupied([T; 8]),
    Free(i32),
}

/// Free-list over `[T; 8]` groups, indexed by `i32`. Allocation and
/// deallocation are O(1). Indices are plain integers rather than pointers
/// into the backing `Vec`, so nothing is invalidated if that `Vec`
/// reallocates: [`reserve`] sizes it up front to the common-case bound from
/// [`reserve_capacity`] so a typical tick never reallocates, but an
/// under-estimate (e.g. a run of degenerate, colocated inserts) just falls
/// through to `Vec::push`'s own growth instead of failing the tick.
#[derive(Clone)]
pub struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    first_free: i32,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            first_free: -1,
        }
    }
}

impl<T> NodeArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Drops every group and resets the free list. O(1): this just truncates
    /// the backing `Vec`, which keeps its allocation for the next tick's
    /// `reserve`.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.first_free = -1;
    }

    /// Inserts a new group of 8 nodes and returns its stable index, growing
    /// the backing `Vec` (via `Vec::push`) past its reserved capacity if
    /// needed. Only returns `None` if the arena has grown to `i32::MAX`
    /// groups, which [`crate::SimError::ArenaOverflow`] treats as a genuine
    /// bug rather than a capacity-estimate miss.
    pub fn insert(&mut self, group: [T; 8]) -> Option<i32> {
        if self.first_free != -1 {
            let index = self.first_free;
            match std::mem::replace(&mut self.slots[index as usize], Slot::Occupied(group)) {
                Slot::Free(next) => self.first_free = next,
                Slot::Occupied(_) => unreachable!("free list pointed at an occupied slot"),
            }
            Some(index)
        } else {
            if self.slots.len() >= i32::MAX as usize {
                return None;
            }
            self.slots.push(Slot::Occupied(group));
            Some((self.slots.len() - 1) as i32)
        }
    }

    pub fn get(&self, index: i32) -> &[T; 8] {
        match &self.slots[index as usize] {
            Slot::Occupied(group) => group,
            Slot::Free(_) => panic!("arena index {index} refers to a freed slot"),
        }
    }

    pub fn get_mut(&mut self, index: i32) -> &mut [T; 8] {
        match &mut self.slots[index as usize] {
            Slot::Occupied(group) => group,
            Slot::Free(_) => panic!("arena index {index} refers to a freed slot"),
        }
    }
}

/// Upper bound on node groups needed to hold `n` bodies:
/// `(8^(h+1) - 1) / 7 - 1` where `h = ceil(log8(n))`, the finite geometric
/// series for a full 8-ary tree of that height, minus the root (which is not
/// itself stored in the arena).
pub fn reserve_capacity(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let h = (n as f64).log(8.0).ceil() as u32;
    let max_nodes = ((8u64.pow(h + 1) - 1) / 7) as usize;
    max_nodes.saturating_sub(1)
}
