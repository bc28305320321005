//! Error types surfaced by the physics core.
//!
//! Most failure modes in this crate are non-fatal by policy (a dropped body, a
//! collocated pair) and never reach this type.

use lin_alg::f64::Vec3;
use thiserror::Error;

/// Fatal errors from a single tick. Returned by [`crate::Engine::update`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// A body's position fell outside the octree's root bounding box at
    /// insertion time. The tree is rebuilt with freshly-snapped bounds every
    /// tick, so this indicates a caller moved a body further than the
    /// world-bounds snap could have accounted for (e.g. a body added with a
    /// wildly out-of-range position between ticks).
    #[error("body at {position:?} falls outside the octree root box (center {box_center:?}, radius {box_radius})")]
    BoundsViolated {
        position: Vec3,
        box_center: Vec3,
        box_radius: f64,
    },

    /// The octree arena grew to `i32::MAX` node groups during insertion.
    /// Ordinary ticks never come close: [`crate::arena::reserve_capacity`]
    /// sizes the arena's initial reservation for the common case and the
    /// arena itself grows past that estimate on demand (e.g. a run of
    /// colocated bodies forcing many degenerate splits), so hitting this
    /// means the arena's index type, not a capacity estimate, ran out.
    #[error("octree arena exhausted its i32 index space at {reserved} node groups")]
    ArenaOverflow { reserved: usize },

    /// A worker thread panicked while holding the tick-scoped error slot's
    /// lock. This can only happen if a worker task itself panics (a bug),
    /// not from any expected tick outcome; surfaced rather than silently
    /// treated as "no error" so a worker panic is never mistaken for a clean
    /// tick.
    #[error("a worker thread panicked during force/collision dispatch")]
    Poisoned,
}
