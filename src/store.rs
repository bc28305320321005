//! Bounded, contiguous body container with mass-preserving merge and
//! compacting removal.

use crate::body::Body;

/// Hard cap on the number of live bodies a [`BodyStore`] will hold, matching
/// the default in [`crate::EngineConfig`]. The store itself can be
/// constructed with a different cap via [`BodyStore::with_capacity`].
pub const MAX_BODIES: usize = 20_000;

/// Ordered sequence of bodies. Indices in `0..len()` are the identity the
/// octree's leaves reference; they are stable from the start of a tick until
/// [`BodyStore::remove_dead`] runs at the end of it.
#[derive(Debug, Clone)]
pub struct BodyStore {
    bodies: Vec<Body>,
    capacity: usize,
}

impl BodyStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bodies: Vec::with_capacity(capacity.min(MAX_BODIES)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn as_slice(&self) -> &[Body] {
        &self.bodies
    }

    pub fn as_mut_slice(&mut self) -> &mut [Body] {
        &mut self.bodies
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Body> {
        self.bodies.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Body> {
        self.bodies.get(index)
    }

    /// Appends `body` if under capacity; otherwise silently drops it. This
    /// is the engine-visible rate limit on input, per spec: a dropped body
    /// produces no error and no message.
    pub fn push(&mut self, body: Body) {
        if self.bodies.len() < self.capacity {
            self.bodies.push(body);
        }
    }

    /// Combines two bodies, preserving total mass and momentum. Writes the
    /// merged result at `target_idx` and marks `source_idx` a tombstone
    /// (`mass == 0.0`). Does not compact; call [`BodyStore::remove_dead`]
    /// once all of a tick's merges have been applied.
    ///
    /// `target_idx == source_idx` is a no-op: a body cannot collide with
    /// itself, so this only guards against a malformed collision tuple.
    pub fn merge(&mut self, target_idx: usize, source_idx: usize) {
        if target_idx == source_idx {
            return;
        }
        let target = self.bodies[target_idx];
        let source = self.bodies[source_idx];
        if target.is_dead() || source.is_dead() {
            // One side was already consumed by an earlier merge in this
            // tick's batch; later tuples referencing it are no-ops.
            return;
        }

        let total_mass = target.mass() + source.mass();
        let t = target.mass() / total_mass;
        let s = source.mass() / total_mass;

        let new_position = target.position * t + source.position * s;
        let new_velocity = target.velocity * t + source.velocity * s;
        let material = if t >= s {
            target.material
        } else {
            source.material
        };

        self.bodies[target_idx] =
            Body::with_mass_min(new_position, new_velocity, total_mass, material, 0.0);
        self.bodies[source_idx] = Body::tombstone();
    }

    /// Compacts in place using swap-with-last: trailing dead entries are
    /// popped first so the swap donor for any remaining dead slot is always
    /// alive. Invalidates every index past the first swap. Idempotent:
    /// calling this twice in a row with no merges in between is a no-op the
    /// second time, since the first call leaves no dead entries behind.
    pub fn remove_dead(&mut self) {
        while matches!(self.bodies.last(), Some(b) if b.is_dead()) {
            self.bodies.pop();
        }

        let mut i = 0;
        while i < self.bodies.len() {
            if self.bodies[i].is_dead() {
                self.bodies.swap_remove(i);
                while matches!(self.bodies.last(), Some(b) if b.is_dead()) {
                    self.bodies.pop();
                }
            } else {
                i += 1;
            }
        }
    }
}
