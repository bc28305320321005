//! Arena-backed Barnes-Hut octree: force accumulation and broad-phase
//! collision detection over a [`crate::BodyStore`], rebuilt fresh every tick.

use std::sync::atomic::{AtomicI32, Ordering};

use lin_alg::f64::Vec3;

use crate::arena::{reserve_capacity, NodeArena};
use crate::body::Body;
use crate::error::SimError;

/// Below this half-extent we stop subdividing and fold colocated bodies into
/// one leaf instead, per the degenerate-split handling in [`Octree::insert`].
const MIN_BOX_RADIUS: f64 = 1e-9;

/// Axis-aligned cube. `radius` is the half-extent, so the box spans
/// `center ± radius` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub center: Vec3,
    pub radius: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: Vec3) -> bool {
        (point.x - self.center.x).abs() <= self.radius
            && (point.y - self.center.y).abs() <= self.radius
            && (point.z - self.center.z).abs() <= self.radius
    }

    /// Morton octant index in `0..8`: bit 2 is `x >= cx`, bit 1 is `y >= cy`,
    /// bit 0 is `z >= cz`.
    pub fn octant_index(&self, point: Vec3) -> usize {
        let mut index = 0usize;
        if point.x >= self.center.x {
            index |= 0b100;
        }
        if point.y >= self.center.y {
            index |= 0b010;
        }
        if point.z >= self.center.z {
            index |= 0b001;
        }
        index
    }

    /// The child box for a given Morton index, half this box's radius.
    fn child_box(&self, index: usize) -> BoundingBox {
        let r2 = self.radius / 2.0;
        let dx = if index & 0b100 != 0 { r2 } else { -r2 };
        let dy = if index & 0b010 != 0 { r2 } else { -r2 };
        let dz = if index & 0b001 != 0 { r2 } else { -r2 };
        BoundingBox {
            center: self.center + Vec3::new(dx, dy, dz),
            radius: r2,
        }
    }

    fn child_boxes(&self) -> [BoundingBox; 8] {
        std::array::from_fn(|i| self.child_box(i))
    }
}

/// Aggregated mass data a node carries: a leaf's own body, or the
/// mass-weighted combination of everything below an internal node.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Element {
    centroid: Vec3,
    mass: f64,
    radius_bound: f64,
}

impl Element {
    fn empty() -> Self {
        Self {
            centroid: Vec3::new_zero(),
            mass: 0.0,
            radius_bound: 0.0,
        }
    }
}

/// One octree node. Root lives outside the arena; every other node is one
/// slot of an 8-group allocated by [`Octree::insert`] when a leaf splits.
#[derive(Debug)]
struct Node {
    bbox: BoundingBox,
    /// Index of this node's children's group in the arena, or `-1` for a leaf.
    first_child: i32,
    data: Element,
    /// `-1` for an empty leaf or any internal node; otherwise the
    /// [`crate::BodyStore`] index of the body this leaf holds. Mutated only
    /// by the atomic "consume" step in [`Octree::detect_collision`] during
    /// the parallel collision phase: force workers never read this field, so
    /// a single atomic word is enough to make the concurrent writes race-free.
    body_index: AtomicI32,
}

impl Node {
    fn new_leaf(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            first_child: -1,
            data: Element::empty(),
            body_index: AtomicI32::new(-1),
        }
    }
}

impl Clone for Node {
    /// `AtomicI32` isn't `Clone`; cloning copies its current value into a
    /// fresh atomic. Only ever used between ticks (e.g. [`Engine::clone`]),
    /// never while collision workers hold a reference to the original.
    fn clone(&self) -> Self {
        Self {
            bbox: self.bbox,
            first_child: self.first_child,
            data: self.data,
            body_index: AtomicI32::new(self.body_index.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum NodeLoc {
    Root,
    Child(i32, usize),
}

/// Rebuilt from scratch every tick by [`Octree::build`]. Holds no references
/// to the [`crate::BodyStore`] it was built from; it only stores each body's
/// store index, position, mass and radius as of build time.
#[derive(Debug, Clone)]
pub struct Octree {
    root: Node,
    arena: NodeArena<Node>,
    bounds: BoundingBox,
}

impl Default for Octree {
    fn default() -> Self {
        let bounds = BoundingBox {
            center: Vec3::new_zero(),
            radius: 1.0,
        };
        Self {
            root: Node::new_leaf(bounds),
            arena: NodeArena::new(),
            bounds,
        }
    }
}

impl Octree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Clears the tree, snaps world bounds from `bodies`, reserves arena
    /// capacity for `bodies.len()`, inserts every body, then back-propagates
    /// mass/centroid/radius_bound up from the leaves.
    pub fn build(&mut self, bodies: &[Body]) -> Result<(), SimError> {
        self.arena.clear();
        self.bounds = compute_bounds(bodies);
        self.root = Node::new_leaf(self.bounds);

        let target_capacity = reserve_capacity(bodies.len());
        if target_capacity > self.arena.capacity() {
            self.arena.reserve(target_capacity - self.arena.capacity());
        }

        for (idx, body) in bodies.iter().enumerate() {
            self.insert(NodeLoc::Root, idx, body.position, body.mass(), body.radius())?;
        }

        self.back_propagate(NodeLoc::Root);
        Ok(())
    }

    fn bbox(&self, loc: NodeLoc) -> BoundingBox {
        match loc {
            NodeLoc::Root => self.root.bbox,
            NodeLoc::Child(group, slot) => self.arena.get(group)[slot].bbox,
        }
    }

    fn first_child(&self, loc: NodeLoc) -> i32 {
        match loc {
            NodeLoc::Root => self.root.first_child,
            NodeLoc::Child(group, slot) => self.arena.get(group)[slot].first_child,
        }
    }

    fn data(&self, loc: NodeLoc) -> Element {
        match loc {
            NodeLoc::Root => self.root.data,
            NodeLoc::Child(group, slot) => self.arena.get(group)[slot].data,
        }
    }

    fn set_data(&mut self, loc: NodeLoc, data: Element) {
        match loc {
            NodeLoc::Root => self.root.data = data,
            NodeLoc::Child(group, slot) => self.arena.get_mut(group)[slot].data = data,
        }
    }

    fn set_first_child(&mut self, loc: NodeLoc, group: i32) {
        match loc {
            NodeLoc::Root => self.root.first_child = group,
            NodeLoc::Child(g, slot) => self.arena.get_mut(g)[slot].first_child = group,
        }
    }

    fn body_index_atomic(&self, loc: NodeLoc) -> &AtomicI32 {
        match loc {
            NodeLoc::Root => &self.root.body_index,
            NodeLoc::Child(group, slot) => &self.arena.get(group)[slot].body_index,
        }
    }

    fn insert(
        &mut self,
        loc: NodeLoc,
        body_idx: usize,
        position: Vec3,
        mass: f64,
        radius: f64,
    ) -> Result<(), SimError> {
        let bbox = self.bbox(loc);

        if matches!(loc, NodeLoc::Root) && !bbox.contains(position) {
            return Err(SimError::BoundsViolated {
                position,
                box_center: bbox.center,
                box_radius: bbox.radius,
            });
        }

        if self.first_child(loc) != -1 {
            let octant = bbox.octant_index(position);
            return self.insert(NodeLoc::Child(self.first_child(loc), octant), body_idx, position, mass, radius);
        }

        let occupant = self.body_index_atomic(loc).load(Ordering::Relaxed);
        if occupant == -1 {
            self.set_data(
                loc,
                Element {
                    centroid: position,
                    mass,
                    radius_bound: radius,
                },
            );
            self.body_index_atomic(loc).store(body_idx as i32, Ordering::Relaxed);
            return Ok(());
        }

        if bbox.radius < MIN_BOX_RADIUS {
            let existing = self.data(loc);
            let total_mass = existing.mass + mass;
            let t = existing.mass / total_mass;
            let s = mass / total_mass;
            let centroid = existing.centroid * t + position * s;
            let radius_bound = existing
                .radius_bound
                .max((centroid - position).magnitude() + radius)
                .max((centroid - existing.centroid).magnitude() + existing.radius_bound);
            self.set_data(
                loc,
                Element {
                    centroid,
                    mass: total_mass,
                    radius_bound,
                },
            );
            return Ok(());
        }

        let old_data = self.data(loc);
        let old_idx = occupant as usize;

        let child_boxes = bbox.child_boxes();
        let group = std::array::from_fn(|i| Node::new_leaf(child_boxes[i]));
        let group_idx = self
            .arena
            .insert(group)
            .ok_or(SimError::ArenaOverflow { reserved: self.arena.capacity() })?;

        self.set_first_child(loc, group_idx);
        self.body_index_atomic(loc).store(-1, Ordering::Relaxed);

        let old_octant = bbox.octant_index(old_data.centroid);
        self.insert(
            NodeLoc::Child(group_idx, old_octant),
            old_idx,
            old_data.centroid,
            old_data.mass,
            old_data.radius_bound,
        )?;

        let new_octant = bbox.octant_index(position);
        self.insert(NodeLoc::Child(group_idx, new_octant), body_idx, position, mass, radius)
    }

    fn back_propagate(&mut self, loc: NodeLoc) -> Element {
        let first_child = self.first_child(loc);
        if first_child == -1 {
            return self.data(loc);
        }

        let children: [Element; 8] = std::array::from_fn(|i| self.back_propagate(NodeLoc::Child(first_child, i)));

        let mut mass = 0.0;
        let mut centroid = Vec3::new_zero();
        for child in &children {
            if child.mass > 0.0 {
                mass += child.mass;
                centroid += child.centroid * child.mass;
            }
        }
        if mass > 0.0 {
            centroid /= mass;
        }

        let mut radius_bound = 0.0f64;
        for child in &children {
            if child.mass > 0.0 {
                let d = (centroid - child.centroid).magnitude();
                radius_bound = radius_bound.max(d + child.radius_bound);
            }
        }

        let result = Element { centroid, mass, radius_bound };
        self.set_data(loc, result);
        result
    }

    /// Barnes-Hut force query: `G·m/d² · direction`, approximated with the
    /// θ-criterion when a node is far enough relative to its size.
    pub fn calculate_force(&self, body: &Body, g: f64, theta: f64) -> Vec3 {
        self.calculate_force_at(NodeLoc::Root, body.position, g, theta)
    }

    fn calculate_force_at(&self, loc: NodeLoc, position: Vec3, g: f64, theta: f64) -> Vec3 {
        let data = self.data(loc);
        if data.mass <= 0.0 {
            return Vec3::new_zero();
        }

        let diff = data.centroid - position;
        let d = diff.magnitude();
        let first_child = self.first_child(loc);

        if first_child == -1 {
            if d == 0.0 {
                return Vec3::new_zero();
            }
            return diff * (g * data.mass / (d * d * d));
        }

        let s = 2.0 * self.bbox(loc).radius;
        if s / d < theta {
            return diff * (g * data.mass / (d * d * d));
        }

        let mut total = Vec3::new_zero();
        for i in 0..8 {
            total += self.calculate_force_at(NodeLoc::Child(first_child, i), position, g, theta);
        }
        total
    }

    /// Broad-phase collision query: returns the store index of the first
    /// other body overlapping `body`'s sphere, or `-1`. `body_index` is the
    /// querying body's own store index, used both to skip self-collision and
    /// to avoid reporting a pair from both sides.
    pub fn detect_collision(&self, body: &Body, body_index: i32) -> i32 {
        self.detect_collision_at(NodeLoc::Root, body, body_index)
    }

    fn detect_collision_at(&self, loc: NodeLoc, body: &Body, body_index: i32) -> i32 {
        let data = self.data(loc);
        if data.mass <= 0.0 {
            return -1;
        }

        let dist = (data.centroid - body.position).magnitude();
        if dist > body.radius() + data.radius_bound {
            return -1;
        }

        let first_child = self.first_child(loc);
        if first_child != -1 {
            for i in 0..8 {
                let result = self.detect_collision_at(NodeLoc::Child(first_child, i), body, body_index);
                if result != -1 {
                    return result;
                }
            }
            return -1;
        }

        let atomic = self.body_index_atomic(loc);
        let idx = atomic.load(Ordering::Acquire);
        if idx <= body_index {
            return -1;
        }
        match atomic.compare_exchange(idx, -1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => idx,
            Err(_) => -1,
        }
    }
}

/// `snap(x) = sign(x)·2^round(log2|x|)` for `|x| > 2`, else `sign(x)·round(|x|)`.
fn snap_coord(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let sign = x.signum();
    let ax = x.abs();
    if ax > 2.0 {
        sign * 2f64.powf(ax.log2().round())
    } else {
        sign * ax.round()
    }
}

/// Smallest power of two `>= x`, per the ceil-based variant of [`snap_coord`].
fn round_up_pow2(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    2f64.powf(x.log2().ceil())
}

/// Computes the octree root box from a body set: center snapped to the
/// nearest power-of-two coordinate, radius rounded up to the next power of
/// two that still covers every body after the center snap. Power-of-two
/// bounds make repeated halving exact in floating point, so a child box's
/// corners never drift off the grid the parent computed.
fn compute_bounds(bodies: &[Body]) -> BoundingBox {
    if bodies.is_empty() {
        return BoundingBox {
            center: Vec3::new_zero(),
            radius: 1.0,
        };
    }

    let mut min = bodies[0].position;
    let mut max = bodies[0].position;
    for body in &bodies[1..] {
        min.x = min.x.min(body.position.x);
        min.y = min.y.min(body.position.y);
        min.z = min.z.min(body.position.z);
        max.x = max.x.max(body.position.x);
        max.y = max.y.max(body.position.y);
        max.z = max.z.max(body.position.z);
    }

    let center = (min + max) * 0.5;
    let half = (max - min) * 0.5;

    let snapped = Vec3::new(snap_coord(center.x), snap_coord(center.y), snap_coord(center.z));
    let diff = snapped - center;

    let extent = (half.x + diff.x.abs())
        .max(half.y + diff.y.abs())
        .max(half.z + diff.z.abs());

    BoundingBox {
        center: snapped,
        radius: round_up_pow2(extent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Material;

    fn body_at(x: f64, y: f64, z: f64, mass: f64) -> Body {
        Body::new(Vec3::new(x, y, z), Vec3::new_zero(), mass, Material::Earth)
    }

    #[test]
    fn bounds_snap_to_power_of_two_symmetric_pair() {
        let bodies = [body_at(-3., 0., 0., 1.), body_at(3., 0., 0., 1.)];
        let bounds = compute_bounds(&bodies);
        assert!((bounds.center.x).abs() < 1e-12);
        assert!((bounds.radius - 4.0).abs() < 1e-12);
    }

    #[test]
    fn bounds_snap_contains_single_off_grid_body() {
        let bodies = [body_at(7., -3., 2., 1.)];
        let bounds = compute_bounds(&bodies);
        assert!((bounds.center.x - 8.0).abs() < 1e-12);
        assert!((bounds.center.y - -4.0).abs() < 1e-12);
        assert!((bounds.center.z - 2.0).abs() < 1e-12);
        assert!((bounds.radius - 1.0).abs() < 1e-12);
        assert!(bounds.contains(bodies[0].position));
    }

    #[test]
    fn build_on_empty_store_produces_empty_root() {
        let mut tree = Octree::new();
        tree.build(&[]).unwrap();
        assert_eq!(tree.data(NodeLoc::Root).mass, 0.0);
    }

    #[test]
    fn mass_is_conserved_through_back_propagation() {
        let bodies = [
            body_at(-3., -3., -3., 2.0),
            body_at(3., 3., 3., 5.0),
            body_at(3., -3., 3., 1.5),
        ];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();
        let total: f64 = bodies.iter().map(|b| b.mass()).sum();
        assert!((tree.data(NodeLoc::Root).mass - total).abs() < 1e-9);
    }

    #[test]
    fn self_force_is_zero() {
        let bodies = [body_at(1., 1., 1., 10.0)];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();
        let force = tree.calculate_force(&bodies[0], 1.0, 1.0);
        assert_eq!(force, Vec3::new_zero());
    }

    #[test]
    fn force_with_theta_zero_matches_direct_sum() {
        let bodies = [
            body_at(0., 0., 0., 10.0),
            body_at(5., 0., 0., 3.0),
            body_at(0., 5., 0., 7.0),
        ];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();

        for target in &bodies {
            let tree_force = tree.calculate_force(target, 1.0, 0.0);
            let mut direct = Vec3::new_zero();
            for other in &bodies {
                let diff = other.position - target.position;
                let d = diff.magnitude();
                if d > 0.0 {
                    direct += diff * (1.0 * other.mass() / (d * d * d));
                }
            }
            assert!((tree_force - direct).magnitude() < 1e-9);
        }
    }

    #[test]
    fn detect_collision_reports_overlapping_pair_once() {
        let bodies = [
            Body::new(Vec3::new(0., 0., 0.), Vec3::new_zero(), 1e6, Material::Earth),
            Body::new(Vec3::new(0.01, 0., 0.), Vec3::new_zero(), 1e6, Material::Earth),
        ];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();

        assert!(bodies[0].collides_with(&bodies[1]));
        let hit = tree.detect_collision(&bodies[0], 0);
        assert_eq!(hit, 1);
        // Consumed: a second query from body 0 no longer sees it.
        assert_eq!(tree.detect_collision(&bodies[0], 0), -1);
    }

    #[test]
    fn detect_collision_skips_self_and_earlier_indices() {
        let bodies = [
            Body::new(Vec3::new(0., 0., 0.), Vec3::new_zero(), 1e6, Material::Earth),
            Body::new(Vec3::new(0.01, 0., 0.), Vec3::new_zero(), 1e6, Material::Earth),
        ];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();

        // Querying from the higher-indexed body must not re-report the pair
        // the lower index already owns.
        assert_eq!(tree.detect_collision(&bodies[1], 1), -1);
    }

    #[test]
    fn bounds_violation_is_reported() {
        // `build` always snaps bounds to cover every body it's given, so the
        // only way to observe this error is to call `insert` directly against
        // stale bounds, bypassing that guarantee.
        let mut tree = Octree::new();
        tree.build(&[body_at(0., 0., 0., 1.)]).unwrap();
        let bounds = tree.bounds();
        let far_point = Vec3::new(bounds.center.x + bounds.radius * 100.0, 0., 0.);
        let err = tree.insert(NodeLoc::Root, 1, far_point, 1.0, 1.0);
        assert!(matches!(err, Err(SimError::BoundsViolated { .. })));
    }

    #[test]
    fn colocated_bodies_fold_into_one_leaf_without_infinite_recursion() {
        let bodies = [
            body_at(1., 1., 1., 3.0),
            body_at(1., 1., 1., 4.0),
            body_at(1., 1., 1., 5.0),
        ];
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();
        let total: f64 = bodies.iter().map(|b| b.mass()).sum();
        assert!((tree.data(NodeLoc::Root).mass - total).abs() < 1e-6);
    }
}
