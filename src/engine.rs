//! Per-tick orchestration: tree rebuild, parallel force/collision dispatch,
//! integration, and collision resolution.

use std::panic::AssertUnwindSafe;

use parking_lot::Mutex;

use crate::body::Body;
use crate::config::EngineConfig;
use crate::error::SimError;
use crate::io::{self, IoError};
use crate::octree::Octree;
use crate::store::BodyStore;
use crate::worker_pool::{batch_range, WorkerPool};

/// Owns one simulation's bodies, tree, and worker pool, and drives `update`.
pub struct Engine {
    bodies: BodyStore,
    octree: Octree,
    config: EngineConfig,
    timescale: f64,
    pool: WorkerPool,
    /// Cleared at the start of every `update`; written by the first worker
    /// task (if any) that panics, read once after the tick's dispatches.
    error_slot: Mutex<Option<SimError>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::new_with(Vec::new(), config)
    }

    pub fn new_with(bodies: Vec<Body>, config: EngineConfig) -> Self {
        let mut store = BodyStore::new(config.max_bodies);
        for body in bodies {
            store.push(body);
        }
        Self {
            bodies: store,
            octree: Octree::new(),
            timescale: config.timescale,
            config,
            pool: WorkerPool::hardware(),
            error_slot: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Body> {
        self.bodies.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Body> {
        self.bodies.iter()
    }

    pub fn timescale(&self) -> f64 {
        self.timescale
    }

    pub fn increase_timescale(&mut self) {
        self.timescale += self.config.timestep;
    }

    pub fn decrease_timescale(&mut self) {
        self.timescale = (self.timescale - self.config.timestep).max(self.config.timestep);
    }

    /// Re-floors `body`'s mass against this engine's configured minimum, then
    /// forwards to the store, which silently drops it past `max_bodies`.
    pub fn add_body(&mut self, body: Body) {
        let body = Body::with_mass_min(
            body.position,
            body.velocity,
            body.mass(),
            body.material,
            self.config.mass_min,
        );
        self.bodies.push(body);
    }

    pub fn save<W: std::io::Write>(&self, writer: &mut W) -> Result<(), IoError> {
        io::save(self.bodies.as_slice(), writer)
    }

    pub fn load<R: std::io::BufRead>(&mut self, reader: R) -> Result<(), IoError> {
        for body in io::load(reader)? {
            self.add_body(body);
        }
        Ok(())
    }

    /// `B = max(1, workers/2)` force/collision batches.
    fn batch_count(&self) -> usize {
        (self.pool.num_workers() / 2).max(1)
    }

    /// Advances the simulation by `dt` real seconds.
    ///
    /// On a tree-build failure the prior tick's bodies are left untouched and
    /// the error is returned immediately. Otherwise: rebuild the tree, apply
    /// gravity and broad-phase collision detection in two barrier-separated
    /// parallel passes (kept separate so no task ever holds both a `&mut`
    /// and a `&` into the same `Body` at once — see `DESIGN.md`), integrate
    /// positions, then resolve collisions.
    pub fn update(&mut self, dt: f64) -> Result<(), SimError> {
        let timespan = self.timescale * dt;

        if let Err(err) = self.octree.build(self.bodies.as_slice()) {
            log::warn!("tick aborted, tree build failed: {err}");
            return Err(err);
        }

        let n = self.bodies.len();
        if n == 0 {
            return Ok(());
        }

        *self.error_slot.lock() = None;
        let batch_count = self.batch_count();

        self.dispatch_force(batch_count, timespan);

        if let Some(err) = self.error_slot.lock().clone() {
            return Err(err);
        }

        let collisions = self.dispatch_collide(batch_count);

        if let Some(err) = self.error_slot.lock().clone() {
            return Err(err);
        }

        for body in self.bodies.as_mut_slice() {
            body.translate(timespan);
        }

        for batch in collisions {
            for (target, source) in batch {
                self.bodies.merge(target, source);
            }
        }
        self.bodies.remove_dead();

        Ok(())
    }

    /// For each batch, in reverse index order: `velocity += G/d²-weighted
    /// force · timespan`. Batches get disjoint `&mut [Body]` slices, so no
    /// synchronization is needed beyond the pool's own barrier.
    fn dispatch_force(&mut self, batch_count: usize, timespan: f64) {
        let n = self.bodies.len();
        let g = self.config.g;
        let theta = self.config.theta;
        let octree = &self.octree;
        let error_slot = &self.error_slot;

        let mut remaining = self.bodies.as_mut_slice();
        let mut chunks = Vec::with_capacity(batch_count);
        for batch in 0..batch_count {
            let (start, end) = batch_range(n, batch_count, batch);
            let (chunk, rest) = remaining.split_at_mut(end - start);
            chunks.push(chunk);
            remaining = rest;
        }

        let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = chunks
            .into_iter()
            .map(|chunk| -> Box<dyn FnOnce() + Send + '_> {
                Box::new(move || {
                    run_guarded(error_slot, || {
                        for body in chunk.iter_mut().rev() {
                            let force = octree.calculate_force(body, g, theta);
                            body.accelerate(force, timespan);
                        }
                    });
                })
            })
            .collect();

        self.pool.dispatch(tasks);
    }

    /// For each batch, in forward index order: `idx =
    /// octree.detect_collision(bodies[i], i)`; if `idx != -1` the pair
    /// `(i, idx)` is appended to that batch's own collision buffer.
    fn dispatch_collide(&self, batch_count: usize) -> Vec<Vec<(usize, usize)>> {
        let n = self.bodies.len();
        let octree = &self.octree;
        let bodies = self.bodies.as_slice();
        let error_slot = &self.error_slot;

        let mut collisions: Vec<Vec<(usize, usize)>> = (0..batch_count).map(|_| Vec::new()).collect();
        let buffers: Vec<&mut Vec<(usize, usize)>> = collisions.iter_mut().collect();

        let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = buffers
            .into_iter()
            .enumerate()
            .map(|(batch, buffer)| -> Box<dyn FnOnce() + Send + '_> {
                let (start, end) = batch_range(n, batch_count, batch);
                Box::new(move || {
                    run_guarded(error_slot, || {
                        for i in start..end {
                            let idx = octree.detect_collision(&bodies[i], i as i32);
                            if idx != -1 {
                                buffer.push((i, idx as usize));
                            }
                        }
                    });
                })
            })
            .collect();

        self.pool.dispatch(tasks);
        collisions
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            bodies: self.bodies.clone(),
            octree: self.octree.clone(),
            config: self.config,
            timescale: self.timescale,
            pool: self.pool,
            error_slot: Mutex::new(self.error_slot.lock().clone()),
        }
    }
}

/// Runs `f`, catching a panic and recording [`SimError::Poisoned`] into
/// `error_slot` (first writer wins) instead of letting it unwind across the
/// pool boundary.
fn run_guarded(error_slot: &Mutex<Option<SimError>>, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        let mut slot = error_slot.lock();
        if slot.is_none() {
            *slot = Some(SimError::Poisoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Material;
    use lin_alg::f64::Vec3;

    fn orbit_pair() -> Vec<Body> {
        vec![
            Body::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::new(0.0, -0.5, 0.0), 1e6, Material::Earth),
            Body::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(0.0, 0.5, 0.0), 1e6, Material::Earth),
        ]
    }

    #[test]
    fn update_on_empty_engine_is_a_no_op() {
        let mut engine = Engine::new(EngineConfig::default());
        assert!(engine.update(0.1).is_ok());
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn zero_timescale_leaves_bodies_unchanged() {
        let mut config = EngineConfig::default();
        config.timescale = 0.0;
        let mut engine = Engine::new_with(orbit_pair(), config);
        let before: Vec<Body> = engine.iter().copied().collect();
        engine.update(1.0).unwrap();
        let after: Vec<Body> = engine.iter().copied().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn two_body_tick_conserves_total_mass() {
        let mut engine = Engine::new_with(orbit_pair(), EngineConfig::default());
        let total_before: f64 = engine.iter().map(|b| b.mass()).sum();
        engine.update(0.01).unwrap();
        let total_after: f64 = engine.iter().map(|b| b.mass()).sum();
        assert!((total_before - total_after).abs() < 1e-6);
    }

    #[test]
    fn head_on_collision_merges_into_one_body() {
        let bodies = vec![
            Body::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), 1e8, Material::Earth),
            Body::new(Vec3::new(0.01, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0), 1e8, Material::Earth),
        ];
        let mut engine = Engine::new_with(bodies, EngineConfig::default());
        engine.update(0.01).unwrap();
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn add_body_respects_capacity() {
        let mut config = EngineConfig::default();
        config.max_bodies = 1;
        let mut engine = Engine::new(config);
        engine.add_body(Body::new(Vec3::new_zero(), Vec3::new_zero(), 1.0, Material::Earth));
        engine.add_body(Body::new(Vec3::new_zero(), Vec3::new_zero(), 1.0, Material::Earth));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn timescale_controls_clamp_at_timestep() {
        let mut engine = Engine::new(EngineConfig::default());
        for _ in 0..20 {
            engine.decrease_timescale();
        }
        assert_eq!(engine.timescale(), engine_timestep(&engine));
    }

    fn engine_timestep(engine: &Engine) -> f64 {
        engine.config.timestep
    }

    #[test]
    fn save_then_load_restores_body_count() {
        let mut engine = Engine::new_with(orbit_pair(), EngineConfig::default());
        let mut buf = Vec::new();
        engine.save(&mut buf).unwrap();

        let mut fresh = Engine::new(EngineConfig::default());
        fresh.load(buf.as_slice()).unwrap();
        assert_eq!(fresh.len(), engine.len());
    }
}
