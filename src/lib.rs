//! Parallel Barnes-Hut N-body physics core.
//!
//! `Engine` owns a bounded set of [`Body`] records and advances them one
//! tick at a time: rebuild an [`Octree`] from the current positions, apply
//! gravity and broad-phase collision detection over a [`WorkerPool`], then
//! integrate and resolve collisions.

mod arena;
mod body;
mod config;
mod engine;
mod error;
mod io;
mod octree;
mod store;
mod worker_pool;

pub use body::{radius_from_mass, Body, Material, MASS_MIN_DEFAULT, MATERIAL_COUNT};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::SimError;
pub use io::IoError;
pub use octree::{BoundingBox, Octree};
pub use store::{BodyStore, MAX_BODIES};
pub use worker_pool::{batch_range, WorkerPool};
