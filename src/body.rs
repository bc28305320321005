//! Point-mass kinematic record and its rendering-only material tag.

use std::f64::consts::PI;

use lin_alg::f64::Vec3;

/// Floor applied to a body's mass at construction. A mass of exactly `0.0`
/// is reserved as the tombstone sentinel written by [`crate::BodyStore::merge`]
/// and read by [`crate::BodyStore::remove_dead`]; `mass_min` must stay above
/// zero for that sentinel to remain unambiguous.
pub const MASS_MIN_DEFAULT: f64 = 1.0;

/// Opaque rendering tag. The physics core never branches on this value; it
/// exists purely so bodies round-trip through [`crate::io`] with the field a
/// renderer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Material {
    Ceres = 0,
    Earth = 1,
    Eris = 2,
    Haumea = 3,
    Jupiter = 4,
    Makemake = 5,
    Mars = 6,
    Mercury = 7,
    Moon = 8,
    Neptune = 9,
    Saturn = 10,
    Sun = 11,
    Uranus = 12,
    Venus = 13,
}

/// Number of defined [`Material`] variants.
pub const MATERIAL_COUNT: i32 = 14;

impl Material {
    /// All variants in index order, matching the glossary's enumeration.
    pub const ALL: [Material; MATERIAL_COUNT as usize] = [
        Material::Ceres,
        Material::Earth,
        Material::Eris,
        Material::Haumea,
        Material::Jupiter,
        Material::Makemake,
        Material::Mars,
        Material::Mercury,
        Material::Moon,
        Material::Neptune,
        Material::Saturn,
        Material::Sun,
        Material::Uranus,
        Material::Venus,
    ];

    /// Decodes a wire-format material integer. Out-of-range values fall back
    /// to `Ceres` (index `0`) rather than failing the whole body record,
    /// since this tag is rendering-only and never affects physics.
    pub fn from_index(index: i32) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(Material::Ceres)
    }

    pub fn to_index(self) -> i32 {
        self as i32
    }
}

/// Point-mass kinematic record: position, velocity, mass, and the radius
/// derived from mass.
///
/// `radius` is recomputed whenever mass changes; nothing outside this module
/// and [`crate::BodyStore::merge`] is allowed to set mass directly for that
/// reason.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    mass: f64,
    radius: f64,
    pub material: Material,
}

impl Body {
    /// Constructs a body, flooring `mass` at `mass_min` and deriving `radius`
    /// from the floored mass.
    pub fn new(position: Vec3, velocity: Vec3, mass: f64, material: Material) -> Self {
        Self::with_mass_min(position, velocity, mass, material, MASS_MIN_DEFAULT)
    }

    pub fn with_mass_min(
        position: Vec3,
        velocity: Vec3,
        mass: f64,
        material: Material,
        mass_min: f64,
    ) -> Self {
        let mass = mass.max(mass_min);
        Self {
            position,
            velocity,
            mass,
            radius: radius_from_mass(mass),
            material,
        }
    }

    /// Constructs a tombstone: a dead body with `mass == 0.0`, as written by
    /// [`crate::BodyStore::merge`]. Bypasses the mass floor, since the floor
    /// exists precisely to keep `0.0` unambiguous as "dead".
    pub(crate) fn tombstone() -> Self {
        Self {
            position: Vec3::new_zero(),
            velocity: Vec3::new_zero(),
            mass: 0.0,
            radius: 0.0,
            material: Material::Ceres,
        }
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn is_dead(&self) -> bool {
        self.mass == 0.0
    }

    /// Semi-implicit Euler velocity update: `velocity += dt * dv`.
    pub fn accelerate(&mut self, dv: Vec3, dt: f64) {
        self.velocity += dv * dt;
    }

    /// Semi-implicit Euler position update: `position += dt * velocity`.
    pub fn translate(&mut self, dt: f64) {
        self.position += self.velocity * dt;
    }

    pub fn collides_with(&self, other: &Body) -> bool {
        (self.position - other.position).magnitude() <= self.radius + other.radius
    }
}

/// `radius = cbrt(3 * mass / (4 * pi))` — a uniform-density sphere of the
/// given mass, with a density constant of 1.
pub fn radius_from_mass(mass: f64) -> f64 {
    (3.0 * mass / (4.0 * PI)).cbrt()
}
