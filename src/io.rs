//! Whitespace-delimited body records: `px py pz vx vy vz mass material`,
//! one per line. Read and write sides of the same format, so a round trip
//! is directly testable.

use std::io::{BufRead, Write};
use std::sync::Arc;

use lin_alg::f64::Vec3;
use thiserror::Error;

use crate::body::{Body, Material};

/// Wraps `std::io::Error` in an `Arc` so [`IoError`] can derive `Clone`
/// despite wrapping a non-`Clone` underlying error.
#[derive(Debug, Clone)]
pub struct StdIoError(pub Arc<std::io::Error>);

impl std::fmt::Display for StdIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for StdIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<std::io::Error> for StdIoError {
    fn from(value: std::io::Error) -> Self {
        Self(Arc::new(value))
    }
}

#[derive(Debug, Error, Clone)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] StdIoError),

    #[error("line {line}: {detail}")]
    Malformed { line: usize, detail: String },
}

impl From<std::io::Error> for IoError {
    fn from(value: std::io::Error) -> Self {
        IoError::Io(value.into())
    }
}

/// Writes one line per body: `px py pz vx vy vz mass material_int`.
pub fn save<W: Write>(bodies: &[Body], writer: &mut W) -> Result<(), IoError> {
    for body in bodies {
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {}",
            body.position.x,
            body.position.y,
            body.position.z,
            body.velocity.x,
            body.velocity.y,
            body.velocity.z,
            body.mass(),
            body.material.to_index(),
        )?;
    }
    Ok(())
}

/// Parses one body per non-blank line. `mass_min` is `0.0`, not the engine's
/// configured floor: a saved body's mass already reflects whatever floor was
/// in effect when it was written, and re-flooring here would only break an
/// otherwise exact round trip.
pub fn load<R: BufRead>(reader: R) -> Result<Vec<Body>, IoError> {
    let mut bodies = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() != 8 {
            return Err(IoError::Malformed {
                line: line_no + 1,
                detail: format!("expected 8 fields, found {}", tokens.len()),
            });
        }

        let field = |i: usize| -> Result<f64, IoError> {
            tokens[i].parse::<f64>().map_err(|e| IoError::Malformed {
                line: line_no + 1,
                detail: e.to_string(),
            })
        };

        let position = Vec3::new(field(0)?, field(1)?, field(2)?);
        let velocity = Vec3::new(field(3)?, field(4)?, field(5)?);
        let mass = field(6)?;
        let material_idx: i32 = tokens[7].parse().map_err(|e: std::num::ParseIntError| IoError::Malformed {
            line: line_no + 1,
            detail: e.to_string(),
        })?;

        bodies.push(Body::with_mass_min(
            position,
            velocity,
            mass,
            Material::from_index(material_idx),
            0.0,
        ));
    }

    Ok(bodies)
}
