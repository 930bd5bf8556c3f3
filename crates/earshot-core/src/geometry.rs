//! World positions and the distance metric used to compare them.
//!
//! Block-game worlds put the vertical axis in `y`, so the planar metric
//! measures across `x` and `z` only.

use crate::error::{Error, Result};
use std::str::FromStr;

/// A reported position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub x: f64,
    /// Vertical axis
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Origin of the world.
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Which coordinates take part in the distance computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Horizontal plane only (x, z). Height differences are ignored.
    #[default]
    Planar,
    /// Full three-dimensional distance (x, y, z).
    Spatial,
}

impl DistanceMetric {
    /// Euclidean distance between two positions under this metric.
    pub fn distance(&self, a: &Position, b: &Position) -> f64 {
        let dx = a.x - b.x;
        let dz = a.z - b.z;
        match self {
            Self::Planar => dx.hypot(dz),
            Self::Spatial => {
                let dy = a.y - b.y;
                (dx * dx + dy * dy + dz * dz).sqrt()
            }
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planar" | "2d" => Ok(Self::Planar),
            "spatial" | "3d" => Ok(Self::Spatial),
            other => Err(Error::UnknownOption {
                option: "distance metric",
                value: other.to_string(),
            }),
        }
    }
}
