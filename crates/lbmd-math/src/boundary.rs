//! Orthorhombic periodic boundary conditions.

use crate::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Rectangular simulation box `[0, L)` with periodic images in all three directions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrthorhombicBox {
    /// Box edge lengths.
    pub size: Vec3,
}

impl OrthorhombicBox {
    /// Create a box with the given edge lengths.
    pub fn new(size: Vec3) -> Self {
        Self { size }
    }

    /// Cubic box of edge `l`.
    pub fn cubic(l: f64) -> Self {
        Self::new(Vec3::new(l, l, l))
    }

    /// Box volume.
    pub fn volume(&self) -> f64 {
        self.size.x * self.size.y * self.size.z
    }

    /// Apply minimum image convention to a separation vector.
    pub fn minimum_image(&self, mut dr: Vec3) -> Vec3 {
        for d in 0..3 {
            let l = self.size[d];
            dr[d] -= l * (dr[d] / l).round();
        }
        dr
    }

    /// Minimum-image vector pointing from `from` to `to`.
    pub fn separation(&self, from: &Vec3, to: &Vec3) -> Vec3 {
        self.minimum_image(to - from)
    }

    /// Fold a position back into the primary box `[0, L)`.
    pub fn fold(&self, mut x: Vec3) -> Vec3 {
        for d in 0..3 {
            let l = self.size[d];
            x[d] = x[d].rem_euclid(l);
            // rem_euclid can round up to exactly l for tiny negative inputs
            if x[d] >= l {
                x[d] = 0.0;
            }
        }
        x
    }

    /// Uniformly distributed position inside the box.
    pub fn random_position<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        Vec3::new(
            rng.r#gen::<f64>() * self.size.x,
            rng.r#gen::<f64>() * self.size.y,
            rng.r#gen::<f64>() * self.size.z,
        )
    }
}
