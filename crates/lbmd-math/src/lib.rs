//! Math primitives for the lbmd particle/fluid engine.
//!
//! Provides the 3-vector aliases used throughout the workspace and the
//! orthorhombic periodic box that every distance calculation goes through.

pub mod boundary;

pub use boundary::OrthorhombicBox;

use nalgebra as na;

/// 3D vector alias.
pub type Vec3 = na::Vector3<f64>;
/// 3x3 matrix alias (stress tensors, virial tensors).
pub type Mat3 = na::Matrix3<f64>;

/// Integer 3-tuple used for process grids, cell grids and lattice sizes.
pub type Int3 = [usize; 3];

/// Product of the three components of an [`Int3`].
#[inline]
pub fn volume(n: Int3) -> usize {
    n[0] * n[1] * n[2]
}

/// True if every component of `v` is finite.
#[inline]
pub fn is_finite(v: &Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume() {
        assert_eq!(volume([2, 3, 4]), 24);
        assert_eq!(volume([1, 1, 1]), 1);
    }

    #[test]
    fn test_is_finite() {
        assert!(is_finite(&Vec3::new(1.0, -2.0, 0.0)));
        assert!(!is_finite(&Vec3::new(f64::NAN, 0.0, 0.0)));
        assert!(!is_finite(&Vec3::new(0.0, f64::INFINITY, 0.0)));
    }
}
