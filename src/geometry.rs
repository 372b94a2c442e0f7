//! Representation of axis-aligned boxes.

use nalgebra::{self as na, Point3, Vector3, point};

/// A box with orientation aligned with the coordinate system axes. The width,
/// height and depth axes are aligned with the x-, y- and z-axis respectively.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisAlignedBox {
    corners: [Point3<f32>; 2],
}

impl AxisAlignedBox {
    /// Creates a new box with the given lower and upper corner points.
    pub fn new(lower_corner: Point3<f32>, upper_corner: Point3<f32>) -> Self {
        debug_assert!(
            lower_corner.coords.iter().zip(upper_corner.coords.iter()).all(|(l, u)| l <= u),
            "Lower corner {lower_corner} exceeds upper corner {upper_corner}"
        );
        Self {
            corners: [lower_corner, upper_corner],
        }
    }

    /// Creates a cube with the same lower and upper coordinate along every
    /// axis.
    pub fn cube(lower: f32, upper: f32) -> Self {
        Self::new(point![lower, lower, lower], point![upper, upper, upper])
    }

    /// Returns a reference to the lower corner of the box.
    pub fn lower_corner(&self) -> &Point3<f32> {
        &self.corners[0]
    }

    /// Returns a reference to the upper corner of the box.
    pub fn upper_corner(&self) -> &Point3<f32> {
        &self.corners[1]
    }

    /// Calculates and returns the center point of the box.
    pub fn center(&self) -> Point3<f32> {
        na::center(self.lower_corner(), self.upper_corner())
    }

    /// Returns the extents of the box along the x-, y- and z-axis.
    pub fn extents(&self) -> Vector3<f32> {
        self.upper_corner() - self.lower_corner()
    }

    /// Returns a new box where each face has been pushed outwards by the given
    /// margin (or inwards if the margin is negative).
    pub fn expanded(&self, margin: f32) -> Self {
        let margin = Vector3::repeat(margin);
        Self::new(self.lower_corner() - margin, self.upper_corner() + margin)
    }

    /// Returns a new box translated by the given displacement.
    pub fn translated(&self, displacement: &Vector3<f32>) -> Self {
        Self::new(
            self.lower_corner() + displacement,
            self.upper_corner() + displacement,
        )
    }

    /// Whether the given point is strictly inside the box. Points on the
    /// boundary are considered outside.
    pub fn strictly_contains_point(&self, point: &Point3<f32>) -> bool {
        (0..3).all(|dim| {
            self.lower_corner()[dim] < point[dim] && point[dim] < self.upper_corner()[dim]
        })
    }

    /// Whether the given point is inside the box or on its boundary.
    pub fn contains_point(&self, point: &Point3<f32>) -> bool {
        (0..3).all(|dim| {
            self.lower_corner()[dim] <= point[dim] && point[dim] <= self.upper_corner()[dim]
        })
    }
}
