//! Utilities for working with voxel grids.

/// A 3D spatial dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    X = 0,
    Y = 1,
    Z = 2,
}

/// A side (e.g. a specific side of a cube along some dimension).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
}

impl Dimension {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Returns the index of the dimension (`0` for `X`, `1` for `Y` and `2` for
    /// `Z`).
    pub const fn idx(self) -> usize {
        self as usize
    }
}

/// Computes the linear index of the element at the given indices in a cubic
/// grid with `edge` elements along each axis, laid out so that the linear
/// index varies fastest with k, then j, then i.
#[inline]
pub const fn linear_index(edge: usize, i: usize, j: usize, k: usize) -> usize {
    i * edge * edge + j * edge + k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_compute_linear_index_with_k_varying_fastest() {
        assert_eq!(linear_index(4, 0, 0, 0), 0);
        assert_eq!(linear_index(4, 0, 0, 1), 1);
        assert_eq!(linear_index(4, 0, 1, 0), 4);
        assert_eq!(linear_index(4, 1, 0, 0), 16);
        assert_eq!(linear_index(4, 3, 3, 3), 63);
    }
}
