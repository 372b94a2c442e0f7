//! Determination of which face groups of a cube are visible.
//!
//! The same decision is made by both the counting pass and the writing pass
//! of a chunk build, so everything here is a pure function of the cube's
//! location and the voxel volume.

use crate::{
    template::{FaceGroup, FaceGroups},
    utils::Side,
    volume::VoxelVolume,
};

/// The placement of a single meshed cube within a chunk and within the voxel
/// volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CubeLocation {
    /// Index of the cube in the chunk's cube index space.
    pub local: [usize; 3],
    /// Indices of the lower corner voxel of the cube's block in the volume.
    pub voxel: [usize; 3],
    /// Number of raw voxels along each axis covered by the cube.
    pub factor: usize,
    /// The largest cube index along each axis of the chunk's index space.
    pub chunk_edge_index_max: usize,
}

/// Chunks with a largest cube index above this only cull against the true
/// boundaries of the volume, and test every other face against the adjacent
/// voxels even when they belong to a neighboring chunk.
pub const SEAM_CULLING_EDGE_INDEX_THRESHOLD: usize = 2;

impl CubeLocation {
    /// Whether the cube block itself contains any solid voxel.
    #[inline]
    pub fn is_occupied(&self, volume: &VoxelVolume) -> bool {
        let [i, j, k] = self.voxel;
        volume.block_occupancy(i, j, k, self.factor) != 0
    }

    /// Whether the face of the cube on the given side of the given dimension
    /// lies against the boundary, where nothing can cover it.
    #[inline]
    fn is_at_boundary(&self, dim: usize, side: Side, volume_edge: usize) -> bool {
        let culls_chunk_seams = self.chunk_edge_index_max <= SEAM_CULLING_EDGE_INDEX_THRESHOLD;
        match side {
            Side::Upper => {
                (culls_chunk_seams && self.local[dim] == self.chunk_edge_index_max)
                    || self.voxel[dim] + self.factor == volume_edge
            }
            Side::Lower => (culls_chunk_seams && self.local[dim] == 0) || self.voxel[dim] == 0,
        }
    }

    /// Returns the indices of the lower corner voxel of the adjacent cube
    /// block on the given side of the given dimension.
    #[inline]
    fn neighbor_voxel(&self, dim: usize, side: Side) -> [usize; 3] {
        let mut neighbor = self.voxel;
        match side {
            Side::Upper => neighbor[dim] += self.factor,
            Side::Lower => neighbor[dim] -= self.factor,
        }
        neighbor
    }
}

/// Determines whether the given face group of the cube at the given location
/// should be emitted.
///
/// A directional group is emitted when its face lies against the boundary
/// (see [`CubeLocation`] and [`SEAM_CULLING_EDGE_INDEX_THRESHOLD`]) or when
/// the adjacent block of voxels is empty. The remaining group is always
/// emitted.
#[inline]
pub fn visible(group: FaceGroup, cube: &CubeLocation, volume: &VoxelVolume) -> bool {
    let Some((dim, side)) = group.face() else {
        return true;
    };
    let dim = dim.idx();

    if cube.is_at_boundary(dim, side, volume.edge()) {
        return true;
    }

    let [i, j, k] = cube.neighbor_voxel(dim, side);
    volume.block_occupancy(i, j, k, cube.factor) == 0
}

/// Determines the set of face groups to emit for the cube at the given
/// location, or returns [`None`] if the cube's own block is empty and the
/// cube contributes no geometry.
#[inline]
pub fn visible_groups(cube: &CubeLocation, volume: &VoxelVolume) -> Option<FaceGroups> {
    if !cube.is_occupied(volume) {
        return None;
    }
    let mut groups = FaceGroups::empty();
    for group in FaceGroup::ALL {
        if visible(group, cube, volume) {
            groups |= group.as_set();
        }
    }
    Some(groups)
}
